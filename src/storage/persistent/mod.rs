//! Durable term database backed by a write-ahead log.
//!
//! The tables stay in memory. Every mutation batch is appended to
//! `<dir>/terms.wal` before it is applied; opening the directory replays the
//! log. Compaction rewrites the log as a snapshot of the live rows.
//!
//! ```text
//! <dir>/
//!   .lock        advisory lock, one process at a time
//!   terms.wal    header + CRC-framed JSON batches
//! ```

mod codec;
mod file_lock;
mod wal;

pub use file_lock::DirectoryLock;
pub use wal::{WalEntry, WalRecovery, WriteAheadLog};

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::TermStoreConfig;
use crate::error::{TermStoreError, ValidationError};
use crate::storage::{StorageError, TermDatabase};

/// Configuration for the durable backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// Log size (bytes) above which [`PersistentDatabase::compact_if_needed`] compacts.
    pub max_wal_size: u64,
    /// Whether to fsync after every batch.
    pub sync_on_write: bool,
    /// Cut off a damaged frame (and everything after it) instead of failing to open.
    pub repair_corrupt_tail: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
            repair_corrupt_tail: false,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Outcome of a log compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Frames written to the new log.
    pub entries_written: u64,
}

/// A [`TermDatabase`] whose journal is a write-ahead log in one directory.
pub struct PersistentDatabase {
    database: Arc<TermDatabase>,
    wal: Arc<WriteAheadLog>,
    config: PersistentConfig,
}

impl std::fmt::Debug for PersistentDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentDatabase")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentDatabase {
    /// The shared database, for handing to stores, cleaners and lookups.
    #[must_use]
    pub fn database(&self) -> Arc<TermDatabase> {
        Arc::clone(&self.database)
    }

    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal
            .size_bytes()
            .map_err(|e| StorageError::JournalError(format!("cannot stat WAL: {e}")))
    }

    /// Rewrites the log so it holds only the live rows.
    ///
    /// Blocks every writer for the duration.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let bytes_before = self.wal_size()?;
        let entries_written = self.database.with_quiesced_snapshot(|snapshot| {
            self.wal
                .rewrite(&snapshot)
                .map_err(|e| StorageError::JournalError(format!("WAL compaction failed: {e}")))
        })?;
        let bytes_after = self.wal_size()?;

        info!(bytes_before, bytes_after, entries_written, "compacted term journal");
        Ok(CompactionResult {
            bytes_before,
            bytes_after,
            entries_written,
        })
    }

    /// Compacts if the log has grown past `max_wal_size`.
    pub fn compact_if_needed(&self) -> Result<Option<CompactionResult>, StorageError> {
        if self.wal_size()? < self.config.max_wal_size {
            return Ok(None);
        }
        self.compact().map(Some)
    }
}

/// Opens or creates a durable term database in `path`.
///
/// # Errors
/// - `StorageUnavailable` if the directory cannot be created, another
///   process holds its lock, or the log is damaged (see
///   [`PersistentConfig::repair_corrupt_tail`]).
/// - `Validation` if either configuration is invalid.
///
/// # Example
/// ```rust,ignore
/// use termstore::storage::persistent::open_database;
///
/// let store = open_database("./terms.db", TermStoreConfig::default(), None)?;
/// let writer = TermStoreWriter::new(store.database(), EntityKind::Item, source);
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    store_config: TermStoreConfig,
    config: Option<PersistentConfig>,
) -> Result<PersistentDatabase, TermStoreError> {
    let path = path.as_ref();
    let config = config.unwrap_or_default().validate()?;

    let (wal, recovery) =
        WriteAheadLog::open(path, config.sync_on_write, config.repair_corrupt_tail).map_err(|e| {
            StorageError::JournalError(format!("cannot open {}: {e}", path.display()))
        })?;
    let wal = Arc::new(wal);

    let database = TermDatabase::with_journal(store_config, wal.clone())?;
    for entry in &recovery.entries {
        database.replay(&entry.batch)?;
    }

    info!(
        path = %path.display(),
        replayed_batches = recovery.entries.len(),
        truncated_bytes = recovery.truncated_bytes,
        "opened term database"
    );

    Ok(PersistentDatabase {
        database: Arc::new(database),
        wal,
        config,
    })
}
