//! Storage contracts: errors, dictionary records and the journal seam.
//!
//! The database keeps every table in memory. Durability is delegated to a
//! [`Journal`], which receives each committed mutation batch before it is
//! applied. The default journal discards batches; the `persistent` feature
//! provides a write-ahead log.

use std::fmt;
use std::hash::Hash;
use std::sync::RwLock;

use thiserror::Error;

use super::database::TermDatabase;
use super::records::Mutation;
use super::tables::DictTable;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Unique index violation: the value already has a row.
    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    /// A row references a parent row that does not exist (or no longer exists).
    #[error("Foreign key violation in {table}: {parent} row {id} does not exist")]
    ForeignKeyViolation {
        table: &'static str,
        parent: &'static str,
        id: u64,
    },

    /// Waiting for another writer's row lock took too long.
    #[error("Lock wait timeout on {resource} after {waited_ms}ms")]
    LockTimeout { resource: String, waited_ms: u64 },

    /// The journal could not record a mutation batch.
    #[error("Journal error: {0}")]
    JournalError(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StorageError {
    /// Returns true if the same operation may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. } | Self::ForeignKeyViolation { .. } | Self::LockTimeout { .. }
        )
    }
}

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Durable record of committed mutations.
///
/// `append` is called with the table locks of the batch held, so the order
/// of appended batches matches the order in which they become visible.
/// A batch that fails to append is not applied.
pub trait Journal: Send + Sync {
    /// Records one atomic batch of mutations.
    fn append(&self, batch: &[Mutation]) -> Result<(), StorageError>;
}

/// Journal for purely in-memory databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJournal;

impl Journal for NoJournal {
    fn append(&self, _batch: &[Mutation]) -> Result<(), StorageError> {
        Ok(())
    }
}

mod sealed {
    pub trait Sealed {}
}

pub(crate) use sealed::Sealed;

/// A value stored in one of the four dictionary tables.
///
/// Each table has a unique index on the record value and assigns its own ids.
/// This trait is sealed: the set of dictionary tables is fixed.
pub trait DictionaryRecord: Sealed + Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Id type of the table.
    type Id: Copy
        + Eq
        + Hash
        + Ord
        + fmt::Debug
        + fmt::Display
        + From<u64>
        + Into<u64>
        + Send
        + Sync;

    /// Table name used in errors and logs.
    const TABLE: &'static str;

    /// The parent row whose cleanup cascades through this record, if any.
    fn cascade_parent(&self) -> Option<u64>;

    /// Journal entry recording the insertion of this record under `id`.
    fn insert_mutation(&self, id: Self::Id) -> Mutation;

    /// Short printable key for conflict errors.
    fn describe(&self) -> String;

    /// Checks that every parent row referenced by `rows` exists.
    ///
    /// Called with this record's table write-locked, so it may only lock
    /// tables further down the lock order.
    fn verify_parents(_rows: &[&Self], _db: &TermDatabase) -> Result<(), StorageError> {
        Ok(())
    }

    #[doc(hidden)]
    fn table(db: &TermDatabase) -> &RwLock<DictTable<Self>>;
}
