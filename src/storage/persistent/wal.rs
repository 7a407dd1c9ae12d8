//! Write-ahead log of mutation batches.
//!
//! Every batch is appended (and optionally fsynced) before the database
//! applies it, so replaying the log in order reproduces the in-memory state.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: WalEntry]
//! [FRAME 2: WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{Journal, Mutation, StorageError};

use super::codec;
use super::file_lock::DirectoryLock;

const WAL_FILE: &str = "terms.wal";
const COMPACT_FILE: &str = "terms.wal.compact";

/// Mutations per frame when writing a compacted log.
const SNAPSHOT_CHUNK: usize = 4096;

/// One appended batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Applied atomically on replay.
    pub batch: Vec<Mutation>,
}

/// Result of scanning an existing log on open.
#[derive(Debug, Default)]
pub struct WalRecovery {
    pub entries: Vec<WalEntry>,
    /// Bytes cut from the end because the last frame was incomplete or damaged.
    pub truncated_bytes: u64,
}

struct WalWriter {
    file: File,
    /// Length of the log after the last complete frame.
    len: u64,
    sequence: u64,
    /// Set when a failed append could not be cut back off the file. Every
    /// later append is refused until the log is rewritten.
    failed: bool,
    #[cfg(test)]
    fail_next: Option<FailPoint>,
}

/// Where an injected append failure strikes.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum FailPoint {
    /// Half the frame reaches the file, then the write fails.
    MidFrame,
    /// The whole frame is written, then the sync fails.
    Sync,
}

impl WalWriter {
    fn new(file: File) -> IoResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            sequence: 0,
            failed: false,
            #[cfg(test)]
            fail_next: None,
        })
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> IoResult<()> {
        #[cfg(test)]
        if let Some(point) = self.fail_next.take() {
            let written = match point {
                FailPoint::MidFrame => &frame[..frame.len() / 2],
                FailPoint::Sync => frame,
            };
            self.file.write_all(written)?;
            return Err(std::io::Error::new(
                ErrorKind::Other,
                format!("injected failure: {point:?}"),
            ));
        }

        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cuts the file back to the last complete frame after a failed append.
    fn discard_tail(&mut self, path: &Path) {
        if let Err(e) = self.file.set_len(self.len).and_then(|()| self.file.sync_data()) {
            warn!(path = %path.display(), error = %e, "cannot cut failed append off journal");
            self.failed = true;
        }
    }
}

/// Append-only log used as the database journal.
///
/// Owns the directory lock, so the directory stays locked for as long as
/// any database holding this journal is alive.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
    _lock: DirectoryLock,
}

impl WriteAheadLog {
    /// Locks `dir`, then opens or creates its log.
    ///
    /// An incomplete final frame (a crash mid-append) is always cut off.
    /// A damaged frame fails the open unless `repair_corrupt_tail` is set,
    /// in which case it and everything after it are cut off.
    pub fn open(
        dir: &Path,
        sync_on_write: bool,
        repair_corrupt_tail: bool,
    ) -> IoResult<(Self, WalRecovery)> {
        fs::create_dir_all(dir)?;
        let lock = DirectoryLock::acquire(dir)?;
        let path = dir.join(WAL_FILE);

        let existing_len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let recovery = if existing_len < codec::HEADER_LEN {
            let mut file = File::create(&path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            WalRecovery::default()
        } else {
            let (entries, valid_len) = scan(&path, repair_corrupt_tail)?;
            let truncated_bytes = existing_len - valid_len;
            if truncated_bytes > 0 {
                warn!(
                    path = %path.display(),
                    truncated_bytes,
                    kept_entries = entries.len(),
                    "truncating damaged journal tail"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            WalRecovery {
                entries,
                truncated_bytes,
            }
        };

        let mut writer = WalWriter::new(OpenOptions::new().append(true).open(&path)?)?;
        writer.sequence = recovery.entries.last().map_or(0, |e| e.sequence);

        Ok((
            Self {
                path,
                writer: Mutex::new(writer),
                sync_on_write,
                _lock: lock,
            },
            recovery,
        ))
    }

    /// Appends one batch and returns its sequence number.
    ///
    /// On error nothing of the batch stays in the log: the frame is cut off
    /// again, so a batch the database refused can never be replayed.
    pub fn append_batch(&self, batch: &[Mutation]) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.append"))?;
        if writer.failed {
            return Err(std::io::Error::new(
                ErrorKind::Other,
                "journal holds a partial frame from a failed append",
            ));
        }

        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            batch: batch.to_vec(),
        })?;

        if let Err(e) = writer.write_frame(&encoded, self.sync_on_write) {
            writer.discard_tail(&self.path);
            return Err(e);
        }
        writer.len += encoded.len() as u64;
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Replaces the whole log with `snapshot`, atomically via rename.
    ///
    /// Callers must guarantee no batch is appended concurrently; the database
    /// holds every table lock while this runs.
    pub fn rewrite(&self, snapshot: &[Mutation]) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.rewrite"))?;

        let tmp_path = self.path.with_file_name(COMPACT_FILE);
        let mut sequence = 0;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            codec::write_header(&mut tmp)?;
            let now = Utc::now();
            for chunk in snapshot.chunks(SNAPSHOT_CHUNK) {
                sequence += 1;
                tmp.write_all(&codec::encode(&WalEntry {
                    sequence,
                    timestamp: now,
                    batch: chunk.to_vec(),
                })?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        *writer = WalWriter::new(OpenOptions::new().append(true).open(&self.path)?)?;
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Sequence number of the last appended batch.
    pub fn current_sequence(&self) -> u64 {
        self.writer.lock().map(|w| w.sequence).unwrap_or(0)
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for WriteAheadLog {
    fn append(&self, batch: &[Mutation]) -> Result<(), StorageError> {
        self.append_batch(batch)
            .map(|_| ())
            .map_err(|e| StorageError::JournalError(format!("WAL append failed: {e}")))
    }
}

/// Reads all intact entries, returning them with the length of the valid prefix.
fn scan(path: &Path, repair_corrupt_tail: bool) -> IoResult<(Vec<WalEntry>, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    codec::read_header(&mut reader)?;

    let mut entries = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    loop {
        match codec::decode::<WalEntry>(&mut reader) {
            Ok((entry, consumed)) => {
                valid_len += consumed;
                entries.push(entry);
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) if e.kind() == ErrorKind::InvalidData && repair_corrupt_tail => {
                let after_sequence = entries.last().map_or(0, |entry: &WalEntry| entry.sequence);
                warn!(after_sequence, error = %e, "damaged journal frame");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((entries, valid_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TextId;
    use tempfile::tempdir;

    fn text(id: u64, s: &str) -> Mutation {
        Mutation::InsertText {
            id: TextId::new(id),
            text: s.to_string(),
        }
    }

    #[test]
    fn test_append_and_recover() {
        let dir = tempdir().unwrap();
        {
            let (wal, recovery) = WriteAheadLog::open(dir.path(), false, false).unwrap();
            assert!(recovery.entries.is_empty());
            wal.append_batch(&[text(1, "cat")]).unwrap();
            wal.append_batch(&[text(2, "dog"), text(3, "bird")]).unwrap();
            assert_eq!(wal.current_sequence(), 2);
        }

        let (wal, recovery) = WriteAheadLog::open(dir.path(), false, false).unwrap();
        assert_eq!(recovery.entries.len(), 2);
        assert_eq!(recovery.entries[1].batch.len(), 2);
        assert_eq!(wal.current_sequence(), 2);
    }

    #[test]
    fn test_torn_tail_is_cut_and_log_stays_appendable() {
        let dir = tempdir().unwrap();
        {
            let (wal, _) = WriteAheadLog::open(dir.path(), false, false).unwrap();
            wal.append_batch(&[text(1, "cat")]).unwrap();
            wal.append_batch(&[text(2, "dog")]).unwrap();
        }
        let path = dir.path().join(WAL_FILE);
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        {
            let (wal, recovery) = WriteAheadLog::open(dir.path(), false, false).unwrap();
            assert_eq!(recovery.entries.len(), 1);
            assert!(recovery.truncated_bytes > 0);
            wal.append_batch(&[text(3, "bird")]).unwrap();
        }

        let (_, recovery) = WriteAheadLog::open(dir.path(), false, false).unwrap();
        let sequences: Vec<u64> = recovery.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_damaged_frame_requires_repair_flag() {
        let dir = tempdir().unwrap();
        {
            let (wal, _) = WriteAheadLog::open(dir.path(), false, false).unwrap();
            wal.append_batch(&[text(1, "cat")]).unwrap();
        }
        let path = dir.path().join(WAL_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(WriteAheadLog::open(dir.path(), false, false).is_err());
        let (_, recovery) = WriteAheadLog::open(dir.path(), false, true).unwrap();
        assert!(recovery.entries.is_empty());
    }

    fn recovered_batches(dir: &Path) -> Vec<(u64, Vec<Mutation>)> {
        let (_, recovery) = WriteAheadLog::open(dir, false, false).unwrap();
        recovery.entries.into_iter().map(|e| (e.sequence, e.batch)).collect()
    }

    fn fail_next_append(wal: &WriteAheadLog, point: FailPoint) {
        wal.writer.lock().unwrap().fail_next = Some(point);
    }

    #[test]
    fn test_failed_write_leaves_no_frame_behind() {
        let dir = tempdir().unwrap();
        {
            let (wal, _) = WriteAheadLog::open(dir.path(), false, false).unwrap();
            wal.append_batch(&[text(1, "cat")]).unwrap();
            let size = wal.size_bytes().unwrap();

            fail_next_append(&wal, FailPoint::MidFrame);
            assert!(wal.append_batch(&[text(2, "refused")]).is_err());
            assert_eq!(wal.size_bytes().unwrap(), size);
            assert_eq!(wal.current_sequence(), 1);

            wal.append_batch(&[text(3, "bird")]).unwrap();
        }

        let batches = recovered_batches(dir.path());
        assert_eq!(batches, vec![(1, vec![text(1, "cat")]), (2, vec![text(3, "bird")])]);
    }

    #[test]
    fn test_failed_sync_does_not_make_batch_durable() {
        let dir = tempdir().unwrap();
        {
            let (wal, _) = WriteAheadLog::open(dir.path(), true, false).unwrap();
            wal.append_batch(&[text(1, "cat")]).unwrap();

            fail_next_append(&wal, FailPoint::Sync);
            assert!(wal.append_batch(&[text(2, "refused")]).is_err());
            wal.append_batch(&[text(3, "bird")]).unwrap();
        }

        let texts: Vec<Mutation> = recovered_batches(dir.path())
            .into_iter()
            .flat_map(|(_, batch)| batch)
            .collect();
        assert_eq!(texts, vec![text(1, "cat"), text(3, "bird")]);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = tempdir().unwrap();
        let (wal, _) = WriteAheadLog::open(dir.path(), false, false).unwrap();
        for i in 1..=10 {
            wal.append_batch(&[text(i, "x")]).unwrap();
        }
        let before = wal.size_bytes().unwrap();

        let entries = wal.rewrite(&[text(1, "x")]).unwrap();
        assert_eq!(entries, 1);
        assert!(wal.size_bytes().unwrap() < before);
        wal.append_batch(&[text(2, "y")]).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        drop(wal);

        let (_, recovery) = WriteAheadLog::open(dir.path(), false, false).unwrap();
        assert_eq!(recovery.entries.len(), 2);
    }
}
