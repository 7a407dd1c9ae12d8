//! Storage layer for the term tables.
//!
//! [`TermDatabase`] holds the dictionary tables, one association table per
//! entity kind, the entity row locks, and a [`Journal`] for durability.

mod database;
mod records;
mod row_lock;
mod tables;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use database::{CleanupTxn, TermDatabase, TermStoreStats};
pub use records::{Mutation, TermInLang, Text, TextInLang, TypeName};
pub use row_lock::{RowLockGuard, RowLocks};
pub use traits::{DictionaryRecord, Journal, NoJournal, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentDatabase};
