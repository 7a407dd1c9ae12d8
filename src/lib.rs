//! # termstore - deduplicated multilingual term storage
//!
//! Labels, descriptions and aliases of entities are stored once per distinct
//! text, once per (language, text) pair and once per (term type, language,
//! text) triple. Entities reference the last level. When an entity stops
//! referencing a term, a cleaner re-checks every entity kind before deleting
//! it and cascades into the lower levels.
//!
//! ## Core Concepts
//!
//! - **Fingerprint**: the labels, descriptions and aliases of one entity
//! - **Dictionary**: content-addressed table with insert-or-fetch acquisition
//! - **Association store**: per-kind entity → term rows, written as a diff
//! - **Cleaner**: reference-checked deletion of orphaned term rows
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use termstore::{
//!     EntityId, EntityKind, EntitySource, Fingerprint, TermDatabase, TermStoreWriter,
//! };
//!
//! let db = Arc::new(TermDatabase::in_memory());
//! let source = EntitySource::local("local", EntityKind::ALL);
//! let writer = TermStoreWriter::new(Arc::clone(&db), EntityKind::Item, source);
//!
//! let q1: EntityId = "Q1".parse()?;
//! writer.store_terms(&q1, &Fingerprint::new().with_label("en", "cat"))?;
//! let outcome = writer.store_terms(&q1, &Fingerprint::new().with_label("en", "dog"))?;
//! assert_eq!(outcome.cleanup.deleted_texts.len(), 1);
//! # Ok::<(), termstore::TermStoreError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod normalize;
pub mod source;

// Storage and term components
pub mod acquirer;
pub mod association;
pub mod cleanup;
pub mod dictionary;
pub mod storage;

// Entry points
pub mod lookup;
pub mod rebuild;
pub mod writer;

pub use acquirer::{DatabaseTermInLangIdsAcquirer, TermInLangIdsAcquirer};
pub use association::{AssociationChange, EntityTermAssociationStore};
pub use cleanup::{
    CleanupBacklog, CleanupReport, CleanupWorkerConfig, DatabaseTermStoreCleaner, DeferredCleaner,
    TermStoreCleaner,
};
pub use config::TermStoreConfig;
pub use dictionary::{
    Dictionary, TermInLangDictionary, TextDictionary, TextInLangDictionary, TypeDictionary,
};
pub use entity::{EntityId, EntityKind};
pub use error::{TermStoreError, TermStoreResult, ValidationError};
pub use fingerprint::{terms_by_type_and_language, Fingerprint, TermType, TermsByTypeAndLanguage};
pub use ids::{TermInLangId, TextId, TextInLangId, TypeId};
pub use lookup::TermLookup;
pub use normalize::StringNormalizer;
pub use rebuild::{
    EntityIdPager, FingerprintSource, RebuildConfig, RebuildSummary, SequentialEntityIdPager,
    TermsRebuilder,
};
pub use source::{EntitySource, FederationMode};
pub use storage::{StorageError, TermDatabase, TermStoreStats};
pub use writer::{TermStoreWriter, WriteOutcome};
