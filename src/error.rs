//! Error types for termstore.
//!
//! All errors are strongly typed using thiserror. Domain-rule violations
//! (wrong entity kind, foreign ids) are ordinary error values the caller
//! matches on, never panics.

use thiserror::Error;

use crate::entity::{EntityId, EntityKind};
use crate::ids::TermInLangId;
use crate::storage::StorageError;

/// Validation errors that occur before any row is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Text exceeds maximum length of {max_bytes} bytes (got {actual_bytes})")]
    TextTooLong {
        max_bytes: usize,
        actual_bytes: usize,
    },

    #[error("Language code '{language}' exceeds maximum length of {max_bytes} bytes")]
    LanguageTooLong {
        language: String,
        max_bytes: usize,
    },

    #[error("Language code cannot be empty")]
    EmptyLanguage,

    #[error("Term type name cannot be empty")]
    EmptyTermType,

    /// Two language keys of a single-valued term type normalize to the same code.
    #[error("Language keys '{first}' and '{second}' collide as '{language}' for {term_type}")]
    ConflictingLanguage {
        term_type: String,
        language: String,
        first: String,
        second: String,
    },

    #[error("Invalid entity id '{input}': {reason}")]
    InvalidEntityId {
        input: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Top-level error type for term store operations.
#[derive(Debug, Error)]
pub enum TermStoreError {
    /// The store instance does not own this entity kind or source.
    #[error("Unsupported entity scope for {entity_id}: {reason}")]
    UnsupportedEntityScope {
        entity_id: EntityId,
        reason: String,
    },

    /// The entity id belongs to another repository.
    #[error("Foreign entity id rejected: {entity_id}")]
    ForeignEntityRejected {
        entity_id: EntityId,
    },

    /// A unique-key or foreign-key race that did not settle within the retry budget.
    #[error("Storage conflict on {table} persisted after {attempts} attempts")]
    TransientStorageConflict {
        table: &'static str,
        attempts: u32,
    },

    /// Underlying storage, journal or lock failure. The operation was aborted.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(StorageError),

    /// A cleanup pass stopped partway; the listed ids were not processed.
    #[error("Cleanup incomplete ({} ids remaining): {reason}", remaining.len())]
    CleanupIncomplete {
        remaining: Vec<TermInLangId>,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TermStoreError {
    /// Creates an unsupported-scope error for an entity of the wrong kind.
    #[must_use]
    pub fn wrong_kind(entity_id: EntityId, expected: EntityKind) -> Self {
        Self::UnsupportedEntityScope {
            reason: format!("store handles {expected} entities, got {}", entity_id.kind()),
            entity_id,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error is a scope violation (programming or configuration error).
    #[must_use]
    pub const fn is_scope_violation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEntityScope { .. } | Self::ForeignEntityRejected { .. }
        )
    }

    /// Returns true if the failed operation may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::TransientStorageConflict { .. } | Self::CleanupIncomplete { .. } => true,
            Self::StorageUnavailable(e) => e.is_transient(),
            Self::UnsupportedEntityScope { .. }
            | Self::ForeignEntityRejected { .. }
            | Self::Validation(_) => false,
        }
    }
}

impl From<StorageError> for TermStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey { table, .. }
            | StorageError::ForeignKeyViolation { table, .. } => {
                Self::TransientStorageConflict { table, attempts: 1 }
            }
            other => Self::StorageUnavailable(other),
        }
    }
}

/// Result type alias for term store operations.
pub type TermStoreResult<T> = Result<T, TermStoreError>;
