//! Per-entity association rows: which term-in-language ids make up an
//! entity's fingerprint.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::acquirer::{DatabaseTermInLangIdsAcquirer, TermInLangIdsAcquirer};
use crate::entity::{EntityId, EntityKind};
use crate::error::{TermStoreError, TermStoreResult};
use crate::fingerprint::{terms_by_type_and_language, Fingerprint, TermsByTypeAndLanguage};
use crate::ids::TermInLangId;
use crate::normalize::StringNormalizer;
use crate::source::{EntitySource, FederationMode};
use crate::storage::{StorageError, TermDatabase};

const ASSOCIATION_TABLE: &str = "entity_terms";

/// The diff applied to one entity's association rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssociationChange {
    pub inserted: BTreeSet<TermInLangId>,
    /// Ids the entity no longer references; candidates for cleanup.
    pub removed: BTreeSet<TermInLangId>,
}

impl AssociationChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    #[must_use]
    pub fn cleanup_candidates(&self) -> Vec<TermInLangId> {
        self.removed.iter().copied().collect()
    }
}

/// Writes the association rows of one entity kind.
///
/// Each store instance is bound to a kind and the entity source that owns
/// it; ids outside that scope are rejected before any lock is taken.
pub struct EntityTermAssociationStore {
    db: Arc<TermDatabase>,
    kind: EntityKind,
    source: EntitySource,
    acquirer: Arc<dyn TermInLangIdsAcquirer>,
}

impl EntityTermAssociationStore {
    /// Creates a store using the database-backed acquirer.
    #[must_use]
    pub fn new(db: Arc<TermDatabase>, kind: EntityKind, source: EntitySource) -> Self {
        let acquirer = Arc::new(DatabaseTermInLangIdsAcquirer::new(
            Arc::clone(&db),
            StringNormalizer::new(),
        ));
        Self::with_acquirer(db, kind, source, acquirer)
    }

    #[must_use]
    pub fn with_acquirer(
        db: Arc<TermDatabase>,
        kind: EntityKind,
        source: EntitySource,
        acquirer: Arc<dyn TermInLangIdsAcquirer>,
    ) -> Self {
        Self {
            db,
            kind,
            source,
            acquirer,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub const fn source(&self) -> &EntitySource {
        &self.source
    }

    /// Makes the entity's association rows match `fingerprint`.
    ///
    /// Returns the ids inserted and removed; removed ids should be passed to
    /// a cleaner. Applying the same fingerprint again returns an empty change.
    pub fn store_terms(
        &self,
        entity_id: &EntityId,
        fingerprint: &Fingerprint,
    ) -> TermStoreResult<AssociationChange> {
        self.check_scope(entity_id)?;
        let terms = terms_by_type_and_language(fingerprint);
        self.write(entity_id, Some(&terms))
    }

    /// Removes every association row of the entity.
    pub fn delete_terms(&self, entity_id: &EntityId) -> TermStoreResult<AssociationChange> {
        self.check_scope(entity_id)?;
        self.write(entity_id, None)
    }

    fn check_scope(&self, entity_id: &EntityId) -> TermStoreResult<()> {
        // Association rows are keyed by the numeric part only, so a prefixed
        // id would land on the local entity with the same number.
        if entity_id.is_foreign() {
            return Err(TermStoreError::ForeignEntityRejected {
                entity_id: entity_id.clone(),
            });
        }
        if self.db.config().federation == FederationMode::EntitySource {
            if !self.source.is_local() {
                return Err(TermStoreError::UnsupportedEntityScope {
                    entity_id: entity_id.clone(),
                    reason: format!(
                        "entity source '{}' belongs to database '{}'",
                        self.source.name(),
                        self.source.database().unwrap_or_default()
                    ),
                });
            }
            if !self.source.provides(self.kind) {
                return Err(TermStoreError::UnsupportedEntityScope {
                    entity_id: entity_id.clone(),
                    reason: format!(
                        "entity source '{}' does not provide {} entities",
                        self.source.name(),
                        self.kind
                    ),
                });
            }
        }
        if entity_id.kind() != self.kind {
            return Err(TermStoreError::wrong_kind(entity_id.clone(), self.kind));
        }
        Ok(())
    }

    /// Diffs and applies under the entity's row lock. `None` means delete all.
    fn write(
        &self,
        entity_id: &EntityId,
        terms: Option<&TermsByTypeAndLanguage>,
    ) -> TermStoreResult<AssociationChange> {
        let entity = entity_id.numeric();
        let _row = self.db.lock_entity(self.kind, entity)?;

        let max_attempts = self.db.config().max_acquire_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let existing = self.db.association_ids(self.kind, entity)?;
            let desired = match terms {
                Some(terms) => self.acquirer.acquire_term_in_lang_ids(terms)?,
                None => BTreeSet::new(),
            };

            let change = AssociationChange {
                inserted: desired.difference(&existing).copied().collect(),
                removed: existing.difference(&desired).copied().collect(),
            };
            let insert: Vec<TermInLangId> = change.inserted.iter().copied().collect();
            let remove: Vec<TermInLangId> = change.removed.iter().copied().collect();

            match self.db.apply_association_change(self.kind, entity, &insert, &remove) {
                Ok(()) => {
                    debug!(
                        entity = %entity_id,
                        inserted = insert.len(),
                        removed = remove.len(),
                        "stored entity terms"
                    );
                    return Ok(change);
                }
                // A cleaner deleted an acquired id before we could reference it.
                Err(StorageError::ForeignKeyViolation { id, .. }) if attempt < max_attempts => {
                    debug!(
                        entity = %entity_id,
                        term_in_lang = id,
                        attempt,
                        "acquired term vanished, reacquiring"
                    );
                }
                Err(StorageError::ForeignKeyViolation { .. }) => {
                    return Err(TermStoreError::TransientStorageConflict {
                        table: ASSOCIATION_TABLE,
                        attempts: attempt,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}
