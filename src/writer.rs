//! Entry point for the save pipeline: write associations, then clean up.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::association::{AssociationChange, EntityTermAssociationStore};
use crate::cleanup::{CleanupBacklog, CleanupReport, DatabaseTermStoreCleaner, TermStoreCleaner};
use crate::entity::{EntityId, EntityKind};
use crate::error::{TermStoreError, TermStoreResult};
use crate::fingerprint::Fingerprint;
use crate::ids::TermInLangId;
use crate::source::EntitySource;
use crate::storage::TermDatabase;

/// Result of one write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub change: AssociationChange,
    pub cleanup: CleanupReport,
    /// Candidates cleanup could not process; they were added to the backlog.
    pub cleanup_incomplete: Vec<TermInLangId>,
}

/// Writes fingerprints for one entity kind and cleans up after them.
///
/// A cleanup failure never fails the write: the association change is
/// already committed, and the unprocessed candidates go to the backlog.
pub struct TermStoreWriter {
    store: EntityTermAssociationStore,
    cleaner: Arc<dyn TermStoreCleaner>,
    backlog: Arc<CleanupBacklog>,
}

impl TermStoreWriter {
    /// Creates a writer that cleans up synchronously on the database.
    #[must_use]
    pub fn new(db: Arc<TermDatabase>, kind: EntityKind, source: EntitySource) -> Self {
        let cleaner = Arc::new(DatabaseTermStoreCleaner::new(Arc::clone(&db)));
        let store = EntityTermAssociationStore::new(db, kind, source);
        Self::with_cleaner(store, cleaner, Arc::new(CleanupBacklog::new()))
    }

    #[must_use]
    pub fn with_cleaner(
        store: EntityTermAssociationStore,
        cleaner: Arc<dyn TermStoreCleaner>,
        backlog: Arc<CleanupBacklog>,
    ) -> Self {
        Self {
            store,
            cleaner,
            backlog,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &EntityTermAssociationStore {
        &self.store
    }

    #[must_use]
    pub fn backlog(&self) -> &Arc<CleanupBacklog> {
        &self.backlog
    }

    pub fn store_terms(
        &self,
        entity_id: &EntityId,
        fingerprint: &Fingerprint,
    ) -> TermStoreResult<WriteOutcome> {
        let change = self.store.store_terms(entity_id, fingerprint)?;
        Ok(self.clean_after(entity_id, change))
    }

    pub fn delete_terms(&self, entity_id: &EntityId) -> TermStoreResult<WriteOutcome> {
        let change = self.store.delete_terms(entity_id)?;
        Ok(self.clean_after(entity_id, change))
    }

    /// Retries the backlog through this writer's cleaner.
    pub fn retry_backlog(&self) -> TermStoreResult<CleanupReport> {
        self.backlog.retry(self.cleaner.as_ref())
    }

    fn clean_after(&self, entity_id: &EntityId, change: AssociationChange) -> WriteOutcome {
        let candidates = change.cleanup_candidates();
        let mut outcome = WriteOutcome {
            change,
            ..WriteOutcome::default()
        };
        if candidates.is_empty() {
            return outcome;
        }

        match self.cleaner.clean_term_in_lang_ids(&candidates) {
            Ok(report) => outcome.cleanup = report,
            Err(TermStoreError::CleanupIncomplete { remaining, reason }) => {
                warn!(
                    entity = %entity_id,
                    remaining = remaining.len(),
                    reason = %reason,
                    "cleanup incomplete after write"
                );
                self.backlog.add(remaining.iter().copied());
                outcome.cleanup_incomplete = remaining;
            }
            Err(err) => {
                warn!(entity = %entity_id, error = %err, "cleanup failed after write");
                self.backlog.add(candidates.iter().copied());
                outcome.cleanup_incomplete = candidates;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableCleaner;

    impl TermStoreCleaner for UnavailableCleaner {
        fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
            Err(TermStoreError::CleanupIncomplete {
                remaining: ids.to_vec(),
                reason: "lock wait timeout".to_string(),
            })
        }
    }

    fn local() -> EntitySource {
        EntitySource::local("local", EntityKind::ALL)
    }

    #[test]
    fn test_replacing_a_label_cleans_old_rows() {
        let db = Arc::new(TermDatabase::in_memory());
        let writer = TermStoreWriter::new(Arc::clone(&db), EntityKind::Item, local());
        let q1 = EntityId::item(1);

        writer.store_terms(&q1, &Fingerprint::new().with_label("en", "cat")).unwrap();
        let outcome = writer.store_terms(&q1, &Fingerprint::new().with_label("en", "dog")).unwrap();

        assert_eq!(outcome.cleanup.deleted_terms_in_lang.len(), 1);
        assert_eq!(outcome.cleanup.deleted_texts.len(), 1);
        assert!(outcome.cleanup_incomplete.is_empty());
        assert_eq!(db.stats().unwrap().texts, 1);
    }

    #[test]
    fn test_cleanup_failure_does_not_fail_write() {
        let db = Arc::new(TermDatabase::in_memory());
        let store = EntityTermAssociationStore::new(Arc::clone(&db), EntityKind::Item, local());
        let writer = TermStoreWriter::with_cleaner(
            store,
            Arc::new(UnavailableCleaner),
            Arc::new(CleanupBacklog::new()),
        );
        let q1 = EntityId::item(1);

        writer.store_terms(&q1, &Fingerprint::new().with_label("en", "cat")).unwrap();
        let outcome = writer.delete_terms(&q1).unwrap();

        assert_eq!(outcome.change.removed.len(), 1);
        assert_eq!(outcome.cleanup_incomplete.len(), 1);
        assert_eq!(writer.backlog().len(), 1);
        assert!(db.association_ids(EntityKind::Item, 1).unwrap().is_empty());

        // The orphan is still there until a working cleaner retries the backlog.
        assert_eq!(db.stats().unwrap().terms_in_lang, 1);
        let report = writer
            .backlog()
            .retry(&DatabaseTermStoreCleaner::new(Arc::clone(&db)))
            .unwrap();
        assert_eq!(report.deleted_terms_in_lang.len(), 1);
        assert_eq!(db.stats().unwrap().terms_in_lang, 0);
    }
}
