use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::error::{TermStoreError, TermStoreResult};
use crate::ids::TermInLangId;

use super::{CleanupReport, TermStoreCleaner};

/// Candidates whose cleanup failed or was shed, kept for a later retry.
///
/// Holding an id here is always safe: the cleaner re-checks references
/// before deleting, however stale the entry.
#[derive(Debug, Default)]
pub struct CleanupBacklog {
    pending: Mutex<BTreeSet<TermInLangId>>,
}

impl CleanupBacklog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<TermInLangId>> {
        // The set stays consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, ids: impl IntoIterator<Item = TermInLangId>) {
        self.pending().extend(ids);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<TermInLangId> {
        self.pending().iter().copied().collect()
    }

    /// Removes and returns every pending id.
    pub fn take(&self) -> Vec<TermInLangId> {
        std::mem::take(&mut *self.pending()).into_iter().collect()
    }

    /// Runs every pending id through `cleaner`.
    ///
    /// Ids the cleaner could not process go back into the backlog.
    pub fn retry(&self, cleaner: &dyn TermStoreCleaner) -> TermStoreResult<CleanupReport> {
        let ids = self.take();
        if ids.is_empty() {
            return Ok(CleanupReport::default());
        }

        match cleaner.clean_term_in_lang_ids(&ids) {
            Ok(report) => {
                info!(
                    retried = ids.len(),
                    deleted = report.deleted_rows(),
                    "cleanup backlog drained"
                );
                Ok(report)
            }
            Err(TermStoreError::CleanupIncomplete { remaining, reason }) => {
                self.add(remaining.iter().copied());
                Err(TermStoreError::CleanupIncomplete { remaining, reason })
            }
            Err(other) => {
                self.add(ids);
                Err(other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on its first call, after processing half of the ids.
    #[derive(Default)]
    struct FlakyCleaner {
        calls: AtomicUsize,
    }

    impl TermStoreCleaner for FlakyCleaner {
        fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(TermStoreError::CleanupIncomplete {
                    remaining: ids[ids.len() / 2..].to_vec(),
                    reason: "storage unavailable".to_string(),
                });
            }
            Ok(CleanupReport {
                deleted_terms_in_lang: ids.to_vec(),
                ..CleanupReport::default()
            })
        }
    }

    fn ids(raw: &[u64]) -> Vec<TermInLangId> {
        raw.iter().copied().map(TermInLangId::new).collect()
    }

    #[test]
    fn test_add_deduplicates() {
        let backlog = CleanupBacklog::new();
        backlog.add(ids(&[3, 1, 3]));
        backlog.add(ids(&[1]));
        assert_eq!(backlog.snapshot(), ids(&[1, 3]));
    }

    #[test]
    fn test_retry_requeues_remaining_ids() {
        let backlog = CleanupBacklog::new();
        backlog.add(ids(&[1, 2, 3, 4]));
        let cleaner = FlakyCleaner::default();

        assert!(backlog.retry(&cleaner).is_err());
        assert_eq!(backlog.snapshot(), ids(&[3, 4]));

        let report = backlog.retry(&cleaner).unwrap();
        assert_eq!(report.deleted_terms_in_lang, ids(&[3, 4]));
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_retry_on_empty_backlog_skips_cleaner() {
        let cleaner = FlakyCleaner::default();
        CleanupBacklog::new().retry(&cleaner).unwrap();
        assert_eq!(cleaner.calls.load(Ordering::SeqCst), 0);
    }
}
