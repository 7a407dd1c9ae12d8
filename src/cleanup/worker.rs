use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TermStoreError, TermStoreResult};
use crate::ids::TermInLangId;
use crate::storage::StorageError;

use super::{CleanupBacklog, CleanupReport, TermStoreCleaner};

/// Worker pool settings for [`DeferredCleaner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupWorkerConfig {
    pub workers: usize,
    /// Maximum queued cleanup jobs. Jobs beyond it go to the backlog.
    pub queue_capacity: usize,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 1024,
        }
    }
}

/// Jobs accepted but not yet finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Cleaner that runs another cleaner on background threads.
///
/// `clean_term_in_lang_ids` only enqueues and returns at once, reporting
/// every id as deferred. Candidates that cannot be queued (full queue, or
/// after shutdown) and ids a failed job left unprocessed go to the backlog.
pub struct DeferredCleaner {
    tx: Option<Sender<Vec<TermInLangId>>>,
    workers: Vec<JoinHandle<()>>,
    backlog: Arc<CleanupBacklog>,
    in_flight: Arc<InFlight>,
    queue_capacity: usize,
}

impl DeferredCleaner {
    /// Starts the worker threads.
    pub fn start(
        inner: Arc<dyn TermStoreCleaner>,
        backlog: Arc<CleanupBacklog>,
        config: CleanupWorkerConfig,
    ) -> TermStoreResult<Self> {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Vec<TermInLangId>>(queue_capacity);
        let in_flight = Arc::new(InFlight::default());

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Vec<TermInLangId>> = rx.clone();
            let inner = Arc::clone(&inner);
            let backlog = Arc::clone(&backlog);
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("termstore-cleanup-{idx}"))
                .spawn(move || {
                    while let Ok(ids) = rx.recv() {
                        run_job(inner.as_ref(), &backlog, ids);
                        in_flight.done();
                    }
                })
                .map_err(|e| {
                    TermStoreError::StorageUnavailable(StorageError::BackendError(format!(
                        "failed to spawn cleanup worker: {e}"
                    )))
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            backlog,
            in_flight,
            queue_capacity,
        })
    }

    #[must_use]
    pub fn backlog(&self) -> &Arc<CleanupBacklog> {
        &self.backlog
    }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Blocks until every accepted job has finished or `timeout` elapses.
    /// Returns true if the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .in_flight
                .idle
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stops accepting jobs, lets the workers drain the queue, and joins them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel makes workers exit after the queued jobs.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn shed(&self, ids: Vec<TermInLangId>, why: &'static str) -> CleanupReport {
        warn!(candidates = ids.len(), why, "cleanup deferred to backlog");
        self.backlog.add(ids.iter().copied());
        CleanupReport {
            deferred: ids,
            ..CleanupReport::default()
        }
    }
}

fn run_job(inner: &dyn TermStoreCleaner, backlog: &CleanupBacklog, ids: Vec<TermInLangId>) {
    match inner.clean_term_in_lang_ids(&ids) {
        Ok(report) => debug!(
            candidates = ids.len(),
            deleted = report.deleted_rows(),
            "background cleanup done"
        ),
        Err(TermStoreError::CleanupIncomplete { remaining, reason }) => {
            warn!(remaining = remaining.len(), reason = %reason, "background cleanup incomplete");
            backlog.add(remaining);
        }
        Err(err) => {
            warn!(candidates = ids.len(), error = %err, "background cleanup failed");
            backlog.add(ids);
        }
    }
}

impl TermStoreCleaner for DeferredCleaner {
    fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
        if ids.is_empty() {
            return Ok(CleanupReport::default());
        }
        let Some(tx) = &self.tx else {
            return Ok(self.shed(ids.to_vec(), "worker stopped"));
        };

        self.in_flight.add();
        match tx.try_send(ids.to_vec()) {
            Ok(()) => Ok(CleanupReport {
                deferred: ids.to_vec(),
                ..CleanupReport::default()
            }),
            Err(TrySendError::Full(ids)) => {
                self.in_flight.done();
                Ok(self.shed(ids, "queue full"))
            }
            Err(TrySendError::Disconnected(ids)) => {
                self.in_flight.done();
                Ok(self.shed(ids, "worker stopped"))
            }
        }
    }
}

impl Drop for DeferredCleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCleaner {
        seen: AtomicUsize,
    }

    impl TermStoreCleaner for CountingCleaner {
        fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
            self.seen.fetch_add(ids.len(), Ordering::SeqCst);
            Ok(CleanupReport::default())
        }
    }

    /// Blocks until the test releases it.
    struct GatedCleaner {
        gate: Mutex<()>,
    }

    impl TermStoreCleaner for GatedCleaner {
        fn clean_term_in_lang_ids(&self, _ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
            let _open = self.gate.lock().unwrap();
            Ok(CleanupReport::default())
        }
    }

    struct BrokenCleaner;

    impl TermStoreCleaner for BrokenCleaner {
        fn clean_term_in_lang_ids(&self, ids: &[TermInLangId]) -> TermStoreResult<CleanupReport> {
            Err(TermStoreError::CleanupIncomplete {
                remaining: ids.to_vec(),
                reason: "journal offline".to_string(),
            })
        }
    }

    fn ids(n: u64) -> Vec<TermInLangId> {
        (1..=n).map(TermInLangId::new).collect()
    }

    #[test]
    fn test_jobs_run_in_background() {
        let inner = Arc::new(CountingCleaner::default());
        let cleaner = DeferredCleaner::start(
            inner.clone(),
            Arc::new(CleanupBacklog::new()),
            CleanupWorkerConfig {
                workers: 2,
                queue_capacity: 16,
            },
        )
        .unwrap();

        for _ in 0..4 {
            let report = cleaner.clean_term_in_lang_ids(&ids(3)).unwrap();
            assert_eq!(report.deferred.len(), 3);
        }
        assert!(cleaner.wait_idle(Duration::from_secs(5)));
        assert_eq!(inner.seen.load(Ordering::SeqCst), 12);
        cleaner.shutdown();
    }

    #[test]
    fn test_full_queue_sheds_to_backlog() {
        let inner = Arc::new(GatedCleaner { gate: Mutex::new(()) });
        let backlog = Arc::new(CleanupBacklog::new());
        let cleaner = DeferredCleaner::start(
            inner.clone(),
            Arc::clone(&backlog),
            CleanupWorkerConfig {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        let gate = inner.gate.lock().unwrap();
        // One job may be picked up by the worker, one more fits the queue;
        // after that every job is shed.
        for i in 0..5 {
            cleaner.clean_term_in_lang_ids(&[TermInLangId::new(i + 1)]).unwrap();
        }
        assert!(backlog.len() >= 3);
        drop(gate);

        assert!(cleaner.wait_idle(Duration::from_secs(5)));
        cleaner.shutdown();
    }

    #[test]
    fn test_failed_jobs_land_in_backlog() {
        let backlog = Arc::new(CleanupBacklog::new());
        let cleaner = DeferredCleaner::start(
            Arc::new(BrokenCleaner),
            Arc::clone(&backlog),
            CleanupWorkerConfig::default(),
        )
        .unwrap();
        cleaner.clean_term_in_lang_ids(&ids(2)).unwrap();
        assert!(cleaner.wait_idle(Duration::from_secs(5)));
        assert_eq!(backlog.snapshot(), ids(2));
    }

    #[test]
    fn test_after_shutdown_candidates_go_to_backlog() {
        let backlog = Arc::new(CleanupBacklog::new());
        let mut cleaner = DeferredCleaner::start(
            Arc::new(CountingCleaner::default()),
            Arc::clone(&backlog),
            CleanupWorkerConfig::default(),
        )
        .unwrap();
        cleaner.stop();
        let report = cleaner.clean_term_in_lang_ids(&ids(1)).unwrap();
        assert_eq!(report.deferred, ids(1));
        assert_eq!(backlog.len(), 1);
    }
}
