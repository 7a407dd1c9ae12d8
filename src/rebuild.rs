//! Batch maintenance: rewrite the stored terms of many entities.
//!
//! The rebuilder pages through entity ids, reloads each entity's
//! fingerprint and stores it again, which repairs missing or stale
//! association rows and collects orphans along the way. Work is committed
//! per entity; progress is logged per batch and can be resumed from the
//! last reported position.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entity::{EntityId, EntityKind};
use crate::error::{TermStoreError, TermStoreResult, ValidationError};
use crate::fingerprint::Fingerprint;
use crate::writer::TermStoreWriter;

/// Longest uninterrupted sleep while pausing between batches.
const ABORT_POLL: Duration = Duration::from_millis(50);

/// Source of entity ids in a stable order, resumable from a position.
pub trait EntityIdPager: Send {
    /// Returns up to `limit` ids after the current position and advances.
    /// An empty result means the pager is exhausted.
    fn fetch_ids(&mut self, limit: usize) -> TermStoreResult<Vec<EntityId>>;

    /// Last id returned, if any.
    fn position(&self) -> Option<EntityId>;

    /// Continues after `position` (from the start if `None`).
    fn seek(&mut self, position: Option<EntityId>);
}

/// Loads the current fingerprint of an entity from wherever entities live.
pub trait FingerprintSource: Send + Sync {
    /// `Ok(None)` if the entity does not exist (deleted, redirected, ...).
    fn fingerprint(&self, entity_id: &EntityId) -> TermStoreResult<Option<Fingerprint>>;
}

/// Pager over a fixed list of ids, sorted and deduplicated.
#[derive(Debug, Clone, Default)]
pub struct SequentialEntityIdPager {
    ids: Vec<EntityId>,
    next: usize,
}

impl SequentialEntityIdPager {
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = EntityId>) -> Self {
        let mut ids: Vec<EntityId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self { ids, next: 0 }
    }
}

impl EntityIdPager for SequentialEntityIdPager {
    fn fetch_ids(&mut self, limit: usize) -> TermStoreResult<Vec<EntityId>> {
        let end = self.next.saturating_add(limit).min(self.ids.len());
        let batch = self.ids[self.next..end].to_vec();
        self.next = end;
        Ok(batch)
    }

    fn position(&self) -> Option<EntityId> {
        self.next.checked_sub(1).map(|i| self.ids[i].clone())
    }

    fn seek(&mut self, position: Option<EntityId>) {
        self.next = match position {
            Some(after) => self.ids.partition_point(|id| *id <= after),
            None => 0,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Entities per batch.
    pub batch_size: usize,
    /// Pause between batches; interrupted by the abort flag.
    pub batch_spacing_ms: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 250,
            batch_spacing_ms: 0,
        }
    }
}

impl RebuildConfig {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "batch_size must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    #[must_use]
    pub const fn batch_spacing(&self) -> Duration {
        Duration::from_millis(self.batch_spacing_ms)
    }
}

/// Totals of one rebuild run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub processed: usize,
    /// Entities whose write failed; see the warnings for causes.
    pub failed: usize,
    /// Entities the fingerprint source no longer knows.
    pub skipped: usize,
    pub batches: usize,
    /// Resume point: pass to [`EntityIdPager::seek`] to continue.
    pub last_position: Option<EntityId>,
    pub aborted: bool,
}

/// Re-stores the terms of every entity a pager yields.
pub struct TermsRebuilder<P: EntityIdPager> {
    pager: P,
    source: Arc<dyn FingerprintSource>,
    writers: BTreeMap<EntityKind, TermStoreWriter>,
    config: RebuildConfig,
    abort: Arc<AtomicBool>,
}

impl<P: EntityIdPager> TermsRebuilder<P> {
    /// One writer per entity kind to rebuild; ids of other kinds count as failures.
    pub fn new(
        pager: P,
        source: Arc<dyn FingerprintSource>,
        writers: impl IntoIterator<Item = TermStoreWriter>,
        config: RebuildConfig,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            pager,
            source,
            writers: writers.into_iter().map(|w| (w.store().kind(), w)).collect(),
            config: config.validate()?,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked before every batch; set it to stop after the current batch.
    #[must_use]
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    #[must_use]
    pub fn pager(&self) -> &P {
        &self.pager
    }

    /// Runs until the pager is exhausted or the abort flag is set.
    ///
    /// # Errors
    /// Only pager failures abort the run; per-entity failures are counted.
    pub fn rebuild(&mut self) -> TermStoreResult<RebuildSummary> {
        let mut summary = RebuildSummary {
            last_position: self.pager.position(),
            ..RebuildSummary::default()
        };

        loop {
            if self.abort.load(Ordering::SeqCst) {
                summary.aborted = true;
                info!(last_position = ?summary.last_position, "rebuild aborted");
                break;
            }

            let ids = self.pager.fetch_ids(self.config.batch_size)?;
            let Some(last) = ids.last().cloned() else {
                break;
            };

            for entity_id in &ids {
                self.rebuild_one(entity_id, &mut summary);
            }
            summary.batches += 1;
            summary.last_position = Some(last.clone());

            info!(
                processed = summary.processed,
                failed = summary.failed,
                last = %last,
                "rebuild progress"
            );

            // A short batch means the pager is exhausted.
            if ids.len() < self.config.batch_size {
                break;
            }
            self.pause();
        }

        Ok(summary)
    }

    /// Sleeps for the batch spacing, waking early if the abort flag is set.
    fn pause(&self) {
        let deadline = Instant::now() + self.config.batch_spacing();
        loop {
            let now = Instant::now();
            if now >= deadline || self.abort.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(ABORT_POLL.min(deadline - now));
        }
    }

    fn rebuild_one(&self, entity_id: &EntityId, summary: &mut RebuildSummary) {
        let result = self.writer_for(entity_id).and_then(|writer| {
            match self.source.fingerprint(entity_id)? {
                Some(fingerprint) => writer.store_terms(entity_id, &fingerprint).map(Some),
                None => Ok(None),
            }
        });
        match result {
            Ok(Some(_)) => summary.processed += 1,
            Ok(None) => summary.skipped += 1,
            Err(err) => {
                warn!(entity = %entity_id, error = %err, "rebuilding entity terms failed");
                summary.failed += 1;
            }
        }
    }

    fn writer_for(&self, entity_id: &EntityId) -> TermStoreResult<&TermStoreWriter> {
        self.writers.get(&entity_id.kind()).ok_or_else(|| TermStoreError::UnsupportedEntityScope {
            entity_id: entity_id.clone(),
            reason: format!("no writer configured for {} entities", entity_id.kind()),
        })
    }
}
