//! Entity-scoped row locks.
//!
//! A writer holds the lock of exactly one entity while it reads, diffs and
//! rewrites that entity's association rows. Locks on different entities are
//! independent; waiting is bounded by a timeout.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::entity::EntityKind;

use super::traits::{lock_err, StorageError};

type RowKey = (EntityKind, u64);

/// Lock table keyed by (entity kind, numeric entity id).
#[derive(Debug, Default)]
pub struct RowLocks {
    held: Mutex<HashSet<RowKey>>,
    released: Condvar,
}

/// Releases its row lock on drop.
#[derive(Debug)]
pub struct RowLockGuard<'a> {
    locks: &'a RowLocks,
    key: RowKey,
}

impl RowLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the row is free or `timeout` elapses.
    pub fn lock(
        &self,
        kind: EntityKind,
        entity: u64,
        timeout: Duration,
    ) -> Result<RowLockGuard<'_>, StorageError> {
        let key = (kind, entity);
        let started = Instant::now();
        let mut held = self.held.lock().map_err(|_| lock_err("row_locks.lock"))?;

        while held.contains(&key) {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(StorageError::LockTimeout {
                    resource: format!("{}{}", kind.prefix(), entity),
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, timeout - elapsed)
                .map_err(|_| lock_err("row_locks.wait"))?;
            held = guard;
        }

        held.insert(key);
        Ok(RowLockGuard { locks: self, key })
    }

    /// Returns true if the row is currently locked.
    pub fn is_locked(&self, kind: EntityKind, entity: u64) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&(kind, entity)))
            .unwrap_or(false)
    }
}

impl Drop for RowLockGuard<'_> {
    fn drop(&mut self) {
        // A poisoned set still holds our key; recover it so the row is not leaked.
        let mut held = match self.locks.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_release_on_drop() {
        let locks = RowLocks::new();
        {
            let _g = locks.lock(EntityKind::Item, 1, Duration::from_millis(10)).unwrap();
            assert!(locks.is_locked(EntityKind::Item, 1));
        }
        assert!(!locks.is_locked(EntityKind::Item, 1));
    }

    #[test]
    fn test_distinct_rows_do_not_block() {
        let locks = RowLocks::new();
        let _a = locks.lock(EntityKind::Item, 1, Duration::from_millis(10)).unwrap();
        let _b = locks.lock(EntityKind::Item, 2, Duration::from_millis(10)).unwrap();
        let _c = locks.lock(EntityKind::Property, 1, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn test_same_row_times_out() {
        let locks = RowLocks::new();
        let _a = locks.lock(EntityKind::Item, 1, Duration::from_millis(10)).unwrap();
        let err = locks.lock(EntityKind::Item, 1, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));
        assert!(err.to_string().contains("Q1"));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(RowLocks::new());
        let guard = locks.lock(EntityKind::Item, 5, Duration::from_millis(10)).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks
                    .lock(EntityKind::Item, 5, Duration::from_secs(5))
                    .map(|_| ())
            })
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap().is_ok());
    }
}
