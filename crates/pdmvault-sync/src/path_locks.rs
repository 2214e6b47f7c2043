//! Per-path mutex table
//!
//! Every mutating intent on a path holds that path's guard for its whole
//! duration, so two intents on the same file within one process serialize.
//! Cross-machine exclusivity is the catalog's job, not this table's.

use std::sync::Arc;

use dashmap::DashMap;
use pdmvault_core::domain::RelativePath;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Holds the path's lock until dropped
#[derive(Debug)]
pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Lazily created async mutex per vault path
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<RelativePath, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock of `path`
    pub async fn acquire(&self, path: &RelativePath) -> PathGuard {
        let mutex = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Takes two path locks in a fixed order, for intents touching both
    /// ends of a move
    pub async fn acquire_pair(&self, a: &RelativePath, b: &RelativePath) -> Vec<PathGuard> {
        if a == b {
            return vec![self.acquire(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(first).await;
        let second = self.acquire(second).await;
        vec![first, second]
    }

    /// Drops table entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
