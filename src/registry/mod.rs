//! In-flight job registry.
//!
//! Tracks the identifiers of jobs this process is currently handling. It is a
//! live-status set for heartbeats and liveness probes, not a work queue: an id
//! is present exactly while a handler invocation for it is running.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe set of in-flight job ids.
///
/// Share it as `Arc<JobRegistry>` between the handler that fills it and the
/// readers that report it.
#[derive(Debug, Default)]
pub struct JobRegistry {
    ids: RwLock<HashSet<i64>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` is in flight.
    pub fn add(&self, id: i64) {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    /// Clears `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: i64) {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Returns a sorted snapshot of the in-flight ids.
    pub fn list(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Returns whether `id` is in flight.
    pub fn contains(&self, id: i64) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Number of in-flight ids.
    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `id` and returns a guard that removes it when dropped.
    ///
    /// The guard also fires during unwinding, so a panicking handler never
    /// leaves a stale entry behind.
    pub fn track(self: &Arc<Self>, id: i64) -> InFlightGuard {
        self.add(id);
        InFlightGuard {
            registry: Arc::clone(self),
            id,
        }
    }
}

/// Removes its id from the registry on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<JobRegistry>,
    id: i64,
}

impl InFlightGuard {
    /// The tracked id.
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
