//! Garbage collection of unobserved cache entries.
//!
//! An entry with no observers whose retention window has elapsed is removed
//! outright; the next read of that key behaves as a first read. The sweep
//! can run lazily via [`GarbageCollector::sweep`] or as a low-priority
//! background loop via [`GarbageCollector::run`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::policy::{StalenessPolicy, ViewerMode};
use crate::store::CacheStore;

/// Default background sweep interval, on the order of the smallest
/// retention window in use.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GarbageCollector {
    store: Arc<CacheStore>,
    policy: Arc<StalenessPolicy>,
}

impl GarbageCollector {
    pub fn new(store: Arc<CacheStore>, policy: Arc<StalenessPolicy>) -> Self {
        Self { store, policy }
    }

    /// Evict expired, unobserved entries; returns how many were removed.
    ///
    /// Entries do not record which viewer mode fetched them, so retention
    /// uses the public-mode window - the longer one - for every entry.
    pub fn sweep(&self) -> usize {
        let evicted = self
            .store
            .sweep(|key| self.policy.retention_window(key.class(), ViewerMode::Public));
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted unobserved cache entries");
        }
        evicted.len()
    }

    /// Background sweep loop. Runs until the owning task is dropped.
    pub async fn run(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }
}
