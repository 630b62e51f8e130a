//! The cache manager: one owned instance wiring the store, policy,
//! invalidation graph, and coordinators behind the public read/mutate
//! surface.
//!
//! Built explicitly via [`CacheManager::builder`] - never a module-level
//! singleton - so tests and embedded uses can run as many isolated
//! instances as they like. Building validates the staleness policy and
//! checks every invalidation rule against the registered resource classes,
//! so mis-wired rules fail at startup instead of silently never firing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::fetch::{FetchCoordinator, ReadResult};
use crate::gc::GarbageCollector;
use crate::invalidation::InvalidationGraph;
use crate::key::ResourceKey;
use crate::mutation::{MutationCoordinator, MutationReport, MutationResult, NotifyFn};
use crate::policy::{StalenessPolicy, ViewerMode};
use crate::registry::Registry;
use crate::store::{CacheEntry, CacheStore, StoreStats};

pub struct CacheManagerBuilder {
    registry: Registry,
    policy: StalenessPolicy,
    clock: Arc<dyn Clock>,
    notify: NotifyFn,
}

impl CacheManagerBuilder {
    fn new(registry: Registry) -> Self {
        Self {
            registry,
            policy: StalenessPolicy::standard(),
            clock: Arc::new(SystemClock),
            notify: Arc::new(|_report| {}),
        }
    }

    pub fn policy(mut self, policy: StalenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Notification collaborator, called once per mutation outcome.
    pub fn on_mutation(mut self, notify: impl Fn(&MutationReport) + Send + Sync + 'static) -> Self {
        self.notify = Arc::new(notify);
        self
    }

    pub fn build(self) -> Result<CacheManager, CacheError> {
        self.policy.validate()?;

        let graph = Arc::new(InvalidationGraph::new(self.registry.invalidation_rules()));
        graph.validate(&self.registry.known_classes())?;

        let store = Arc::new(CacheStore::new(Arc::clone(&self.clock)));
        let policy = Arc::new(self.policy);
        let fetch = FetchCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&policy),
            Arc::clone(&self.clock),
        );
        let mutation = MutationCoordinator::new(Arc::clone(&store), graph, self.notify);
        let gc = GarbageCollector::new(Arc::clone(&store), policy);

        Ok(CacheManager {
            registry: self.registry,
            store,
            fetch,
            mutation,
            gc,
        })
    }
}

/// Facade over the cache subsystem; see the crate docs for the data flow.
pub struct CacheManager {
    registry: Registry,
    store: Arc<CacheStore>,
    fetch: FetchCoordinator,
    mutation: MutationCoordinator,
    gc: GarbageCollector,
}

impl CacheManager {
    pub fn builder(registry: Registry) -> CacheManagerBuilder {
        CacheManagerBuilder::new(registry)
    }

    /// Read one resource under the caller's viewer mode.
    ///
    /// Reading a class with no registered fetcher is a wiring bug and fails
    /// loudly rather than returning an empty result.
    pub async fn read(
        &self,
        key: &ResourceKey,
        mode: ViewerMode,
    ) -> Result<ReadResult, CacheError> {
        let fetch_fn = self.registry.fetcher(key.class()).ok_or_else(|| {
            error!(class = key.class(), "read of unregistered resource class");
            CacheError::UnknownResourceClass(key.class().to_string())
        })?;
        Ok(self.fetch.read(key, mode, fetch_fn).await)
    }

    /// Run one mutation; on success dependent cache entries are already
    /// stale by the time this returns.
    pub async fn mutate(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<MutationResult, CacheError> {
        let mutate_fn = self.registry.mutate_fn(kind).ok_or_else(|| {
            error!(kind, "mutation of unregistered kind");
            CacheError::UnknownMutationKind(kind.to_string())
        })?;
        self.mutation.mutate(kind, payload, mutate_fn).await
    }

    /// Register an active observer of `key` (a mounted screen).
    pub fn subscribe(&self, key: &ResourceKey) {
        self.store.subscribe(key);
    }

    pub fn unsubscribe(&self, key: &ResourceKey) {
        self.store.unsubscribe(key);
    }

    /// Lazy garbage collection; returns how many entries were evicted.
    pub fn sweep(&self) -> usize {
        self.gc.sweep()
    }

    /// Spawn the background sweep loop. Dropping the handle's task (or
    /// aborting it) stops collection; lazy sweeps still work.
    pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
        let gc = self.gc.clone();
        tokio::spawn(gc.run(every))
    }

    /// Snapshot of one entry, for status lines and debugging.
    pub fn entry(&self, key: &ResourceKey) -> Option<CacheEntry> {
        self.store.get(key)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}
