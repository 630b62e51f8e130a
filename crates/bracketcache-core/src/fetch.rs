//! Fetch coordinator: serves reads from the store, refetches stale entries,
//! and deduplicates concurrent fetches for the same key.
//!
//! A read classifies the entry under the caller's freshness window:
//! fresh data is returned with no network call; stale-but-present data is
//! returned immediately while a refetch runs behind it; an entry with no
//! data suspends the caller until the fetch resolves. All fetches run in a
//! spawned task, so a caller abandoning its read never cancels the fetch -
//! the result still lands in the store for the next reader.
//!
//! Deduplication keeps one in-flight operation per key: later readers
//! subscribe to the same broadcast channel instead of fetching again, so N
//! concurrent reads cost exactly one request and observe one response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::ApiError;
use crate::key::ResourceKey;
use crate::policy::{StalenessPolicy, ViewerMode};
use crate::registry::FetchFn;
use crate::store::{CacheEntry, CacheStore, EntryStatus};

type FetchOutcome = Result<Arc<Value>, ApiError>;
type InFlightMap = HashMap<ResourceKey, broadcast::Sender<FetchOutcome>>;

/// What a caller observes for one read.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub data: Option<Arc<Value>>,
    pub status: EntryStatus,
    pub error: Option<ApiError>,
}

pub struct FetchCoordinator {
    store: Arc<CacheStore>,
    policy: Arc<StalenessPolicy>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Mutex<InFlightMap>>,
}

impl FetchCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        policy: Arc<StalenessPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            in_flight: Arc::new(Mutex::new(InFlightMap::new())),
        }
    }

    /// Read `key` under `mode`, fetching through `fetch_fn` as needed.
    ///
    /// Suspends only when there is no cached data to show; otherwise the
    /// caller gets an immediate answer and any refetch runs in the
    /// background.
    pub async fn read(&self, key: &ResourceKey, mode: ViewerMode, fetch_fn: FetchFn) -> ReadResult {
        let freshness = self.policy.freshness_window(key.class(), mode);
        let now = self.clock.now();

        if let Some(entry) = self.store.get(key) {
            if Self::is_fresh(&entry, now, freshness) {
                debug!(key = %key, mode = ?mode, "cache hit");
                return ReadResult {
                    data: entry.data,
                    status: EntryStatus::Fresh,
                    error: None,
                };
            }
            if let Some(data) = entry.data {
                // Stale-but-displayable: old data now, refetch behind it.
                debug!(key = %key, mode = ?mode, "serving stale data, refetching");
                self.ensure_fetch(key, fetch_fn);
                return ReadResult {
                    data: Some(data),
                    status: EntryStatus::Stale,
                    error: entry.error,
                };
            }
        }

        // Nothing displayable; the caller suspends on the in-flight fetch.
        let mut rx = self.attach(key, fetch_fn);
        if rx.recv().await.is_err() {
            warn!(key = %key, "in-flight fetch dropped without an outcome");
        }

        // Re-read rather than trusting the channel payload: the store holds
        // the latest state after any overlapping resolutions.
        match self.store.get(key) {
            Some(entry) => ReadResult {
                data: entry.data,
                status: entry.status,
                error: entry.error,
            },
            None => ReadResult {
                data: None,
                status: EntryStatus::Idle,
                error: None,
            },
        }
    }

    fn is_fresh(entry: &CacheEntry, now: chrono::DateTime<chrono::Utc>, freshness: chrono::Duration) -> bool {
        // A refetch in flight does not make the data it is replacing any
        // less fresh for readers inside their window.
        if !matches!(entry.status, EntryStatus::Fresh | EntryStatus::Fetching) {
            return false;
        }
        if entry.data.is_none() {
            return false;
        }
        match entry.last_fetched_at {
            Some(at) => now - at < freshness,
            None => false,
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlightMap> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a fetch for `key` unless one is already in flight.
    fn ensure_fetch(&self, key: &ResourceKey, fetch_fn: FetchFn) {
        let _ = self.attach(key, fetch_fn);
    }

    /// Subscribe to the in-flight fetch for `key`, starting one if needed.
    fn attach(&self, key: &ResourceKey, fetch_fn: FetchFn) -> broadcast::Receiver<FetchOutcome> {
        let mut in_flight = self.lock_in_flight();
        if let Some(tx) = in_flight.get(key) {
            debug!(key = %key, "joining in-flight fetch");
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(1);
        in_flight.insert(key.clone(), tx.clone());
        drop(in_flight);

        self.store.mark_fetching(key);

        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = Self::drive_fetch(&key, fetch_fn).await;
            match &outcome {
                Ok(data) => store.put(&key, Arc::clone(data)),
                Err(error) => store.mark_error(&key, error.clone()),
            }
            in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            // Every reader may have gone away by now; the store update above
            // is what matters.
            let _ = tx.send(outcome);
        });

        rx
    }

    /// Invoke the fetch function, retrying once with no backoff.
    async fn drive_fetch(key: &ResourceKey, fetch_fn: FetchFn) -> FetchOutcome {
        match fetch_fn(key.params().clone()).await {
            Ok(value) => Ok(Arc::new(value)),
            Err(first) => {
                debug!(key = %key, error = %first, "fetch failed, retrying once");
                match fetch_fn(key.params().clone()).await {
                    Ok(value) => Ok(Arc::new(value)),
                    Err(second) => {
                        warn!(key = %key, error = %second, "fetch failed after retry");
                        Err(second)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::key::classes;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio::task::yield_now;

    struct Fixture {
        coordinator: Arc<FetchCoordinator>,
        store: Arc<CacheStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(CacheStore::new(clock.clone()));
        let coordinator = Arc::new(FetchCoordinator::new(
            store.clone(),
            Arc::new(StalenessPolicy::standard()),
            clock.clone(),
        ));
        Fixture {
            coordinator,
            store,
            clock,
        }
    }

    fn counting_fetcher(calls: Arc<AtomicUsize>, value: Value) -> FetchFn {
        Arc::new(move |_params| {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    fn team_list(division: i64) -> ResourceKey {
        ResourceKey::new(classes::TEAM_LIST).with("divisionId", division)
    }

    /// Yield until the entry for `key` reaches `status`, or panic. The
    /// current-thread test runtime drives spawned fetch tasks between
    /// yields, so this settles deterministically.
    async fn wait_for_status(store: &CacheStore, key: &ResourceKey, status: EntryStatus) {
        for _ in 0..1000 {
            if store.get(key).map(|e| e.status) == Some(status) {
                return;
            }
            yield_now().await;
        }
        panic!("entry {key} never reached {status:?}");
    }

    #[tokio::test]
    async fn test_first_read_blocks_and_caches() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting_fetcher(calls.clone(), json!(["Sharks"]));

        let result = f
            .coordinator
            .read(&team_list(5), ViewerMode::Public, fetcher)
            .await;

        assert_eq!(result.status, EntryStatus::Fresh);
        assert_eq!(result.data.as_deref(), Some(&json!(["Sharks"])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_read_hits_cache_without_fetch() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting_fetcher(calls.clone(), json!(["Sharks"]));
        let key = team_list(5);

        let first = f
            .coordinator
            .read(&key, ViewerMode::Public, fetcher.clone())
            .await;
        f.clock.advance(Duration::seconds(1));
        let second = f.coordinator.read(&key, ViewerMode::Public, fetcher).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.status, EntryStatus::Fresh);
        // Same allocation, not just equal data.
        assert!(Arc::ptr_eq(
            first.data.as_ref().unwrap(),
            second.data.as_ref().unwrap()
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reads_deduplicate() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let key = team_list(5);

        let fetcher: FetchFn = {
            let calls = calls.clone();
            let gate = gate.clone();
            Arc::new(move |_params| {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(json!(["Sharks"]))
                })
            })
        };

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = f.coordinator.clone();
            let key = key.clone();
            let fetcher = fetcher.clone();
            handles.push(tokio::spawn(async move {
                coordinator.read(&key, ViewerMode::Public, fetcher).await
            }));
            yield_now().await;
        }

        // All three readers are parked on the same in-flight fetch.
        for _ in 0..10 {
            yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.status, EntryStatus::Fresh);
            assert_eq!(result.data.as_deref(), Some(&json!(["Sharks"])));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_retries_once_then_errors() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = team_list(5);

        let fetcher: FetchFn = {
            let calls = calls.clone();
            Arc::new(move |_params| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(ApiError::Network("refused".to_string())) })
            })
        };

        let result = f
            .coordinator
            .read(&key, ViewerMode::Public, fetcher.clone())
            .await;
        assert_eq!(result.status, EntryStatus::Error);
        assert!(result.data.is_none());
        assert_eq!(
            result.error,
            Some(ApiError::Network("refused".to_string()))
        );
        // One attempt plus exactly one automatic retry.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // No background retry loop; the next explicit read tries again.
        let result = f.coordinator.read(&key, ViewerMode::Public, fetcher).await;
        assert_eq!(result.status, EntryStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetcher: FetchFn = {
            let calls = calls.clone();
            Arc::new(move |_params| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if attempt == 0 {
                        Err(ApiError::Network("blip".to_string()))
                    } else {
                        Ok(json!(["Sharks"]))
                    }
                })
            })
        };

        let result = f
            .coordinator
            .read(&team_list(5), ViewerMode::Public, fetcher)
            .await;
        assert_eq!(result.status, EntryStatus::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_served_while_refetching() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = team_list(5);

        let fetcher: FetchFn = {
            let calls = calls.clone();
            Arc::new(move |_params| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(json!([format!("roster-v{attempt}")])) })
            })
        };

        let first = f
            .coordinator
            .read(&key, ViewerMode::Public, fetcher.clone())
            .await;
        assert_eq!(first.data.as_deref(), Some(&json!(["roster-v0"])));

        // Past the team-list freshness window.
        f.clock.advance(Duration::seconds(31));

        let second = f
            .coordinator
            .read(&key, ViewerMode::Public, fetcher.clone())
            .await;
        assert_eq!(second.status, EntryStatus::Stale);
        assert_eq!(second.data.as_deref(), Some(&json!(["roster-v0"])));

        wait_for_status(&f.store, &key, EntryStatus::Fresh).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let entry = f.store.get(&key).unwrap();
        assert_eq!(entry.data.as_deref(), Some(&json!(["roster-v1"])));
    }

    #[tokio::test]
    async fn test_admin_read_always_refetches() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counting_fetcher(calls.clone(), json!(["Sharks"]));
        let key = team_list(5);

        f.coordinator
            .read(&key, ViewerMode::Public, fetcher.clone())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Immediately afterwards, well inside the public window.
        let admin = f
            .coordinator
            .read(&key, ViewerMode::Admin, fetcher.clone())
            .await;
        assert_eq!(admin.status, EntryStatus::Stale);
        assert!(admin.data.is_some());

        wait_for_status(&f.store, &key, EntryStatus::Fresh).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_admin_read_joins_in_flight_fetch() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let key = team_list(5);

        // Seed the cache so admin reads take the background-refetch path.
        let seed = counting_fetcher(calls.clone(), json!(["Sharks"]));
        f.coordinator
            .read(&key, ViewerMode::Public, seed)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let gated: FetchFn = {
            let calls = calls.clone();
            let gate = gate.clone();
            Arc::new(move |_params| {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(json!(["Sharks", "Jets"]))
                })
            })
        };

        // Two admin reads while the refetch is held open: both return the
        // cached data and only one underlying fetch starts.
        let first = f
            .coordinator
            .read(&key, ViewerMode::Admin, gated.clone())
            .await;
        yield_now().await;
        let second = f.coordinator.read(&key, ViewerMode::Admin, gated).await;

        assert_eq!(first.status, EntryStatus::Stale);
        assert_eq!(second.status, EntryStatus::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        gate.add_permits(1);
        wait_for_status(&f.store, &key, EntryStatus::Fresh).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_read_still_lands_in_store() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let key = team_list(5);

        let gated: FetchFn = {
            let calls = calls.clone();
            let gate = gate.clone();
            Arc::new(move |_params| {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(json!(["Sharks"]))
                })
            })
        };

        let handle = {
            let coordinator = f.coordinator.clone();
            let key = key.clone();
            tokio::spawn(async move { coordinator.read(&key, ViewerMode::Public, gated).await })
        };
        yield_now().await;
        // The caller navigates away mid-fetch.
        handle.abort();

        gate.add_permits(1);
        wait_for_status(&f.store, &key, EntryStatus::Fresh).await;
        assert_eq!(f.store.get(&key).unwrap().data.as_deref(), Some(&json!(["Sharks"])));
    }
}
