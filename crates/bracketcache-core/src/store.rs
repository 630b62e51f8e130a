//! The cache store: one entry per resource key, with a small status machine.
//!
//! The store is the single shared mutable resource of the crate. Every
//! operation is synchronous and takes the internal lock only for its own
//! duration - the lock is never held across an await, so overlapping fetches
//! re-read the store after resolving and last-writer-wins applies only to
//! sequential resolutions.
//!
//! `get` returns a snapshot clone of the entry, never a reference into the
//! map; reading an absent key returns `None` rather than an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::ApiError;
use crate::key::{ResolvedPattern, ResourceKey};

/// Fetch status of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Created but never fetched.
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// Data was fetched and has not been invalidated.
    Fresh,
    /// Data is present but no longer trusted; displayable while refetching.
    Stale,
    /// The last fetch failed; any previous data is still displayable.
    Error,
}

/// State of one cached resource. Owned exclusively by the [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Option<Arc<Value>>,
    pub status: EntryStatus,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub error: Option<ApiError>,
    pub observer_count: usize,
}

impl CacheEntry {
    fn idle() -> Self {
        Self {
            data: None,
            status: EntryStatus::Idle,
            last_fetched_at: None,
            error: None,
            observer_count: 0,
        }
    }

    /// Time since the last successful fetch, for status-line display.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_fetched_at.map(|at| now - at)
    }
}

/// Aggregate store counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub idle: usize,
    pub fetching: usize,
    pub fresh: usize,
    pub stale: usize,
    pub error: usize,
}

/// Key/value store over cache entries.
pub struct CacheStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<ResourceKey, CacheEntry>>,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the entry for `key`, if one exists.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    /// Record a successful fetch: fresh status, new timestamp, error cleared.
    pub fn put(&self, key: &ResourceKey, data: Arc<Value>) {
        let now = self.clock.now();
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(CacheEntry::idle);
        entry.data = Some(data);
        entry.status = EntryStatus::Fresh;
        entry.last_fetched_at = Some(now);
        entry.error = None;
        debug!(key = %key, "cache entry updated");
    }

    /// Transition the entry (creating it if absent) to `Fetching`. Existing
    /// data stays in place so it remains displayable during the refetch.
    pub fn mark_fetching(&self, key: &ResourceKey) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(CacheEntry::idle);
        entry.status = EntryStatus::Fetching;
    }

    /// Record a failed fetch. Previous data, if any, stays displayable.
    pub fn mark_error(&self, key: &ResourceKey, error: ApiError) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(CacheEntry::idle);
        entry.status = EntryStatus::Error;
        entry.error = Some(error);
    }

    /// Mark every entry matching `pattern` stale, returning the keys that
    /// transitioned. Only `Fresh` and `Error` entries transition; data is
    /// retained (stale-but-displayable). Invalidating already-stale or
    /// absent keys is a no-op, so the operation is idempotent.
    pub fn mark_stale(&self, pattern: &ResolvedPattern) -> Vec<ResourceKey> {
        let mut entries = self.lock();
        let mut staled = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !pattern.matches(key) {
                continue;
            }
            if matches!(entry.status, EntryStatus::Fresh | EntryStatus::Error) {
                entry.status = EntryStatus::Stale;
                staled.push(key.clone());
            }
        }
        staled
    }

    /// Register an active observer of `key`, creating an idle entry if none
    /// exists yet.
    pub fn subscribe(&self, key: &ResourceKey) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(CacheEntry::idle);
        entry.observer_count += 1;
    }

    /// Drop one observer of `key`. Clamped at zero; going below is a caller
    /// bug worth logging but not worth corrupting the count over.
    pub fn unsubscribe(&self, key: &ResourceKey) {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.observer_count > 0 => entry.observer_count -= 1,
            Some(_) => warn!(key = %key, "unsubscribe without matching subscribe"),
            None => warn!(key = %key, "unsubscribe for absent entry"),
        }
    }

    /// Evict entries with no observers whose retention window has elapsed.
    ///
    /// Entries that never completed a fetch are evicted as soon as they are
    /// unobserved, except while a fetch is in flight - the in-flight result
    /// always needs a home to land in.
    pub fn sweep(&self, retention_for: impl Fn(&ResourceKey) -> Duration) -> Vec<ResourceKey> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let mut evicted = Vec::new();
        entries.retain(|key, entry| {
            if entry.observer_count > 0 || entry.status == EntryStatus::Fetching {
                return true;
            }
            let expired = match entry.last_fetched_at {
                Some(at) => now - at > retention_for(key),
                None => true,
            };
            if expired {
                evicted.push(key.clone());
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self.lock();
        let mut stats = StoreStats {
            entries: entries.len(),
            ..StoreStats::default()
        };
        for entry in entries.values() {
            match entry.status {
                EntryStatus::Idle => stats.idle += 1,
                EntryStatus::Fetching => stats.fetching += 1,
                EntryStatus::Fresh => stats.fresh += 1,
                EntryStatus::Stale => stats.stale += 1,
                EntryStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}
