//! Staleness policy: freshness and retention windows per resource class
//! and viewer mode.
//!
//! Administrative viewers always see a freshness window of zero - an admin
//! acting on stale state would corrupt the tournament - while public viewers
//! trade a bounded amount of staleness for request volume. Retention windows
//! are decoupled from freshness so a briefly unmounted screen does not throw
//! its data away.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::Serialize;

use crate::error::CacheError;
use crate::key::classes;

/// Caller classification selecting the staleness tolerance for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerMode {
    Admin,
    Public,
}

/// Fast-moving resources: live match results and standings.
const VOLATILE_FRESHNESS_SECS: i64 = 15;
const VOLATILE_RETENTION_SECS: i64 = 120;

/// Rosters change during check-in but not minute to minute.
const ROSTER_FRESHNESS_SECS: i64 = 30;
const ROSTER_RETENTION_SECS: i64 = 180;

/// Division metadata is close to static during an event.
const STATIC_FRESHNESS_SECS: i64 = 60;
const STATIC_RETENTION_SECS: i64 = 300;

/// Admin reads are always refetched; retention only covers brief unmounts.
const ADMIN_RETENTION_SECS: i64 = 60;

/// Freshness and retention windows for one resource class under public mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassWindows {
    pub freshness: Duration,
    pub retention: Duration,
}

impl ClassWindows {
    pub fn new(freshness: Duration, retention: Duration) -> Self {
        Self {
            freshness,
            retention,
        }
    }

    fn seconds(freshness: i64, retention: i64) -> Self {
        Self::new(Duration::seconds(freshness), Duration::seconds(retention))
    }
}

/// Pure mapping of (resource class, viewer mode) to freshness and retention
/// windows. Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct StalenessPolicy {
    class_windows: BTreeMap<String, ClassWindows>,
    default_windows: ClassWindows,
    admin_retention: Duration,
}

impl StalenessPolicy {
    /// Windows for the tournament resource classes this front end serves.
    pub fn standard() -> Self {
        let mut class_windows = BTreeMap::new();
        let volatile = ClassWindows::seconds(VOLATILE_FRESHNESS_SECS, VOLATILE_RETENTION_SECS);
        let roster = ClassWindows::seconds(ROSTER_FRESHNESS_SECS, ROSTER_RETENTION_SECS);
        let stable = ClassWindows::seconds(STATIC_FRESHNESS_SECS, STATIC_RETENTION_SECS);

        class_windows.insert(classes::MATCH_LIST.to_string(), volatile);
        class_windows.insert(classes::STANDINGS.to_string(), volatile);
        class_windows.insert(classes::TEAM_LIST.to_string(), roster);
        class_windows.insert(classes::POOL_LIST.to_string(), roster);
        class_windows.insert(classes::DIVISION.to_string(), stable);
        class_windows.insert(classes::DIVISION_LIST.to_string(), stable);

        Self {
            class_windows,
            default_windows: roster,
            admin_retention: Duration::seconds(ADMIN_RETENTION_SECS),
        }
    }

    /// Override or extend the windows for one resource class.
    pub fn with_class(mut self, class: impl Into<String>, windows: ClassWindows) -> Self {
        self.class_windows.insert(class.into(), windows);
        self
    }

    fn windows(&self, class: &str) -> ClassWindows {
        self.class_windows
            .get(class)
            .copied()
            .unwrap_or(self.default_windows)
    }

    /// How long after a fetch cached data is served without a network call.
    pub fn freshness_window(&self, class: &str, mode: ViewerMode) -> Duration {
        match mode {
            ViewerMode::Admin => Duration::zero(),
            ViewerMode::Public => self.windows(class).freshness,
        }
    }

    /// How long an unobserved entry survives before eviction.
    pub fn retention_window(&self, class: &str, mode: ViewerMode) -> Duration {
        match mode {
            ViewerMode::Admin => self.admin_retention,
            ViewerMode::Public => self.windows(class).retention,
        }
    }

    /// Enforce `freshness <= retention` for every class in both modes, so an
    /// entry can never be evicted while still considered fresh.
    pub fn validate(&self) -> Result<(), CacheError> {
        if Duration::zero() > self.admin_retention {
            return Err(CacheError::InvalidPolicy("<admin>".to_string()));
        }
        for (class, windows) in &self.class_windows {
            if windows.freshness > windows.retention {
                return Err(CacheError::InvalidPolicy(class.clone()));
            }
        }
        if self.default_windows.freshness > self.default_windows.retention {
            return Err(CacheError::InvalidPolicy("<default>".to_string()));
        }
        Ok(())
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
