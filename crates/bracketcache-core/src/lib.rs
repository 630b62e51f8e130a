//! Core library for bracketcache - the client-side read/write cache and
//! invalidation coordinator behind the tournament front end's admin and
//! public screens.
//!
//! The UI layer supplies a fetch function per resource class and a mutate
//! function (plus invalidation rules) per mutation kind; this crate owns
//! everything between those collaborators and the screens:
//!
//! - [`store::CacheStore`] - one entry per [`key::ResourceKey`], with data,
//!   fetch status, and timestamps
//! - [`policy::StalenessPolicy`] - freshness and retention windows per
//!   resource class and [`policy::ViewerMode`]
//! - [`fetch::FetchCoordinator`] - cache-or-fetch reads, stale-while-refetch
//!   serving, in-flight deduplication, retry-once
//! - [`mutation::MutationCoordinator`] - remote writes, invalidation
//!   fan-out on success, notification of the UI on either outcome
//! - [`invalidation::InvalidationGraph`] - the static mutation-kind to
//!   key-pattern table, validated at startup
//! - [`gc::GarbageCollector`] - eviction of unobserved entries past their
//!   retention window
//!
//! Everything is wired together by [`manager::CacheManager`], an explicit
//! owned instance - no globals - so tests run isolated caches side by side.
//! The cache is in-memory only and rebuilt from scratch on restart; the
//! remote API stays the single source of truth.

pub mod clock;
pub mod error;
pub mod fetch;
pub mod gc;
pub mod invalidation;
pub mod key;
pub mod manager;
pub mod mutation;
pub mod policy;
pub mod registry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApiError, CacheError};
pub use fetch::ReadResult;
pub use gc::{GarbageCollector, DEFAULT_SWEEP_INTERVAL};
pub use invalidation::{InvalidationContext, InvalidationGraph};
pub use key::{classes, KeyPattern, ParamValue, ResourceKey};
pub use manager::{CacheManager, CacheManagerBuilder};
pub use mutation::{MutationOutcome, MutationReport, MutationResult};
pub use policy::{ClassWindows, StalenessPolicy, ViewerMode};
pub use registry::{FetchFn, FetchParams, MutateFn, Registry};
pub use store::{CacheEntry, CacheStore, EntryStatus, StoreStats};
