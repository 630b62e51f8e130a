//! Invalidation graph: the static mapping from mutation kinds to the cache
//! keys their success invalidates.
//!
//! Rules are declared at registration time and validated at startup against
//! the set of registered resource classes, so a typo in a rule fails the
//! build of the manager instead of silently never invalidating anything.
//! Walking the graph is deterministic: resolve each pattern against the
//! mutation context, then mark every matching store entry stale.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, error};

use crate::error::CacheError;
use crate::key::{KeyPattern, ParamValue, ResourceKey};
use crate::store::CacheStore;

/// Context values available to pattern placeholders during one invalidation,
/// drawn from the mutation's payload and result.
pub type InvalidationContext = BTreeMap<String, ParamValue>;

/// Static `mutation kind -> key patterns` table.
pub struct InvalidationGraph {
    rules: HashMap<String, Vec<KeyPattern>>,
}

impl InvalidationGraph {
    pub fn new(rules: HashMap<String, Vec<KeyPattern>>) -> Self {
        Self { rules }
    }

    /// Check every rule pattern against the registered resource classes.
    pub fn validate(&self, known_classes: &HashSet<String>) -> Result<(), CacheError> {
        for (kind, patterns) in &self.rules {
            for pattern in patterns {
                if !known_classes.contains(pattern.class()) {
                    return Err(CacheError::UnknownPatternClass {
                        kind: kind.clone(),
                        class: pattern.class().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve and apply the rules for `kind`, returning every key marked
    /// stale. Idempotent: keys already stale (or absent) contribute nothing.
    ///
    /// An unknown kind means the mutation table and the graph disagree,
    /// which is a wiring bug - surfaced as an error, never swallowed.
    pub fn invalidate(
        &self,
        kind: &str,
        context: &InvalidationContext,
        store: &CacheStore,
    ) -> Result<Vec<ResourceKey>, CacheError> {
        let Some(patterns) = self.rules.get(kind) else {
            error!(kind, "no invalidation rules for mutation kind");
            return Err(CacheError::UnknownMutationKind(kind.to_string()));
        };

        let mut staled = Vec::new();
        for pattern in patterns {
            let resolved = pattern.resolve(context)?;
            let keys = store.mark_stale(&resolved);
            debug!(kind, pattern = %resolved, count = keys.len(), "invalidation fan-out");
            staled.extend(keys);
        }
        Ok(staled)
    }
}
