//! Registration of external collaborators: one fetch function per resource
//! class, and one mutate function plus invalidation rules per mutation kind.
//!
//! The cache owns no transport. A fetcher receives the key's parameters and
//! returns the resource as JSON; a mutator receives the payload and returns
//! the remote result. Both are stored as boxed async closures so the UI
//! layer can register whatever HTTP client it already uses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ApiError;
use crate::key::{KeyPattern, ParamValue};

/// Parameters handed to a fetch function: the key's parameter mapping.
pub type FetchParams = BTreeMap<String, ParamValue>;

/// Injected read operation for one resource class.
pub type FetchFn =
    Arc<dyn Fn(FetchParams) -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

/// Injected write operation for one mutation kind.
pub type MutateFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

struct MutationSpec {
    mutate: MutateFn,
    rules: Vec<KeyPattern>,
}

/// Collaborator registrations, collected before building the manager.
#[derive(Default)]
pub struct Registry {
    fetchers: HashMap<String, FetchFn>,
    mutations: HashMap<String, MutationSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fetch function for a resource class.
    pub fn resource<F, Fut>(mut self, class: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(FetchParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        self.fetchers
            .insert(class.into(), Arc::new(move |params| Box::pin(fetch(params))));
        self
    }

    /// Register a mutation kind: its remote operation and the key patterns
    /// its success invalidates.
    pub fn mutation<F, Fut>(
        mut self,
        kind: impl Into<String>,
        mutate: F,
        rules: Vec<KeyPattern>,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        self.mutations.insert(
            kind.into(),
            MutationSpec {
                mutate: Arc::new(move |payload| Box::pin(mutate(payload))),
                rules,
            },
        );
        self
    }

    pub(crate) fn fetcher(&self, class: &str) -> Option<FetchFn> {
        self.fetchers.get(class).cloned()
    }

    pub(crate) fn mutate_fn(&self, kind: &str) -> Option<MutateFn> {
        self.mutations.get(kind).map(|spec| spec.mutate.clone())
    }

    /// Resource classes with a registered fetcher.
    pub fn known_classes(&self) -> HashSet<String> {
        self.fetchers.keys().cloned().collect()
    }

    /// The invalidation table declared across all registered mutations.
    pub(crate) fn invalidation_rules(&self) -> HashMap<String, Vec<KeyPattern>> {
        self.mutations
            .iter()
            .map(|(kind, spec)| (kind.clone(), spec.rules.clone()))
            .collect()
    }
}
