//! Mutation coordinator: runs a write against the remote collaborator and,
//! on success, fans invalidation out across dependent cache entries.
//!
//! There is no optimistic update - the cache is only touched after the
//! remote operation resolves, and a failure leaves it exactly as it was.
//! Every mutation ends in a single notification to the UI layer, success or
//! failure. Mutations are never retried automatically; retry is a user
//! action.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::invalidation::{InvalidationContext, InvalidationGraph};
use crate::key::{ParamValue, ResourceKey};
use crate::registry::MutateFn;
use crate::store::CacheStore;

/// Shown when a failed mutation carries no displayable message.
const GENERIC_FAILURE_MESSAGE: &str = "The operation could not be completed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Success,
    Failure,
}

/// Terminal report of one mutation, handed to the notification hook.
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub kind: String,
    pub outcome: MutationOutcome,
    pub message: String,
}

/// Notification collaborator invoked once per mutation outcome.
pub type NotifyFn = Arc<dyn Fn(&MutationReport) + Send + Sync>;

/// Successful mutation: the remote result plus the keys staled by fan-out.
#[derive(Debug, Clone)]
pub struct MutationResult {
    pub result: Arc<Value>,
    pub invalidated: Vec<ResourceKey>,
}

pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    graph: Arc<InvalidationGraph>,
    notify: NotifyFn,
}

impl MutationCoordinator {
    pub fn new(store: Arc<CacheStore>, graph: Arc<InvalidationGraph>, notify: NotifyFn) -> Self {
        Self {
            store,
            graph,
            notify,
        }
    }

    /// Execute the mutation, invalidate on success, notify on either
    /// outcome. At most one outcome per invocation.
    pub async fn mutate(
        &self,
        kind: &str,
        payload: Value,
        mutate_fn: MutateFn,
    ) -> Result<MutationResult, CacheError> {
        debug!(kind, "mutation started");
        match mutate_fn(payload.clone()).await {
            Ok(result) => {
                let context = context_from(&payload, &result);
                let invalidated = self.graph.invalidate(kind, &context, &self.store)?;
                debug!(kind, invalidated = invalidated.len(), "mutation succeeded");

                let report = MutationReport {
                    kind: kind.to_string(),
                    outcome: MutationOutcome::Success,
                    message: success_message(kind, &result),
                };
                (self.notify)(&report);

                Ok(MutationResult {
                    result: Arc::new(result),
                    invalidated,
                })
            }
            Err(error) => {
                warn!(kind, error = %error, "mutation failed");
                let report = MutationReport {
                    kind: kind.to_string(),
                    outcome: MutationOutcome::Failure,
                    message: error
                        .display_message()
                        .unwrap_or(GENERIC_FAILURE_MESSAGE)
                        .to_string(),
                };
                (self.notify)(&report);
                Err(CacheError::Api(error))
            }
        }
    }
}

/// Context for pattern placeholders: top-level primitive fields of the
/// payload, overlaid with those of the result (the result wins, since the
/// server may have assigned identifiers the payload lacked).
fn context_from(payload: &Value, result: &Value) -> InvalidationContext {
    let mut context = InvalidationContext::new();
    collect_primitive_fields(payload, &mut context);
    collect_primitive_fields(result, &mut context);
    context
}

fn collect_primitive_fields(value: &Value, into: &mut InvalidationContext) {
    let Some(object) = value.as_object() else {
        return;
    };
    for (name, field) in object {
        let param = match field {
            Value::String(s) => ParamValue::Str(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => continue,
            },
            Value::Bool(b) => ParamValue::Bool(*b),
            _ => continue,
        };
        into.insert(name.clone(), param);
    }
}

fn success_message(kind: &str, result: &Value) -> String {
    result
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{kind} completed"))
}
