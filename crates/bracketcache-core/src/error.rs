//! Error types for remote operations and cache coordination.
//!
//! [`ApiError`] describes outcomes of the injected fetch/mutate functions and
//! is cloneable so one failure can fan out to every deduplicated reader.
//! [`CacheError`] covers registration and rule-resolution problems, which are
//! programming errors rather than runtime conditions.

use thiserror::Error;

/// Failure reported by an injected fetch or mutate function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Transport-level failure; no response was obtained.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success response from the remote API, optionally carrying a
    /// message suitable for display.
    #[error("server error: {}", message.as_deref().unwrap_or("no detail"))]
    Server { message: Option<String> },

    /// The payload was rejected before reaching the remote API.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ApiError {
    /// Message suitable for showing to a user, if the error carries one.
    ///
    /// Network failures never do; callers fall back to a generic message.
    pub fn display_message(&self) -> Option<&str> {
        match self {
            ApiError::Network(_) => None,
            ApiError::Server { message } => message.as_deref(),
            ApiError::Validation(message) => Some(message),
        }
    }
}

/// Coordination-level failure: a missing registration, an invalid rule, or
/// a remote failure propagated from a mutation.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no fetcher registered for resource class '{0}'")]
    UnknownResourceClass(String),

    #[error("no mutation registered for kind '{0}'")]
    UnknownMutationKind(String),

    #[error("invalidation rule for '{kind}' targets unregistered resource class '{class}'")]
    UnknownPatternClass { kind: String, class: String },

    #[error("pattern for class '{class}' needs context value '{name}', which was not supplied")]
    MissingContext { class: String, name: String },

    #[error("freshness window exceeds retention window for resource class '{0}'")]
    InvalidPolicy(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}
