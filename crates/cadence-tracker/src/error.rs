//! Error taxonomy for the tracker client.
//!
//! The engine's retry and failure-marking decisions hinge on this
//! classification, so rate-limit and auth failures are typed variants
//! rather than strings: a `RateLimited` or `Transient` error is retried
//! with backoff, while `Auth` and `NotFound` mark the resource failed with
//! no retry.

use std::time::Duration;

/// The result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors surfaced by an [`IssueTrackerClient`](crate::IssueTrackerClient).
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The tracker's rate limit was hit.
    #[error("rate limited by tracker{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Server-suggested wait, when the response carried `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// Authentication or authorization failed.
    #[error("tracker authentication failed: {message}")]
    Auth {
        /// Description from the tracker response.
        message: String,
    },

    /// The requested resource does not exist on the tracker.
    #[error("tracker resource not found: {resource}")]
    NotFound {
        /// The resource that was requested.
        resource: String,
    },

    /// A transient failure: network error, timeout, or 5xx response.
    #[error("transient tracker error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The tracker returned a body the client could not interpret.
    #[error("invalid tracker response: {message}")]
    InvalidResponse {
        /// Description of what was malformed.
        message: String,
    },

    /// The client was misconfigured (bad base URL, empty token).
    #[error("tracker client configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl TrackerError {
    /// Creates a transient error with the given message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error with a source cause.
    #[must_use]
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns whether this error should be retried with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Returns whether this error is permanent (no retry; the resource is
    /// marked failed and surfaced to the operator queue).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::NotFound { .. })
    }
}
