//! Error types for the sync engine.
//!
//! The propagation policy follows the error taxonomy: errors scoped to a
//! single resource (external failures, validation, conflicts) never abort a
//! batch, while infrastructure errors (store, lease plumbing) do and are
//! retried at the batch level. [`SyncError::is_infrastructure`] encodes the
//! distinction.

use cadence_core::{ConflictId, ResourceKey};
use cadence_tracker::TrackerError;

use crate::mapping::FieldMappingError;

/// The result type used throughout cadence-sync.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A retryable external failure (network, 5xx, rate limit) that
    /// survived the retry policy.
    #[error("transient external error: {message}")]
    TransientExternal {
        /// Description of the failure.
        message: String,
    },

    /// A permanent external failure (auth, missing resource); the resource
    /// is marked failed with no retry.
    #[error("permanent external error: {message}")]
    PermanentExternal {
        /// Description of the failure.
        message: String,
    },

    /// Field mapping / validation failed for a record.
    #[error(transparent)]
    Validation(#[from] FieldMappingError),

    /// The resource has a conflict pending manual resolution; its pipeline
    /// is halted until an operator resolves it.
    #[error("conflict {conflict_id} pending manual resolution for {resource}")]
    ConflictPending {
        /// The pending conflict.
        conflict_id: ConflictId,
        /// The halted resource.
        resource: ResourceKey,
    },

    /// Another worker holds the sync lease for this resource.
    #[error("sync lease for {resource} held by {holder}")]
    LeaseHeld {
        /// The contested resource.
        resource: ResourceKey,
        /// The current holder.
        holder: String,
    },

    /// A webhook queue rejected an event because it is at capacity.
    #[error("ingest queue full for {resource}")]
    QueueFull {
        /// The resource whose queue overflowed.
        resource: ResourceKey,
    },

    /// A sync state store operation failed.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An error from cadence-core (lease store, hashing).
    #[error("core error: {0}")]
    Core(#[from] cadence_core::Error),
}

impl SyncError {
    /// Creates a new store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new store error with a source.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns whether this error is infrastructure-level.
    ///
    /// Infrastructure errors abort the batch; everything else is isolated
    /// to the resource that produced it.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Core(_))
    }

    /// Returns whether this error should be retried with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. } | Self::LeaseHeld { .. })
    }
}

impl From<TrackerError> for SyncError {
    fn from(value: TrackerError) -> Self {
        if value.is_permanent() {
            Self::PermanentExternal {
                message: value.to_string(),
            }
        } else {
            Self::TransientExternal {
                message: value.to_string(),
            }
        }
    }
}
