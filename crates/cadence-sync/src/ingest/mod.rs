//! Webhook ingestion pipeline.
//!
//! State machine per event:
//!
//! ```text
//! received ──> dedup-check ──> {discarded | queued}
//!                                   │
//!                                   ▼
//!                              processing ──> {completed | failed ──> retry | failed (permanent)}
//! ```
//!
//! Guarantees:
//! - An `event_id` already seen within the retention window is discarded
//!   with zero side effects (external systems redeliver).
//! - Events for one resource apply strictly serialized, ordered by the
//!   tracker-side event timestamp; different resources process
//!   concurrently.
//! - Queues are bounded; producers block or are rejected (configurable)
//!   rather than buffering without limit.
//! - Events that exhaust their retries are marked failed and stay
//!   queryable; nothing is silently dropped.

pub mod dedup;
pub mod pipeline;
pub mod queue;
pub mod signature;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{EventId, ResourceKey};

pub use dedup::DedupIndex;
pub use pipeline::{EventProcessor, IngestConfig, IngestPipeline, SubmitOutcome, WebhookEnvelope};
pub use queue::{EnqueueOutcome, OverflowPolicy, QueueConfig, ResourceQueues};
pub use signature::{SIGNATURE_HEADER, sign_payload, verify_signature};

/// Processing status of an ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Queued, not yet picked up.
    Pending,
    /// A worker is applying it now.
    Processing,
    /// Applied successfully.
    Completed,
    /// Retries exhausted; surfaced for operator inspection.
    Failed,
    /// Duplicate delivery; dropped with no side effects.
    Discarded,
}

/// The type of change a webhook announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// A resource was created.
    ResourceCreated,
    /// A resource was updated.
    ResourceUpdated,
    /// A resource was deleted.
    ResourceDeleted,
}

/// An inbound notification, immutable once recorded; only the ingestion
/// pipeline mutates its processing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Internal event ID.
    pub id: EventId,

    /// The external delivery ID; the deduplication key.
    pub external_event_id: String,

    /// The announced change.
    pub event_type: WebhookEventType,

    /// The affected resource.
    pub resource: ResourceKey,

    /// The raw payload (often a snapshot of the changed record).
    pub payload: serde_json::Value,

    /// Tracker-side event timestamp; the per-resource ordering key.
    pub occurred_at: DateTime<Utc>,

    /// When this service received the event.
    pub received_at: DateTime<Utc>,

    /// Current processing status.
    pub processing_status: ProcessingStatus,

    /// Number of processing attempts so far.
    pub retry_count: u32,

    /// Error from the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WebhookEvent {
    /// Creates a pending event from delivery fields.
    #[must_use]
    pub fn new(
        external_event_id: impl Into<String>,
        event_type: WebhookEventType,
        resource: ResourceKey,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            external_event_id: external_event_id.into(),
            event_type,
            resource,
            payload,
            occurred_at,
            received_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
            retry_count: 0,
            error_message: None,
        }
    }
}
