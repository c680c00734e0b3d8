//! The ingestion pipeline: dedup, queueing, ordered processing, retries.
//!
//! The pipeline owns the event records and drives each through the state
//! machine. Processing itself is delegated to an [`EventProcessor`] (the
//! sync engine); the pipeline only decides *when* an event runs and what
//! happens to it afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use cadence_core::{EventId, ResourceKey, ResourceType, RetryPolicy};

use crate::error::Result;
use crate::metrics;

use super::dedup::{DEFAULT_RETENTION, DedupIndex};
use super::queue::{EnqueueOutcome, QueueConfig, ResourceQueues};
use super::{ProcessingStatus, WebhookEvent, WebhookEventType};

/// Applies one event's change to the canonical store.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Processes a single event.
    ///
    /// # Errors
    ///
    /// Retryable errors re-queue the event (up to the retry budget);
    /// permanent errors fail it immediately.
    async fn process(&self, event: &WebhookEvent) -> Result<()>;
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Dedup retention window.
    pub retention: Duration,
    /// Retry policy for failed processing.
    pub retry: RetryPolicy,
    /// Per-resource queue configuration.
    pub queue: QueueConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            retry: RetryPolicy::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// The wire shape of an inbound webhook delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    /// External delivery ID (dedup key).
    pub event_id: String,
    /// The announced change.
    pub event_type: WebhookEventType,
    /// Affected resource type.
    pub resource_type: ResourceType,
    /// Affected resource ID.
    pub resource_id: String,
    /// Raw payload (usually a snapshot of the changed record).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Tracker-side event timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of submitting a delivery to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted and durably queued.
    Accepted {
        /// Internal ID of the queued event.
        event_id: EventId,
    },
    /// Duplicate delivery within the retention window; discarded with no
    /// side effects.
    Duplicate,
    /// The resource's queue is full (Reject policy).
    Rejected {
        /// Suggested wait before the sender redelivers.
        retry_after: Duration,
    },
}

/// The webhook ingestion pipeline.
pub struct IngestPipeline {
    config: IngestConfig,
    dedup: DedupIndex,
    queues: Arc<ResourceQueues>,
    /// All events by internal ID (the event store).
    events: RwLock<HashMap<EventId, WebhookEvent>>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(config: IngestConfig) -> Self {
        let dedup = DedupIndex::new(config.retention);
        let queues = Arc::new(ResourceQueues::new(config.queue));
        Self {
            config,
            dedup,
            queues,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the underlying queues (worker wakeups, depth metrics).
    #[must_use]
    pub fn queues(&self) -> Arc<ResourceQueues> {
        Arc::clone(&self.queues)
    }

    /// Submits an inbound delivery: dedup check, then durable enqueue.
    ///
    /// Returns as soon as the event is queued; processing happens
    /// asynchronously. Duplicates are recorded as `Discarded` events with
    /// zero side effects on canonical data.
    ///
    /// # Errors
    ///
    /// Returns an error only on store-level failures.
    pub async fn submit(&self, envelope: WebhookEnvelope) -> Result<SubmitOutcome> {
        let resource = ResourceKey::new(envelope.resource_type, envelope.resource_id.clone());
        metrics::record_event_received(resource.resource_type.as_str());

        let fresh = self.dedup.check_and_record(&envelope.event_id).await;
        let mut event = WebhookEvent::new(
            envelope.event_id,
            envelope.event_type,
            resource,
            envelope.payload,
            envelope.timestamp,
        );

        if !fresh {
            tracing::debug!(
                external_event_id = %event.external_event_id,
                "Duplicate webhook delivery discarded"
            );
            metrics::record_event_discarded();
            event.processing_status = ProcessingStatus::Discarded;
            self.events.write().await.insert(event.id, event);
            return Ok(SubmitOutcome::Duplicate);
        }

        let event_id = event.id;
        self.events.write().await.insert(event_id, event.clone());

        match self.queues.enqueue(event).await {
            EnqueueOutcome::Enqueued { .. } => Ok(SubmitOutcome::Accepted { event_id }),
            EnqueueOutcome::EnqueuedWithWarning { depth } => {
                tracing::warn!(
                    depth,
                    soft_watermark = self.config.queue.soft_watermark,
                    "Ingest queue above soft watermark"
                );
                Ok(SubmitOutcome::Accepted { event_id })
            }
            EnqueueOutcome::Rejected { retry_after } => {
                // The slot was never taken; forget the dedup record so the
                // sender's redelivery is accepted.
                let mut events = self.events.write().await;
                if let Some(event) = events.remove(&event_id) {
                    self.dedup.forget(&event.external_event_id).await;
                }
                drop(events);
                Ok(SubmitOutcome::Rejected { retry_after })
            }
        }
    }

    /// Claims and processes one event, if any is ready.
    ///
    /// Returns the event's terminal (or re-queued) status, or `None` when
    /// no work was available. Worker loops call this repeatedly.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors only; per-event failures are recorded
    /// on the event.
    pub async fn process_next(
        &self,
        processor: &dyn EventProcessor,
    ) -> Result<Option<(EventId, ProcessingStatus)>> {
        let Some(mut event) = self.queues.claim_next().await else {
            return Ok(None);
        };
        let resource = event.resource.clone();

        event.processing_status = ProcessingStatus::Processing;
        self.record(&event).await;

        let outcome = processor.process(&event).await;

        let status = match outcome {
            Ok(()) => {
                event.processing_status = ProcessingStatus::Completed;
                event.error_message = None;
                metrics::record_event_processed("completed");
                ProcessingStatus::Completed
            }
            Err(err) if err.is_infrastructure() => {
                // Infrastructure failure: put the event back untouched and
                // surface the error to the batch level.
                event.processing_status = ProcessingStatus::Pending;
                self.record(&event).await;
                self.queues.requeue(event).await;
                self.queues.release(&resource).await;
                return Err(err);
            }
            Err(err) => {
                let retryable = err.is_retryable();
                event.error_message = Some(err.to_string());
                event.retry_count += 1;

                if retryable && event.retry_count < self.config.retry.max_attempts {
                    tracing::warn!(
                        external_event_id = %event.external_event_id,
                        retry_count = event.retry_count,
                        error = %event.error_message.as_deref().unwrap_or_default(),
                        "Event processing failed; will retry"
                    );
                    tokio::time::sleep(self.config.retry.jittered_delay_for(event.retry_count))
                        .await;
                    event.processing_status = ProcessingStatus::Pending;
                    self.record(&event).await;
                    self.queues.requeue(event).await;
                    self.queues.release(&resource).await;
                    return Ok(None);
                }

                // Retries exhausted (or permanent): surfaced, never
                // silently dropped.
                tracing::error!(
                    external_event_id = %event.external_event_id,
                    retry_count = event.retry_count,
                    error = %event.error_message.as_deref().unwrap_or_default(),
                    "Event processing failed permanently"
                );
                metrics::record_event_processed("failed");
                event.processing_status = ProcessingStatus::Failed;
                ProcessingStatus::Failed
            }
        };

        let event_id = event.id;
        self.record(&event).await;
        self.queues.release(&resource).await;
        Ok(Some((event_id, status)))
    }

    /// Returns an event by internal ID.
    pub async fn event(&self, id: EventId) -> Option<WebhookEvent> {
        self.events.read().await.get(&id).cloned()
    }

    /// Returns permanently failed events for operator inspection.
    pub async fn list_failed(&self) -> Vec<WebhookEvent> {
        let events = self.events.read().await;
        let mut failed: Vec<WebhookEvent> = events
            .values()
            .filter(|e| e.processing_status == ProcessingStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|e| e.id);
        failed
    }

    /// Prunes the dedup index and completed/discarded events older than
    /// the retention window.
    pub async fn prune(&self) -> usize {
        let pruned_ids = self.dedup.prune().await;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, e| {
            !matches!(
                e.processing_status,
                ProcessingStatus::Completed | ProcessingStatus::Discarded
            ) || e.received_at > cutoff
        });
        pruned_ids + before - events.len()
    }

    async fn record(&self, event: &WebhookEvent) {
        self.events.write().await.insert(event.id, event.clone());
    }
}

impl Default for IngestPipeline {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}
