//! Bounded per-resource event queues.
//!
//! Each resource gets its own FIFO queue, ordered by the tracker-side
//! event timestamp (arrival order breaks ties). Workers claim one event at
//! a time and a resource is claimed by at most one worker, so processing
//! within a resource is strictly serialized while different resources
//! proceed concurrently.
//!
//! Admission is two-stage: a soft watermark emits a lag warning, the hard
//! capacity either blocks the producer or rejects the event, per the
//! configured [`OverflowPolicy`]. Unbounded buffering is never an option.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use cadence_core::ResourceKey;

use super::WebhookEvent;

/// What to do when a resource's queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The producer waits for space (embedded/poller producers).
    Block,
    /// The producer is rejected with a retry hint (HTTP webhook endpoint,
    /// where the sender redelivers).
    Reject,
}

/// Queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Hard per-resource capacity.
    pub capacity: usize,
    /// Soft watermark; crossing it warns but still accepts.
    pub soft_watermark: usize,
    /// Behavior at the hard capacity.
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            soft_watermark: 800,
            overflow: OverflowPolicy::Reject,
        }
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Enqueued below the soft watermark.
    Enqueued {
        /// Queue depth after the insert.
        depth: usize,
    },
    /// Enqueued above the soft watermark; ingestion is lagging.
    EnqueuedWithWarning {
        /// Queue depth after the insert.
        depth: usize,
    },
    /// Rejected at hard capacity (`Reject` policy only).
    Rejected {
        /// Suggested producer wait before retrying.
        retry_after: Duration,
    },
}

impl EnqueueOutcome {
    /// Returns true if the event was accepted.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. } | Self::EnqueuedWithWarning { .. })
    }
}

/// Internal queue state protected by a single lock.
#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<ResourceKey, VecDeque<WebhookEvent>>,
    /// Resources currently claimed by a worker.
    busy: HashSet<ResourceKey>,
}

/// Per-resource bounded FIFO queues with claim-based serialization.
#[derive(Debug)]
pub struct ResourceQueues {
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Signalled when work is added or a resource is released.
    work: Notify,
    /// Signalled when space frees up (for `Block` producers).
    space: Notify,
}

impl ResourceQueues {
    /// Creates queues with the given configuration.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            work: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Returns the queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueues an event for its resource.
    ///
    /// With `Block` overflow the call waits for space; with `Reject` it
    /// returns [`EnqueueOutcome::Rejected`] immediately.
    pub async fn enqueue(&self, event: WebhookEvent) -> EnqueueOutcome {
        loop {
            {
                let mut state = self.state.lock().await;
                let queue = state.queues.entry(event.resource.clone()).or_default();

                if queue.len() < self.config.capacity {
                    insert_by_timestamp(queue, event);
                    let depth = queue.len();
                    drop(state);
                    self.work.notify_waiters();

                    return if depth > self.config.soft_watermark {
                        EnqueueOutcome::EnqueuedWithWarning { depth }
                    } else {
                        EnqueueOutcome::Enqueued { depth }
                    };
                }

                if self.config.overflow == OverflowPolicy::Reject {
                    return EnqueueOutcome::Rejected {
                        retry_after: Duration::from_secs(5),
                    };
                }
            }

            // Block policy: wait for a worker to drain something.
            self.space.notified().await;
        }
    }

    /// Claims the next processable event: the earliest-timestamp event of
    /// some resource that is not currently claimed.
    ///
    /// The claimed resource stays busy until [`release`](Self::release) is
    /// called, which is what serializes processing per resource.
    pub async fn claim_next(&self) -> Option<WebhookEvent> {
        let mut state = self.state.lock().await;

        let resource = state
            .queues
            .iter()
            .filter(|(resource, queue)| !queue.is_empty() && !state.busy.contains(*resource))
            .map(|(resource, _)| resource.clone())
            .next()?;

        let event = state
            .queues
            .get_mut(&resource)
            .and_then(VecDeque::pop_front)?;
        state.busy.insert(resource);
        drop(state);
        self.space.notify_waiters();
        Some(event)
    }

    /// Releases a claimed resource so its next event can be processed.
    pub async fn release(&self, resource: &ResourceKey) {
        let mut state = self.state.lock().await;
        state.busy.remove(resource);
        let has_more = state.queues.get(resource).is_some_and(|q| !q.is_empty());
        drop(state);
        if has_more {
            self.work.notify_waiters();
        }
    }

    /// Re-queues an event at its timestamp position (retry path). Bypasses
    /// capacity: a retried event already held a slot.
    pub async fn requeue(&self, event: WebhookEvent) {
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(event.resource.clone()).or_default();
        insert_by_timestamp(queue, event);
        drop(state);
        self.work.notify_waiters();
    }

    /// Waits until work may be available.
    pub async fn wait_for_work(&self) {
        self.work.notified().await;
    }

    /// Returns the queue depth for one resource.
    pub async fn depth(&self, resource: &ResourceKey) -> usize {
        let state = self.state.lock().await;
        state.queues.get(resource).map_or(0, VecDeque::len)
    }

    /// Returns the total queued event count across resources.
    pub async fn total_depth(&self) -> usize {
        let state = self.state.lock().await;
        state.queues.values().map(VecDeque::len).sum()
    }
}

impl Default for ResourceQueues {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

/// Inserts maintaining ascending `occurred_at` order; ties keep arrival
/// order (insert after equal timestamps).
fn insert_by_timestamp(queue: &mut VecDeque<WebhookEvent>, event: WebhookEvent) {
    let position = queue
        .iter()
        .rposition(|existing| existing.occurred_at <= event.occurred_at)
        .map_or(0, |i| i + 1);
    queue.insert(position, event);
}
