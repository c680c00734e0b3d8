//! Webhook event deduplication.
//!
//! External trackers redeliver webhooks; deduplication is the
//! correctness-critical gate at the front of the pipeline. The index
//! retains seen external event IDs for a bounded retention window
//! (default 24 hours) and prunes expired entries opportunistically.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Default retention window for seen event IDs (24 hours).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Index of recently seen external event IDs.
#[derive(Debug)]
pub struct DedupIndex {
    retention: chrono::Duration,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupIndex {
    /// Creates an index with the given retention window.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records `event_id` as seen now.
    ///
    /// Returns `true` when the ID is fresh (first delivery within the
    /// retention window) and `false` for a duplicate. An ID whose previous
    /// sighting has aged out of the window counts as fresh again.
    pub async fn check_and_record(&self, event_id: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().await;

        if let Some(first_seen) = seen.get(event_id) {
            if now - *first_seen < self.retention {
                return false;
            }
        }
        seen.insert(event_id.to_string(), now);
        true
    }

    /// Forgets a recorded ID.
    ///
    /// Used when an accepted delivery is subsequently rejected by the
    /// queue, so the sender's redelivery is not misclassified as a
    /// duplicate.
    pub async fn forget(&self, event_id: &str) {
        self.seen.lock().await.remove(event_id);
    }

    /// Removes entries older than the retention window.
    ///
    /// Returns the number of entries pruned.
    pub async fn prune(&self) -> usize {
        let now = Utc::now();
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, first_seen| now - *first_seen < self.retention);
        before - seen.len()
    }

    /// Returns the number of tracked IDs.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Returns whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
