//! In-memory tracker fake for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no real tracker
//! - **Single-process only**
//! - Failure injection is a simple "fail the next N calls" counter

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use cadence_core::{ResourceKey, ResourceType};

use crate::client::IssueTrackerClient;
use crate::error::{Result, TrackerError};
use crate::raw::{ChangeCursor, RawIssue, RawRecord};

/// Internal fake state protected by a single lock.
#[derive(Default)]
struct TrackerState {
    records: HashMap<ResourceKey, RawRecord>,
    sprint_issues: HashMap<(String, String), Vec<RawIssue>>,
    fail_next: u32,
    fail_with: Option<fn() -> TrackerError>,
}

/// In-memory tracker fake.
///
/// Seeded with records by tests; supports injecting failures for the next
/// N calls and counts every API call for quota assertions.
#[derive(Default)]
pub struct InMemoryTracker {
    state: RwLock<TrackerState>,
    calls: AtomicU64,
}

impl std::fmt::Debug for InMemoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTracker")
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl InMemoryTracker {
    /// Creates an empty fake tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub async fn put_record(&self, record: RawRecord) {
        let mut state = self.state.write().await;
        state.records.insert(record.key(), record);
    }

    /// Removes a record.
    pub async fn remove_record(&self, key: &ResourceKey) {
        let mut state = self.state.write().await;
        state.records.remove(key);
    }

    /// Sets the issues returned for a board's sprint.
    pub async fn put_sprint_issues(
        &self,
        board_id: impl Into<String>,
        sprint_id: impl Into<String>,
        issues: Vec<RawIssue>,
    ) {
        let mut state = self.state.write().await;
        state
            .sprint_issues
            .insert((board_id.into(), sprint_id.into()), issues);
    }

    /// Makes the next `n` calls fail with the error produced by `make`.
    pub async fn fail_next(&self, n: u32, make: fn() -> TrackerError) {
        let mut state = self.state.write().await;
        state.fail_next = n;
        state.fail_with = Some(make);
    }

    /// Returns the total number of API calls made.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn check_failure(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            let make = state.fail_with.unwrap_or(|| TrackerError::Transient {
                message: "injected failure".into(),
                source: None,
            });
            return Err(make());
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTrackerClient for InMemoryTracker {
    async fn fetch_resource(&self, resource_type: ResourceType, id: &str) -> Result<RawRecord> {
        self.check_failure().await?;
        let key = ResourceKey::new(resource_type, id);
        let state = self.state.read().await;
        state
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound {
                resource: key.to_string(),
            })
    }

    async fn list_changed_since(
        &self,
        resource_type: ResourceType,
        cursor: Option<&ChangeCursor>,
    ) -> Result<Vec<RawRecord>> {
        self.check_failure().await?;
        let since = cursor
            .map(|c| {
                chrono::DateTime::parse_from_rfc3339(c.as_str())
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|e| TrackerError::InvalidResponse {
                        message: format!("invalid cursor: {e}"),
                    })
            })
            .transpose()?;

        let state = self.state.read().await;
        let mut records: Vec<RawRecord> = state
            .records
            .values()
            .filter(|r| r.resource_type == resource_type)
            .filter(|r| since.is_none_or(|ts| r.updated_at > ts))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }

    async fn fetch_board_sprint_issues(
        &self,
        board_id: &str,
        sprint_id: &str,
    ) -> Result<Vec<RawIssue>> {
        self.check_failure().await?;
        let state = self.state.read().await;
        Ok(state
            .sprint_issues
            .get(&(board_id.to_string(), sprint_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(id: &str, hour: u32) -> RawRecord {
        RawRecord::new(
            ResourceType::Issue,
            id,
            Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).single().expect("valid ts"),
            json!({"summary": id}),
        )
    }

    #[tokio::test]
    async fn fetch_returns_seeded_record() {
        let tracker = InMemoryTracker::new();
        tracker.put_record(record("ABC-1", 10)).await;

        let got = tracker
            .fetch_resource(ResourceType::Issue, "ABC-1")
            .await
            .expect("fetch");
        assert_eq!(got.resource_id, "ABC-1");
        assert_eq!(tracker.call_count(), 1);
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let tracker = InMemoryTracker::new();
        let err = tracker
            .fetch_resource(ResourceType::Issue, "NOPE")
            .await
            .expect_err("should fail");
        assert!(matches!(err, TrackerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_changed_since_filters_by_cursor() {
        let tracker = InMemoryTracker::new();
        tracker.put_record(record("ABC-1", 8)).await;
        tracker.put_record(record("ABC-2", 12)).await;

        let cursor = ChangeCursor::from_timestamp(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).single().expect("valid ts"),
        );
        let changed = tracker
            .list_changed_since(ResourceType::Issue, Some(&cursor))
            .await
            .expect("list");
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].resource_id, "ABC-2");
    }

    #[tokio::test]
    async fn list_without_cursor_returns_all_sorted() {
        let tracker = InMemoryTracker::new();
        tracker.put_record(record("ABC-2", 12)).await;
        tracker.put_record(record("ABC-1", 8)).await;

        let all = tracker
            .list_changed_since(ResourceType::Issue, None)
            .await
            .expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].resource_id, "ABC-1");
    }

    #[tokio::test]
    async fn failure_injection_fails_then_recovers() {
        let tracker = InMemoryTracker::new();
        tracker.put_record(record("ABC-1", 10)).await;
        tracker
            .fail_next(2, || TrackerError::Transient {
                message: "flaky".into(),
                source: None,
            })
            .await;

        assert!(tracker.fetch_resource(ResourceType::Issue, "ABC-1").await.is_err());
        assert!(tracker.fetch_resource(ResourceType::Issue, "ABC-1").await.is_err());
        assert!(tracker.fetch_resource(ResourceType::Issue, "ABC-1").await.is_ok());
        assert_eq!(tracker.call_count(), 3);
    }

    #[tokio::test]
    async fn sprint_issues_are_returned() {
        let tracker = InMemoryTracker::new();
        tracker
            .put_sprint_issues("board-1", "sprint-9", vec![record("ABC-1", 10)])
            .await;

        let issues = tracker
            .fetch_board_sprint_issues("board-1", "sprint-9")
            .await
            .expect("fetch");
        assert_eq!(issues.len(), 1);

        let empty = tracker
            .fetch_board_sprint_issues("board-1", "sprint-10")
            .await
            .expect("fetch");
        assert!(empty.is_empty());
    }
}
