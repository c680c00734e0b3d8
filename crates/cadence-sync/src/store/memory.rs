//! In-memory sync state store.
//!
//! Backs single-process deployments and the test suites. A persistent
//! implementation would map each method onto its table; the semantics here
//! (upsert states, append-only history, in-place conflict updates) are the
//! contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use cadence_core::{CanonicalRecord, ConflictId, ResourceKey, ResourceType};

use crate::error::{Result, SyncError};
use crate::state::{ConflictRecord, ConflictResolution, SyncHistoryEntry, SyncState, SyncStatus};
use crate::store::SyncStateStore;

/// Internal store state protected by a single lock.
#[derive(Debug, Default)]
struct StoreState {
    states: HashMap<ResourceKey, SyncState>,
    history: Vec<SyncHistoryEntry>,
    canonical: HashMap<ResourceKey, CanonicalRecord>,
}

/// In-memory implementation of [`SyncStateStore`].
#[derive(Debug, Default)]
pub struct MemorySyncStateStore {
    state: RwLock<StoreState>,
    canonical_writes: AtomicU64,
}

impl MemorySyncStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of canonical-record writes performed.
    ///
    /// The no-op invariant ("re-running sync with no remote change writes
    /// nothing") is asserted against this counter in tests.
    #[must_use]
    pub fn canonical_write_count(&self) -> u64 {
        self.canonical_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncStateStore {
    async fn get_state(&self, resource: &ResourceKey) -> Result<Option<SyncState>> {
        let state = self.state.read().await;
        Ok(state.states.get(resource).cloned())
    }

    async fn put_state(&self, sync_state: SyncState) -> Result<()> {
        let mut state = self.state.write().await;
        state.states.insert(sync_state.resource.clone(), sync_state);
        Ok(())
    }

    async fn list_states(
        &self,
        resource_type: Option<ResourceType>,
        status: Option<SyncStatus>,
    ) -> Result<Vec<SyncState>> {
        let state = self.state.read().await;
        let mut states: Vec<SyncState> = state
            .states
            .values()
            .filter(|s| resource_type.is_none_or(|t| s.resource.resource_type == t))
            .filter(|s| status.is_none_or(|st| s.sync_status == st))
            .cloned()
            .collect();
        states.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(states)
    }

    async fn append_history(&self, entry: SyncHistoryEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.history.push(entry);
        Ok(())
    }

    async fn history(&self, resource: &ResourceKey) -> Result<Vec<SyncHistoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|e| &e.resource == resource)
            .cloned()
            .collect())
    }

    async fn list_conflicts(
        &self,
        resource_type: Option<ResourceType>,
        resolution: Option<ConflictResolution>,
    ) -> Result<Vec<ConflictRecord>> {
        let state = self.state.read().await;
        let mut conflicts: Vec<ConflictRecord> = state
            .states
            .values()
            .filter(|s| resource_type.is_none_or(|t| s.resource.resource_type == t))
            .flat_map(|s| s.conflicts.iter())
            .filter(|c| resolution.is_none_or(|r| c.resolution == r))
            .cloned()
            .collect();
        conflicts.sort_by_key(|c| c.id);
        Ok(conflicts)
    }

    async fn find_conflict(&self, id: ConflictId) -> Result<Option<ConflictRecord>> {
        let state = self.state.read().await;
        Ok(state
            .states
            .values()
            .flat_map(|s| s.conflicts.iter())
            .find(|c| c.id == id)
            .cloned())
    }

    async fn update_conflict(&self, conflict: ConflictRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state
            .states
            .get_mut(&conflict.resource)
            .ok_or_else(|| SyncError::store(format!("no sync state for {}", conflict.resource)))?;
        let slot = row
            .conflicts
            .iter_mut()
            .find(|c| c.id == conflict.id)
            .ok_or_else(|| SyncError::store(format!("unknown conflict {}", conflict.id)))?;
        *slot = conflict;
        Ok(())
    }

    async fn canonical_record(&self, resource: &ResourceKey) -> Result<Option<CanonicalRecord>> {
        let state = self.state.read().await;
        Ok(state.canonical.get(resource).cloned())
    }

    async fn put_canonical(&self, record: CanonicalRecord) -> Result<()> {
        let mut state = self.state.write().await;
        self.canonical_writes.fetch_add(1, Ordering::Relaxed);
        state.canonical.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_canonical(&self, resource: &ResourceKey) -> Result<()> {
        let mut state = self.state.write().await;
        state.canonical.remove(resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SyncRunId;
    use chrono::Utc;
    use serde_json::json;

    use crate::state::FieldDiff;

    fn issue_state(id: &str) -> SyncState {
        SyncState::new(ResourceKey::issue(id), id)
    }

    #[tokio::test]
    async fn put_and_get_state() {
        let store = MemorySyncStateStore::new();
        store.put_state(issue_state("ABC-1")).await.expect("put");

        let got = store
            .get_state(&ResourceKey::issue("ABC-1"))
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(got.external_id, "ABC-1");
        assert!(store
            .get_state(&ResourceKey::issue("ABC-2"))
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn list_states_filters() {
        let store = MemorySyncStateStore::new();
        let mut failed = issue_state("ABC-1");
        failed.sync_status = SyncStatus::Failed;
        store.put_state(failed).await.expect("put");
        store
            .put_state(SyncState::new(ResourceKey::sprint("9"), "9"))
            .await
            .expect("put");

        let issues = store
            .list_states(Some(ResourceType::Issue), None)
            .await
            .expect("list");
        assert_eq!(issues.len(), 1);

        let failed = store
            .list_states(None, Some(SyncStatus::Failed))
            .await
            .expect("list");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].resource.resource_id, "ABC-1");
    }

    #[tokio::test]
    async fn history_is_append_only_and_scoped() {
        let store = MemorySyncStateStore::new();
        let resource = ResourceKey::issue("ABC-1");
        for status in [SyncStatus::InProgress, SyncStatus::Completed] {
            store
                .append_history(SyncHistoryEntry {
                    run_id: SyncRunId::generate(),
                    resource: resource.clone(),
                    status,
                    recorded_at: Utc::now(),
                    api_calls: 1,
                    duration_ms: 5,
                    error_message: None,
                })
                .await
                .expect("append");
        }
        store
            .append_history(SyncHistoryEntry {
                run_id: SyncRunId::generate(),
                resource: ResourceKey::issue("OTHER-1"),
                status: SyncStatus::Failed,
                recorded_at: Utc::now(),
                api_calls: 0,
                duration_ms: 0,
                error_message: Some("boom".into()),
            })
            .await
            .expect("append");

        let history = store.history(&resource).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SyncStatus::InProgress);
        assert_eq!(history[1].status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn conflicts_are_found_and_updated() {
        let store = MemorySyncStateStore::new();
        let mut state = issue_state("ABC-1");
        let conflict = ConflictRecord::new(
            state.resource.clone(),
            vec![FieldDiff {
                field: "storyPoints".into(),
                local: json!(3),
                remote: json!(8),
            }],
            ConflictResolution::ManualPending,
        );
        let id = conflict.id;
        state.conflicts.push(conflict);
        store.put_state(state).await.expect("put");

        let pending = store
            .list_conflicts(None, Some(ConflictResolution::ManualPending))
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);

        let mut found = store.find_conflict(id).await.expect("find").expect("exists");
        found.resolution = ConflictResolution::ResolvedRemoteWins;
        found.resolved_at = Some(Utc::now());
        store.update_conflict(found).await.expect("update");

        let pending = store
            .list_conflicts(None, Some(ConflictResolution::ManualPending))
            .await
            .expect("list");
        assert!(pending.is_empty());

        // Resolved conflicts are retained for audit.
        let all = store.list_conflicts(None, None).await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_conflict_errors() {
        let store = MemorySyncStateStore::new();
        let conflict = ConflictRecord::new(
            ResourceKey::issue("ABC-1"),
            Vec::new(),
            ConflictResolution::ManualPending,
        );
        let err = store.update_conflict(conflict).await.expect_err("unknown");
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn canonical_records_roundtrip_and_count_writes() {
        let store = MemorySyncStateStore::new();
        let record = CanonicalRecord::new(ResourceKey::issue("ABC-1"), "10001");
        store.put_canonical(record.clone()).await.expect("put");
        assert_eq!(store.canonical_write_count(), 1);

        let got = store
            .canonical_record(&record.key)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(got, record);

        store.delete_canonical(&record.key).await.expect("delete");
        assert!(store
            .canonical_record(&record.key)
            .await
            .expect("get")
            .is_none());

        // Deleting again is a no-op.
        store.delete_canonical(&record.key).await.expect("delete");
    }
}
