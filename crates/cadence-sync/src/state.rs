//! Sync state model.
//!
//! One [`SyncState`] row exists per synchronized resource. Rows are created
//! on the first sync attempt, transition through states on each
//! reconciliation pass, and are never deleted; the append-only
//! [`SyncHistoryEntry`] log preserves every transition for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{ConflictId, ResourceKey, SyncRunId};

/// Status of a resource's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never synced, or awaiting conflict resolution.
    Pending,
    /// A worker holds the lease and is reconciling now.
    InProgress,
    /// Last reconciliation succeeded.
    Completed,
    /// Last reconciliation failed; error recorded.
    Failed,
}

/// Direction of synchronization for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Remote is authoritative; changes flow in.
    Pull,
    /// Local is authoritative; changes flow out.
    Push,
    /// Both sides may change; conflicts are possible.
    Bidirectional,
}

/// Conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Remote version wins (default).
    RemoteWins,
    /// Local version wins.
    LocalWins,
    /// Park the conflict for an operator; halt the resource's pipeline.
    Manual,
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        Self::RemoteWins
    }
}

/// Resolution outcome recorded on a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Resolved automatically by the configured strategy.
    AutoResolved,
    /// Awaiting an operator decision; the resource's pipeline is halted.
    ManualPending,
    /// Resolved in favor of the local version.
    ResolvedLocalWins,
    /// Resolved in favor of the remote version.
    ResolvedRemoteWins,
}

impl ConflictResolution {
    /// Returns whether this conflict still blocks its resource.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::ManualPending)
    }
}

/// A single field's divergence between local and remote versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    /// The canonical field name.
    pub field: String,
    /// The local value.
    pub local: serde_json::Value,
    /// The remote value.
    pub remote: serde_json::Value,
}

/// A detected divergence between local and remote versions of a resource.
///
/// Resolution is whole-resource; the per-field detail is retained for
/// audit. Conflicts are kept after resolution or expiry, never purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Unique conflict identifier; resolution is idempotent per ID.
    pub id: ConflictId,

    /// The conflicted resource.
    pub resource: ResourceKey,

    /// The differing fields with local and remote values.
    pub fields: Vec<FieldDiff>,

    /// When the divergence was detected.
    pub detected_at: DateTime<Utc>,

    /// Resolution outcome.
    pub resolution: ConflictResolution,

    /// When the conflict was resolved, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Creates a new conflict record in the given resolution state.
    #[must_use]
    pub fn new(
        resource: ResourceKey,
        fields: Vec<FieldDiff>,
        resolution: ConflictResolution,
    ) -> Self {
        Self {
            id: ConflictId::generate(),
            resource,
            fields,
            detected_at: Utc::now(),
            resolution,
            resolved_at: None,
        }
    }

    /// Returns the single differing field when the conflict narrowed to
    /// exactly one.
    #[must_use]
    pub fn single_field(&self) -> Option<&FieldDiff> {
        match self.fields.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Returns whether the conflict still blocks its resource.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.resolution.is_pending()
    }
}

/// Durable sync state for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// The resource this state tracks.
    pub resource: ResourceKey,

    /// The external system's identifier for the resource.
    pub external_id: String,

    /// When the last successful sync completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Current sync status.
    pub sync_status: SyncStatus,

    /// Sync direction for this resource.
    pub sync_direction: SyncDirection,

    /// Content hash of the canonical record at the last successful sync.
    ///
    /// This is the "last common sync point" that conflict detection
    /// compares both sides against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Conflicts detected for this resource (pending and resolved).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,

    /// The resolution strategy in effect for this resource.
    #[serde(default)]
    pub resolution_strategy: ResolutionStrategy,

    /// Cumulative external API calls spent on this resource.
    pub api_calls_count: u64,

    /// Duration of the last reconciliation pass, in milliseconds.
    pub duration_ms: u64,

    /// Error message from the last failed pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SyncState {
    /// Creates the initial state for a resource (first sync attempt).
    #[must_use]
    pub fn new(resource: ResourceKey, external_id: impl Into<String>) -> Self {
        Self {
            resource,
            external_id: external_id.into(),
            last_sync_at: None,
            sync_status: SyncStatus::Pending,
            sync_direction: SyncDirection::Pull,
            content_hash: None,
            conflicts: Vec::new(),
            resolution_strategy: ResolutionStrategy::default(),
            api_calls_count: 0,
            duration_ms: 0,
            error_message: None,
        }
    }

    /// Returns the pending conflict blocking this resource, if any.
    #[must_use]
    pub fn pending_conflict(&self) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|c| c.is_pending())
    }

    /// Returns whether the resource's pipeline is halted on a conflict.
    #[must_use]
    pub fn has_pending_conflict(&self) -> bool {
        self.pending_conflict().is_some()
    }
}

/// Append-only sync history log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    /// The sync run this entry belongs to.
    pub run_id: SyncRunId,

    /// The resource that was synced.
    pub resource: ResourceKey,

    /// Status the resource transitioned to.
    pub status: SyncStatus,

    /// When the transition was recorded.
    pub recorded_at: DateTime<Utc>,

    /// API calls spent in this run.
    pub api_calls: u64,

    /// Run duration in milliseconds.
    pub duration_ms: u64,

    /// Error message when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_state_is_pending() {
        let state = SyncState::new(ResourceKey::issue("ABC-1"), "10001");
        assert_eq!(state.sync_status, SyncStatus::Pending);
        assert!(state.content_hash.is_none());
        assert!(!state.has_pending_conflict());
        assert_eq!(state.resolution_strategy, ResolutionStrategy::RemoteWins);
    }

    #[test]
    fn pending_conflict_blocks() {
        let mut state = SyncState::new(ResourceKey::issue("ABC-1"), "10001");
        state.conflicts.push(ConflictRecord::new(
            state.resource.clone(),
            vec![FieldDiff {
                field: "storyPoints".into(),
                local: json!(3),
                remote: json!(8),
            }],
            ConflictResolution::ManualPending,
        ));

        assert!(state.has_pending_conflict());
        let pending = state.pending_conflict().expect("pending");
        let diff = pending.single_field().expect("single field");
        assert_eq!(diff.field, "storyPoints");
    }

    #[test]
    fn resolved_conflicts_do_not_block() {
        let mut state = SyncState::new(ResourceKey::issue("ABC-1"), "10001");
        state.conflicts.push(ConflictRecord::new(
            state.resource.clone(),
            Vec::new(),
            ConflictResolution::ResolvedRemoteWins,
        ));
        assert!(!state.has_pending_conflict());
    }

    #[test]
    fn multi_field_conflict_has_no_single_field() {
        let record = ConflictRecord::new(
            ResourceKey::issue("ABC-1"),
            vec![
                FieldDiff {
                    field: "status".into(),
                    local: json!("done"),
                    remote: json!("in_progress"),
                },
                FieldDiff {
                    field: "assignee".into(),
                    local: json!("alice"),
                    remote: json!("bob"),
                },
            ],
            ConflictResolution::ManualPending,
        );
        assert!(record.single_field().is_none());
    }

    #[test]
    fn state_serialization_roundtrip() {
        let state = SyncState::new(ResourceKey::sprint("9"), "9");
        let json = serde_json::to_string(&state).expect("serialize");
        let parsed: SyncState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(state, parsed);
    }
}
