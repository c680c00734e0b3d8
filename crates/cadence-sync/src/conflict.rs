//! Conflict detection and resolution.
//!
//! A conflict exists when both the local and remote copies of a resource
//! changed since the last *common* sync point. The comparison baseline is
//! the content hash stored at the last successful sync, never the
//! immediately-prior local hash; comparing against the latter would
//! misclassify an ordinary remote update as a conflict whenever the local
//! copy had also drifted.
//!
//! Resolution is whole-resource. When a divergence narrows to a single
//! field, that field-level detail is recorded on the [`ConflictRecord`]
//! for audit; multi-field divergences record the full field list but still
//! resolve wholesale.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use cadence_core::{CanonicalRecord, ResourceType};

use crate::error::{Result, SyncError};
use crate::mapping::record_fields;
use crate::state::{ConflictResolution, FieldDiff, ResolutionStrategy};

/// Fields excluded from conflict diffs: identity and bookkeeping fields
/// that legitimately differ between any two versions.
const DIFF_EXCLUDED_FIELDS: &[&str] = &["key", "externalId", "createdAt", "updatedAt"];

/// Resolution strategy configuration: a global default plus per-type
/// overrides.
#[derive(Debug, Clone, Default)]
pub struct StrategyConfig {
    default: ResolutionStrategy,
    per_type: HashMap<ResourceType, ResolutionStrategy>,
}

impl StrategyConfig {
    /// Creates a config with the given global default.
    #[must_use]
    pub fn new(default: ResolutionStrategy) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    /// Overrides the strategy for one resource type.
    #[must_use]
    pub fn with_override(mut self, resource_type: ResourceType, strategy: ResolutionStrategy) -> Self {
        self.per_type.insert(resource_type, strategy);
        self
    }

    /// Returns the strategy in effect for a resource type.
    #[must_use]
    pub fn strategy_for(&self, resource_type: ResourceType) -> ResolutionStrategy {
        self.per_type
            .get(&resource_type)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Classification of a local/remote pair against the last common sync
/// point.
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// Local and remote are identical; nothing to do.
    None,
    /// Only the remote side changed (or this is the first sync); apply it.
    RemoteOnly,
    /// Only the local side changed; keep it (a push-direction sync would
    /// propagate it outward).
    LocalOnly,
    /// Both sides changed; the differing fields.
    Conflict(Vec<FieldDiff>),
}

/// Classifies a local/remote record pair.
///
/// `base_hash` is the content hash recorded at the last successful sync
/// (`None` for a first sync). `local` is the stored canonical record
/// (`None` when the resource has never been persisted).
///
/// # Errors
///
/// Returns an error if a record cannot be hashed.
pub fn detect_divergence(
    base_hash: Option<&str>,
    local: Option<&CanonicalRecord>,
    remote: &CanonicalRecord,
) -> Result<Divergence> {
    let Some(local) = local else {
        return Ok(Divergence::RemoteOnly);
    };

    let local_hash = local
        .content_hash()
        .map_err(|e| SyncError::store(format!("hash local record: {e}")))?;
    let remote_hash = remote
        .content_hash()
        .map_err(|e| SyncError::store(format!("hash remote record: {e}")))?;

    if local_hash == remote_hash {
        return Ok(Divergence::None);
    }

    let Some(base) = base_hash else {
        // A local record with no recorded sync point: treat remote as
        // authoritative (pull bootstrap).
        return Ok(Divergence::RemoteOnly);
    };

    if local_hash == base {
        return Ok(Divergence::RemoteOnly);
    }
    if remote_hash == base {
        return Ok(Divergence::LocalOnly);
    }

    Ok(Divergence::Conflict(diff_fields(local, remote)))
}

/// Computes the per-field differences between two canonical records.
///
/// Identity and timestamp bookkeeping fields are excluded; everything else
/// that differs is reported with both values.
#[must_use]
pub fn diff_fields(local: &CanonicalRecord, remote: &CanonicalRecord) -> Vec<FieldDiff> {
    let local_fields = record_fields(local);
    let remote_fields = record_fields(remote);

    let names: BTreeSet<&String> = local_fields.keys().chain(remote_fields.keys()).collect();

    names
        .into_iter()
        .filter(|name| !DIFF_EXCLUDED_FIELDS.contains(&name.as_str()))
        .filter_map(|name| {
            let local_value = local_fields.get(name).cloned().unwrap_or(Value::Null);
            let remote_value = remote_fields.get(name).cloned().unwrap_or(Value::Null);
            (local_value != remote_value).then(|| FieldDiff {
                field: name.clone(),
                local: local_value,
                remote: remote_value,
            })
        })
        .collect()
}

/// What a resolution strategy decides for a conflicted pair.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyDecision {
    /// Persist the chosen record with the given resolution outcome.
    Apply {
        /// The winning record.
        record: CanonicalRecord,
        /// The resolution to stamp on the conflict.
        resolution: ConflictResolution,
    },
    /// Park the conflict for an operator; the resource's pipeline halts.
    Park,
}

/// Applies a resolution strategy to a conflicted local/remote pair.
#[must_use]
pub fn decide(
    strategy: ResolutionStrategy,
    local: &CanonicalRecord,
    remote: &CanonicalRecord,
) -> StrategyDecision {
    match strategy {
        ResolutionStrategy::RemoteWins => StrategyDecision::Apply {
            record: remote.clone(),
            resolution: ConflictResolution::ResolvedRemoteWins,
        },
        ResolutionStrategy::LocalWins => StrategyDecision::Apply {
            record: local.clone(),
            resolution: ConflictResolution::ResolvedLocalWins,
        },
        ResolutionStrategy::Manual => StrategyDecision::Park,
    }
}

/// Returns the terminal resolution a strategy produces, or `None` for
/// `Manual` (which parks instead of resolving).
#[must_use]
pub const fn terminal_resolution(strategy: ResolutionStrategy) -> Option<ConflictResolution> {
    match strategy {
        ResolutionStrategy::RemoteWins => Some(ConflictResolution::ResolvedRemoteWins),
        ResolutionStrategy::LocalWins => Some(ConflictResolution::ResolvedLocalWins),
        ResolutionStrategy::Manual => None,
    }
}

/// Applies one side of a conflict's field diffs onto a base record.
///
/// Used when resolving a parked conflict: the stored diffs carry both
/// values for every differing field, so choosing a side is a field-wise
/// overwrite of the base.
///
/// # Errors
///
/// Returns a store error if the merged record cannot be rebuilt.
pub fn apply_diff_side(
    base: &CanonicalRecord,
    diffs: &[FieldDiff],
    remote_side: bool,
) -> Result<CanonicalRecord> {
    let mut fields = serde_json::to_value(base)
        .map_err(|e| SyncError::store(format!("serialize record: {e}")))?;

    let Value::Object(map) = &mut fields else {
        return Err(SyncError::store("canonical record is not an object"));
    };

    for diff in diffs {
        let value = if remote_side {
            diff.remote.clone()
        } else {
            diff.local.clone()
        };
        if value.is_null() {
            map.remove(&diff.field);
        } else {
            map.insert(diff.field.clone(), value);
        }
    }

    serde_json::from_value(fields)
        .map_err(|e| SyncError::store(format!("rebuild record from diffs: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ResourceKey;
    use serde_json::json;

    fn record(points: f64, status: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(ResourceKey::issue("ABC-1"), "10001");
        record.story_points = Some(points);
        record.status = Some(status.to_string());
        record
    }

    #[test]
    fn identical_records_are_no_divergence() {
        let local = record(5.0, "todo");
        let remote = record(5.0, "todo");
        let base = local.content_hash().expect("hash");

        let divergence = detect_divergence(Some(&base), Some(&local), &remote).expect("detect");
        assert_eq!(divergence, Divergence::None);
    }

    #[test]
    fn first_sync_is_remote_only() {
        let remote = record(5.0, "todo");
        let divergence = detect_divergence(None, None, &remote).expect("detect");
        assert_eq!(divergence, Divergence::RemoteOnly);
    }

    #[test]
    fn remote_change_with_clean_local_is_remote_only() {
        let local = record(5.0, "todo");
        let base = local.content_hash().expect("hash");
        let remote = record(8.0, "todo");

        let divergence = detect_divergence(Some(&base), Some(&local), &remote).expect("detect");
        assert_eq!(divergence, Divergence::RemoteOnly);
    }

    #[test]
    fn local_change_with_clean_remote_is_local_only() {
        let base_record = record(5.0, "todo");
        let base = base_record.content_hash().expect("hash");
        let local = record(3.0, "todo");
        let remote = base_record;

        let divergence = detect_divergence(Some(&base), Some(&local), &remote).expect("detect");
        assert_eq!(divergence, Divergence::LocalOnly);
    }

    #[test]
    fn both_changed_is_conflict_with_field_detail() {
        // Base H0 had storyPoints=5; local edited to 3, remote to 8.
        let base_record = record(5.0, "todo");
        let base = base_record.content_hash().expect("hash");
        let local = record(3.0, "todo");
        let remote = record(8.0, "todo");

        let divergence = detect_divergence(Some(&base), Some(&local), &remote).expect("detect");
        let Divergence::Conflict(diffs) = divergence else {
            panic!("expected conflict, got {divergence:?}");
        };
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "storyPoints");
        assert_eq!(diffs[0].local, json!(3.0));
        assert_eq!(diffs[0].remote, json!(8.0));
    }

    #[test]
    fn diff_excludes_bookkeeping_fields() {
        let mut local = record(5.0, "todo");
        local.updated_at = Some(chrono::Utc::now());
        let mut remote = record(5.0, "done");
        remote.updated_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));

        let diffs = diff_fields(&local, &remote);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "status");
    }

    #[test]
    fn strategy_config_overrides_per_type() {
        let config = StrategyConfig::new(ResolutionStrategy::RemoteWins)
            .with_override(ResourceType::Sprint, ResolutionStrategy::Manual);

        assert_eq!(
            config.strategy_for(ResourceType::Issue),
            ResolutionStrategy::RemoteWins
        );
        assert_eq!(
            config.strategy_for(ResourceType::Sprint),
            ResolutionStrategy::Manual
        );
    }

    #[test]
    fn decide_remote_wins_picks_remote() {
        let local = record(3.0, "todo");
        let remote = record(8.0, "todo");
        let decision = decide(ResolutionStrategy::RemoteWins, &local, &remote);
        let StrategyDecision::Apply { record, resolution } = decision else {
            panic!("expected apply");
        };
        assert_eq!(record.story_points, Some(8.0));
        assert_eq!(resolution, ConflictResolution::ResolvedRemoteWins);
    }

    #[test]
    fn decide_manual_parks() {
        let local = record(3.0, "todo");
        let remote = record(8.0, "todo");
        assert_eq!(
            decide(ResolutionStrategy::Manual, &local, &remote),
            StrategyDecision::Park
        );
    }

    #[test]
    fn apply_diff_side_overwrites_chosen_fields() {
        let local = record(3.0, "todo");
        let remote = record(8.0, "done");
        let diffs = diff_fields(&local, &remote);

        let remote_applied = apply_diff_side(&local, &diffs, true).expect("apply");
        assert_eq!(remote_applied.story_points, Some(8.0));
        assert_eq!(remote_applied.status.as_deref(), Some("done"));

        let local_applied = apply_diff_side(&remote, &diffs, false).expect("apply");
        assert_eq!(local_applied.story_points, Some(3.0));
        assert_eq!(local_applied.status.as_deref(), Some("todo"));
    }

    #[test]
    fn apply_diff_side_is_idempotent() {
        let local = record(3.0, "todo");
        let remote = record(8.0, "done");
        let diffs = diff_fields(&local, &remote);

        let once = apply_diff_side(&local, &diffs, true).expect("apply");
        let twice = apply_diff_side(&once, &diffs, true).expect("apply");
        assert_eq!(once, twice);
    }

    #[test]
    fn terminal_resolutions() {
        assert_eq!(
            terminal_resolution(ResolutionStrategy::RemoteWins),
            Some(ConflictResolution::ResolvedRemoteWins)
        );
        assert_eq!(
            terminal_resolution(ResolutionStrategy::LocalWins),
            Some(ConflictResolution::ResolvedLocalWins)
        );
        assert_eq!(terminal_resolution(ResolutionStrategy::Manual), None);
    }
}
