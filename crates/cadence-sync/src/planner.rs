//! Change detector / incremental sync planner.
//!
//! Given a resource type and an optional cursor, the planner asks the
//! tracker for changed resources and decides, per resource, whether a real
//! difference exists:
//!
//! 1. A remote `updated_at` not newer than the last successful sync is a
//!    `Noop` with no further work (never re-fetched), unless a manual full
//!    resync was requested.
//! 2. Otherwise the candidate is mapped and hashed; a hash equal to the
//!    stored one is still a `Noop` (timestamp moved, content did not).
//!
//! Failures are isolated per resource: one bad record marks its own
//! `SyncState` failed and the plan continues. Only infrastructure errors
//! (store, lease plumbing) abort the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{ResourceKey, ResourceType, RetryPolicy, SyncRunId};
use cadence_tracker::{ChangeCursor, IssueTrackerClient, RawRecord, TrackerError};

use crate::error::{Result, SyncError};
use crate::mapping::{self, MappingSet};
use crate::state::{SyncHistoryEntry, SyncState, SyncStatus};
use crate::store::SyncStateStore;

/// The action the engine should take for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// No local record exists; create it.
    Create,
    /// The local record differs; update it.
    Update,
    /// Nothing changed; skip.
    Noop,
    /// The resource was deleted upstream; remove the local record.
    Delete,
}

/// One planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// The resource to act on.
    pub resource: ResourceKey,
    /// The decided action.
    pub action: SyncAction,
    /// The raw record backing `Create`/`Update` actions.
    pub raw: Option<RawRecord>,
}

/// A resource the planner could not evaluate; its sync state was marked
/// failed and the plan continued.
#[derive(Debug, Clone)]
pub struct PlanFailure {
    /// The failed resource.
    pub resource: ResourceKey,
    /// The recorded error.
    pub error: String,
}

/// The plan produced for one resource type.
#[derive(Debug)]
pub struct SyncPlan {
    /// The resource type planned.
    pub resource_type: ResourceType,
    /// When the plan was computed.
    pub planned_at: DateTime<Utc>,
    /// Ordered actions (remote change order).
    pub actions: Vec<PlannedAction>,
    /// Per-resource failures recorded during planning.
    pub failures: Vec<PlanFailure>,
}

impl SyncPlan {
    /// Returns the actions that require engine work (not `Noop`).
    #[must_use]
    pub fn work(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action != SyncAction::Noop)
    }

    /// Returns how many actions are no-ops.
    #[must_use]
    pub fn noop_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action == SyncAction::Noop)
            .count()
    }
}

/// Options for a planning pass.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Only consider resources changed since this cursor.
    pub since: Option<ChangeCursor>,
    /// Bypass the timestamp/hash gate and re-evaluate everything
    /// (cache-busting escape hatch for manual full resyncs).
    pub full_resync: bool,
}

/// The incremental sync planner.
pub struct SyncPlanner {
    tracker: Arc<dyn IssueTrackerClient>,
    store: Arc<dyn SyncStateStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SyncPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPlanner")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SyncPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new(
        tracker: Arc<dyn IssueTrackerClient>,
        store: Arc<dyn SyncStateStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tracker,
            store,
            retry,
        }
    }

    /// Computes the sync plan for a resource type.
    ///
    /// The mapping set is the one captured for this run; candidate hashes
    /// must be computed with the same version the engine will apply.
    ///
    /// # Errors
    ///
    /// Returns an error when the change listing itself fails after
    /// retries, or on infrastructure failures. Per-resource evaluation
    /// failures are recorded in the plan, not returned.
    pub async fn plan(
        &self,
        resource_type: ResourceType,
        mapping: &MappingSet,
        options: &PlanOptions,
    ) -> Result<SyncPlan> {
        let cursor = if options.full_resync {
            None
        } else {
            options.since.clone()
        };

        let changed = self
            .retry
            .run(TrackerError::is_retryable, |_attempt| {
                let cursor = cursor.clone();
                async move {
                    self.tracker
                        .list_changed_since(resource_type, cursor.as_ref())
                        .await
                }
            })
            .await?;

        tracing::debug!(
            resource_type = %resource_type,
            candidates = changed.len(),
            full_resync = options.full_resync,
            "Planning sync pass"
        );

        let mut plan = SyncPlan {
            resource_type,
            planned_at: Utc::now(),
            actions: Vec::with_capacity(changed.len()),
            failures: Vec::new(),
        };

        for raw in changed {
            let resource = raw.key();
            match self.evaluate(&raw, mapping, options.full_resync).await {
                Ok(action) => plan.actions.push(PlannedAction {
                    resource,
                    action,
                    raw: Some(raw),
                }),
                // Partial-failure isolation: one bad resource must not
                // abort the batch.
                Err(err) if !err.is_infrastructure() => {
                    tracing::warn!(
                        resource = %resource,
                        error = %err,
                        "Planning failed for resource; continuing batch"
                    );
                    self.mark_failed(&resource, &raw, &err).await?;
                    plan.failures.push(PlanFailure {
                        resource,
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(plan)
    }

    /// Plans a single resource by fetching it from the tracker, with the
    /// retry policy applied. Used by the webhook pipeline when an event
    /// carries no snapshot payload.
    ///
    /// # Errors
    ///
    /// Returns the classified tracker error once retries are exhausted;
    /// the caller records the failure on the resource's sync state.
    pub async fn plan_resource(&self, resource: &ResourceKey) -> Result<RawRecord> {
        let raw = self
            .retry
            .run(TrackerError::is_retryable, |_attempt| async move {
                self.tracker
                    .fetch_resource(resource.resource_type, &resource.resource_id)
                    .await
            })
            .await?;
        Ok(raw)
    }

    async fn evaluate(
        &self,
        raw: &RawRecord,
        mapping: &MappingSet,
        full_resync: bool,
    ) -> Result<SyncAction> {
        let resource = raw.key();
        let state = self.store.get_state(&resource).await?;

        let Some(state) = state else {
            return Ok(SyncAction::Create);
        };

        if !full_resync {
            // Timestamp gate: never re-evaluate a resource whose remote
            // updated_at is not newer than the last successful sync.
            if let Some(last_sync) = state.last_sync_at {
                if state.sync_status == SyncStatus::Completed && raw.updated_at <= last_sync {
                    return Ok(SyncAction::Noop);
                }
            }
        }

        // Hash gate: the timestamp moved but the mapped content may not
        // have. Hash equality is a Noop either way.
        let candidate = mapping::apply(raw, mapping)?;
        let candidate_hash = candidate
            .content_hash()
            .map_err(|e| SyncError::store(format!("hash candidate record: {e}")))?;

        if !full_resync && state.content_hash.as_deref() == Some(candidate_hash.as_str()) {
            return Ok(SyncAction::Noop);
        }

        if state.content_hash.is_none() && state.last_sync_at.is_none() {
            Ok(SyncAction::Create)
        } else {
            Ok(SyncAction::Update)
        }
    }

    async fn mark_failed(
        &self,
        resource: &ResourceKey,
        raw: &RawRecord,
        err: &SyncError,
    ) -> Result<()> {
        let mut state = self
            .store
            .get_state(resource)
            .await?
            .unwrap_or_else(|| SyncState::new(resource.clone(), raw.resource_id.clone()));
        state.sync_status = SyncStatus::Failed;
        state.error_message = Some(err.to_string());

        self.store
            .append_history(SyncHistoryEntry {
                run_id: SyncRunId::generate(),
                resource: resource.clone(),
                status: SyncStatus::Failed,
                recorded_at: Utc::now(),
                api_calls: 0,
                duration_ms: 0,
                error_message: state.error_message.clone(),
            })
            .await?;
        self.store.put_state(state).await
    }
}
