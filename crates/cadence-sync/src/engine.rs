//! The sync engine: lease, map, detect, resolve, persist.
//!
//! One reconciliation pass for one resource:
//!
//! 1. Acquire the resource's sync lease (skip if held; the lease TTL
//!    guarantees no `in_progress` state survives a crashed worker).
//! 2. Map the raw record through the mapping version captured for this
//!    run.
//! 3. Classify the divergence against the hash at the last common sync
//!    point; resolve per the configured strategy or park for an operator.
//! 4. Persist the canonical record only when its hash changed; update the
//!    `SyncState` row and append history.
//!
//! Completed syncs notify registered [`SyncCompletionListener`]s, which is
//! how portfolio caches invalidate and meta-board detection re-runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use cadence_core::{
    AcquireOutcome, CanonicalRecord, ConflictId, DEFAULT_LEASE_TTL, LeaseStore, ResourceKey,
    ResourceType, RetryPolicy, SyncLease, SyncRunId, new_holder_id,
};
use cadence_tracker::{IssueTrackerClient, RawRecord, TrackerError};

use crate::conflict::{self, Divergence, StrategyConfig, StrategyDecision};
use crate::error::{Result, SyncError};
use crate::ingest::{EventProcessor, WebhookEvent, WebhookEventType};
use crate::mapping::{self, MappingRegistry, MappingSet};
use crate::metrics;
use crate::planner::{PlanOptions, SyncAction, SyncPlan, SyncPlanner};
use crate::state::{
    ConflictRecord, ConflictResolution, ResolutionStrategy, SyncHistoryEntry, SyncState,
    SyncStatus,
};
use crate::store::SyncStateStore;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL on per-resource sync leases.
    pub lease_ttl: Duration,
    /// Retry policy for tracker fetches made by the engine.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one resource's reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing changed; no canonical write happened.
    NoChange,
    /// A canonical record was created.
    Created,
    /// The canonical record was updated.
    Updated,
    /// Only the local side had changed; it was kept.
    LocalRetained,
    /// The canonical record was deleted.
    Deleted,
    /// A conflict was parked for manual resolution; the resource's
    /// pipeline is halted.
    ConflictPending(ConflictId),
}

/// Batch sync result: the data contract consumed by report and
/// presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// The resource type synced.
    pub resource_type: ResourceType,
    /// Resources written (created, updated, deleted, local-retained).
    pub synced: usize,
    /// Resources skipped as unchanged.
    pub noops: usize,
    /// Conflicts parked for manual resolution.
    pub conflicts: Vec<ConflictId>,
    /// Per-resource failures (isolated; the batch continued).
    pub failures: Vec<SyncFailure>,
}

/// One failed resource within a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    /// The failed resource.
    pub resource: ResourceKey,
    /// The recorded error.
    pub error: String,
}

/// Observer of completed syncs.
///
/// Listeners run after the state store is updated; they must not fail the
/// sync (errors are logged and swallowed by the caller contract: the
/// methods are infallible).
#[async_trait]
pub trait SyncCompletionListener: Send + Sync {
    /// Called after a resource's sync completes with a persisted record.
    async fn on_sync_completed(&self, record: &CanonicalRecord);

    /// Called after a board's sprint issues finished a sync cycle.
    async fn on_board_synced(&self, board_id: &str, issues: &[CanonicalRecord]) {
        let _ = (board_id, issues);
    }
}

/// The synchronization engine.
pub struct SyncEngine {
    tracker: Arc<dyn IssueTrackerClient>,
    store: Arc<dyn SyncStateStore>,
    leases: Arc<dyn LeaseStore>,
    mappings: Arc<RwLock<MappingRegistry>>,
    strategies: StrategyConfig,
    listeners: RwLock<Vec<Arc<dyn SyncCompletionListener>>>,
    holder_id: String,
    config: EngineConfig,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("holder_id", &self.holder_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine with default strategies and an empty mapping
    /// registry (built-in default mappings apply).
    #[must_use]
    pub fn new(
        tracker: Arc<dyn IssueTrackerClient>,
        store: Arc<dyn SyncStateStore>,
        leases: Arc<dyn LeaseStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tracker,
            store,
            leases,
            mappings: Arc::new(RwLock::new(MappingRegistry::new())),
            strategies: StrategyConfig::default(),
            listeners: RwLock::new(Vec::new()),
            holder_id: new_holder_id(),
            config,
        }
    }

    /// Sets the conflict resolution strategy configuration.
    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategyConfig) -> Self {
        self.strategies = strategies;
        self
    }

    /// Replaces the mapping registry.
    #[must_use]
    pub fn with_mappings(mut self, registry: MappingRegistry) -> Self {
        self.mappings = Arc::new(RwLock::new(registry));
        self
    }

    /// Returns the mapping registry handle (administrative surface).
    #[must_use]
    pub fn mappings(&self) -> Arc<RwLock<MappingRegistry>> {
        Arc::clone(&self.mappings)
    }

    /// Returns the sync state store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn SyncStateStore> {
        Arc::clone(&self.store)
    }

    /// Registers a completion listener.
    pub async fn add_listener(&self, listener: Arc<dyn SyncCompletionListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Builds a planner wired to this engine's tracker, store, and retry
    /// policy.
    #[must_use]
    pub fn planner(&self) -> SyncPlanner {
        SyncPlanner::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.store),
            self.config.retry,
        )
    }

    /// Plans and executes an incremental sync for a resource type.
    ///
    /// The active mapping set is captured once, up front, and applied for
    /// the whole batch.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors and change-listing failures;
    /// per-resource failures are reported in the result.
    pub async fn sync_changed(
        &self,
        resource_type: ResourceType,
        options: &PlanOptions,
    ) -> Result<SyncResult> {
        let mapping = self.mappings.read().await.active_set(resource_type);
        let plan = self.planner().plan(resource_type, &mapping, options).await?;
        self.run_plan(plan, &mapping).await
    }

    /// Executes a previously computed plan.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors; per-resource failures are isolated
    /// into the result.
    pub async fn run_plan(&self, plan: SyncPlan, mapping: &MappingSet) -> Result<SyncResult> {
        let mut result = SyncResult {
            resource_type: plan.resource_type,
            synced: 0,
            noops: plan.noop_count(),
            conflicts: Vec::new(),
            failures: plan
                .failures
                .iter()
                .map(|f| SyncFailure {
                    resource: f.resource.clone(),
                    error: f.error.clone(),
                })
                .collect(),
        };

        for action in plan.actions {
            match action.action {
                SyncAction::Noop => {}
                SyncAction::Delete => match self.delete_resource(&action.resource).await {
                    Ok(()) => result.synced += 1,
                    Err(err) if !err.is_infrastructure() => result.failures.push(SyncFailure {
                        resource: action.resource,
                        error: err.to_string(),
                    }),
                    Err(err) => return Err(err),
                },
                SyncAction::Create | SyncAction::Update => {
                    let Some(raw) = action.raw else { continue };
                    match self.sync_resource(&raw, mapping).await {
                        Ok(SyncOutcome::ConflictPending(id)) => result.conflicts.push(id),
                        Ok(_) => result.synced += 1,
                        Err(err) if !err.is_infrastructure() => {
                            result.failures.push(SyncFailure {
                                resource: action.resource,
                                error: err.to_string(),
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Ok(result)
    }

    /// Reconciles a single raw record.
    ///
    /// # Errors
    ///
    /// - [`SyncError::LeaseHeld`] when another worker owns the resource.
    /// - [`SyncError::ConflictPending`] when the resource is halted on a
    ///   parked conflict.
    /// - [`SyncError::Validation`] when mapping fails; the partially-mapped
    ///   record is retained with explicit missing-field markers.
    pub async fn sync_resource(
        &self,
        raw: &RawRecord,
        mapping: &MappingSet,
    ) -> Result<SyncOutcome> {
        let resource = raw.key();
        let lease = self.acquire_lease(&resource).await?;

        let started = std::time::Instant::now();
        let result = self.sync_locked(&resource, raw, mapping, started).await;
        self.release_lease(lease).await;

        match &result {
            Ok(outcome) => {
                metrics::record_sync_run(outcome_label(outcome), started.elapsed().as_secs_f64());
            }
            Err(_) => {
                metrics::record_sync_run("failed", started.elapsed().as_secs_f64());
            }
        }
        result
    }

    /// Deletes a resource's canonical record (resource removed upstream).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LeaseHeld`] when another worker owns the
    /// resource, or store errors.
    pub async fn delete_resource(&self, resource: &ResourceKey) -> Result<()> {
        let lease = self.acquire_lease(resource).await?;
        let result = self.delete_locked(resource).await;
        self.release_lease(lease).await;
        result
    }

    /// Syncs all issues in a board's sprint and notifies board listeners.
    ///
    /// Per-resource failures are logged and skipped; the returned records
    /// are the canonical issues after the pass.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors and board-level fetch failures.
    pub async fn sync_board_sprint(
        &self,
        board_id: &str,
        sprint_id: &str,
    ) -> Result<Vec<CanonicalRecord>> {
        let raws = self
            .config
            .retry
            .run(TrackerError::is_retryable, |_attempt| async move {
                self.tracker
                    .fetch_board_sprint_issues(board_id, sprint_id)
                    .await
            })
            .await?;

        let mapping = self.mappings.read().await.active_set(ResourceType::Issue);
        let mut records = Vec::with_capacity(raws.len());

        for raw in raws {
            match self.sync_resource(&raw, &mapping).await {
                Ok(_) => {}
                Err(err) if !err.is_infrastructure() => {
                    tracing::warn!(
                        resource = %raw.key(),
                        error = %err,
                        "Issue sync failed during board pass; continuing"
                    );
                }
                Err(err) => return Err(err),
            }
            if let Some(record) = self.store.canonical_record(&raw.key()).await? {
                records.push(record);
            }
        }

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_board_synced(board_id, &records).await;
        }

        Ok(records)
    }

    /// Resolves a parked conflict by ID.
    ///
    /// Idempotent per conflict ID: resolving an already-resolved conflict
    /// with the same strategy is a no-op returning the recorded outcome.
    ///
    /// # Errors
    ///
    /// - Not-found for unknown IDs.
    /// - `InvalidInput` for strategy `Manual` (it parks, it cannot resolve).
    /// - `PreconditionFailed` when the conflict was already resolved with a
    ///   different strategy.
    pub async fn resolve_conflict(
        &self,
        id: ConflictId,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictResolution> {
        let Some(terminal) = conflict::terminal_resolution(strategy) else {
            return Err(cadence_core::Error::InvalidInput(
                "strategy 'manual' cannot resolve a conflict".to_string(),
            )
            .into());
        };

        let Some(record) = self.store.find_conflict(id).await? else {
            return Err(cadence_core::Error::resource_not_found("conflict", id).into());
        };

        match record.resolution {
            ConflictResolution::ManualPending => {
                self.apply_resolution(record, strategy, terminal).await
            }
            existing if existing == terminal => {
                // Idempotent replay: same strategy, same conflict ID, no
                // further writes.
                Ok(existing)
            }
            existing => Err(cadence_core::Error::PreconditionFailed {
                message: format!(
                    "conflict {id} already resolved as {existing:?}; cannot re-resolve as {terminal:?}"
                ),
            }
            .into()),
        }
    }

    async fn apply_resolution(
        &self,
        mut record: ConflictRecord,
        strategy: ResolutionStrategy,
        terminal: ConflictResolution,
    ) -> Result<ConflictResolution> {
        let resource = record.resource.clone();
        let lease = self.acquire_lease(&resource).await?;
        let result = async {
            let base = self.store.canonical_record(&resource).await?.ok_or_else(|| {
                SyncError::store(format!("no canonical record for conflicted {resource}"))
            })?;

            let remote_side = strategy == ResolutionStrategy::RemoteWins;
            let resolved = conflict::apply_diff_side(&base, &record.fields, remote_side)?;
            let hash = resolved
                .content_hash()
                .map_err(|e| SyncError::store(format!("hash resolved record: {e}")))?;

            self.store.put_canonical(resolved.clone()).await?;

            record.resolution = terminal;
            record.resolved_at = Some(Utc::now());
            self.store.update_conflict(record.clone()).await?;

            let mut state = self
                .store
                .get_state(&resource)
                .await?
                .ok_or_else(|| SyncError::store(format!("no sync state for {resource}")))?;
            if let Some(slot) = state.conflicts.iter_mut().find(|c| c.id == record.id) {
                *slot = record.clone();
            }
            state.content_hash = Some(hash);
            state.sync_status = SyncStatus::Completed;
            state.last_sync_at = Some(Utc::now());
            state.error_message = None;
            self.store.put_state(state).await?;

            self.append_history(&resource, SyncStatus::Completed, 0, 0, None)
                .await?;
            metrics::record_conflict_resolved(match strategy {
                ResolutionStrategy::RemoteWins => "remote_wins",
                ResolutionStrategy::LocalWins => "local_wins",
                ResolutionStrategy::Manual => "manual",
            });

            self.notify_completed(&resolved).await;
            Ok(terminal)
        }
        .await;
        self.release_lease(lease).await;
        result
    }

    async fn acquire_lease(&self, resource: &ResourceKey) -> Result<SyncLease> {
        match self
            .leases
            .try_acquire(resource, &self.holder_id, self.config.lease_ttl)
            .await?
        {
            AcquireOutcome::Acquired(lease) => Ok(lease),
            AcquireOutcome::Held { holder_id, .. } => Err(SyncError::LeaseHeld {
                resource: resource.clone(),
                holder: holder_id,
            }),
        }
    }

    async fn release_lease(&self, lease: SyncLease) {
        // A false return means the lease expired and was taken over; the
        // new holder is fenced in either way.
        if let Err(err) = self.leases.release(&lease).await {
            tracing::warn!(resource = %lease.resource, error = %err, "Lease release failed");
        }
    }

    async fn sync_locked(
        &self,
        resource: &ResourceKey,
        raw: &RawRecord,
        mapping: &MappingSet,
        started: std::time::Instant,
    ) -> Result<SyncOutcome> {
        let mut state = self
            .store
            .get_state(resource)
            .await?
            .unwrap_or_else(|| SyncState::new(resource.clone(), raw.resource_id.clone()));

        if let Some(pending) = state.pending_conflict() {
            return Err(SyncError::ConflictPending {
                conflict_id: pending.id,
                resource: resource.clone(),
            });
        }

        state.sync_status = SyncStatus::InProgress;
        state.api_calls_count += 1;
        self.store.put_state(state.clone()).await?;

        let step = self.reconcile(&mut state, raw, mapping).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        state.duration_ms = duration_ms;

        match step {
            Ok((outcome, persisted)) => {
                self.store.put_state(state.clone()).await?;
                self.append_history(
                    resource,
                    state.sync_status,
                    state.api_calls_count,
                    duration_ms,
                    None,
                )
                .await?;
                if state.sync_status == SyncStatus::Completed {
                    if let Some(record) = persisted {
                        self.notify_completed(&record).await;
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                state.sync_status = SyncStatus::Failed;
                state.error_message = Some(err.to_string());
                self.store.put_state(state).await?;
                self.append_history(
                    resource,
                    SyncStatus::Failed,
                    0,
                    duration_ms,
                    Some(err.to_string()),
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Classifies and applies one raw record against local state.
    ///
    /// Returns the outcome plus the record that was persisted (for
    /// listener notification), if any.
    async fn reconcile(
        &self,
        state: &mut SyncState,
        raw: &RawRecord,
        mapping: &MappingSet,
    ) -> Result<(SyncOutcome, Option<CanonicalRecord>)> {
        let resource = state.resource.clone();

        let candidate = match mapping::apply(raw, mapping) {
            Ok(candidate) => candidate,
            Err(err) => {
                // Retain the partially-mapped record with explicit
                // missing-field markers; the sync itself fails.
                let partial = mapping::apply_lenient(raw, mapping);
                self.store.put_canonical(partial.record).await?;
                return Err(SyncError::Validation(err));
            }
        };

        let local = self.store.canonical_record(&resource).await?;
        let divergence =
            conflict::detect_divergence(state.content_hash.as_deref(), local.as_ref(), &candidate)?;

        match divergence {
            Divergence::None => {
                state.sync_status = SyncStatus::Completed;
                state.last_sync_at = Some(Utc::now());
                state.error_message = None;
                Ok((SyncOutcome::NoChange, None))
            }
            Divergence::RemoteOnly => {
                let created = local.is_none();
                let hash = candidate
                    .content_hash()
                    .map_err(|e| SyncError::store(format!("hash candidate record: {e}")))?;
                self.store.put_canonical(candidate.clone()).await?;
                state.content_hash = Some(hash);
                state.sync_status = SyncStatus::Completed;
                state.last_sync_at = Some(Utc::now());
                state.error_message = None;
                let outcome = if created {
                    SyncOutcome::Created
                } else {
                    SyncOutcome::Updated
                };
                Ok((outcome, Some(candidate)))
            }
            Divergence::LocalOnly => {
                // Keep local; a push-direction pass would propagate it.
                let local_record = local.unwrap_or(candidate);
                let hash = local_record
                    .content_hash()
                    .map_err(|e| SyncError::store(format!("hash local record: {e}")))?;
                state.content_hash = Some(hash);
                state.sync_status = SyncStatus::Completed;
                state.last_sync_at = Some(Utc::now());
                state.error_message = None;
                Ok((SyncOutcome::LocalRetained, Some(local_record)))
            }
            Divergence::Conflict(diffs) => {
                metrics::record_conflict_detected(resource.resource_type.as_str());
                let strategy = self.strategies.strategy_for(resource.resource_type);
                state.resolution_strategy = strategy;

                let local_record = local.ok_or_else(|| {
                    SyncError::store(format!("conflict without local record for {resource}"))
                })?;

                match conflict::decide(strategy, &local_record, &candidate) {
                    StrategyDecision::Apply { record, resolution } => {
                        let hash = record
                            .content_hash()
                            .map_err(|e| SyncError::store(format!("hash resolved record: {e}")))?;
                        self.store.put_canonical(record.clone()).await?;

                        let mut conflict_record =
                            ConflictRecord::new(resource.clone(), diffs, resolution);
                        conflict_record.resolved_at = Some(Utc::now());
                        state.conflicts.push(conflict_record);

                        state.content_hash = Some(hash);
                        state.sync_status = SyncStatus::Completed;
                        state.last_sync_at = Some(Utc::now());
                        state.error_message = None;
                        metrics::record_conflict_resolved("auto");
                        Ok((SyncOutcome::Updated, Some(record)))
                    }
                    StrategyDecision::Park => {
                        let conflict_record = ConflictRecord::new(
                            resource.clone(),
                            diffs,
                            ConflictResolution::ManualPending,
                        );
                        let id = conflict_record.id;
                        state.conflicts.push(conflict_record);
                        state.sync_status = SyncStatus::Pending;
                        state.error_message =
                            Some("conflict pending manual resolution".to_string());
                        Ok((SyncOutcome::ConflictPending(id), None))
                    }
                }
            }
        }
    }

    async fn delete_locked(&self, resource: &ResourceKey) -> Result<()> {
        self.store.delete_canonical(resource).await?;

        let mut state = self
            .store
            .get_state(resource)
            .await?
            .unwrap_or_else(|| SyncState::new(resource.clone(), resource.resource_id.clone()));
        state.sync_status = SyncStatus::Completed;
        state.content_hash = None;
        state.last_sync_at = Some(Utc::now());
        state.error_message = None;
        self.store.put_state(state).await?;
        self.append_history(resource, SyncStatus::Completed, 0, 0, None)
            .await
    }

    async fn append_history(
        &self,
        resource: &ResourceKey,
        status: SyncStatus,
        api_calls: u64,
        duration_ms: u64,
        error_message: Option<String>,
    ) -> Result<()> {
        self.store
            .append_history(SyncHistoryEntry {
                run_id: SyncRunId::generate(),
                resource: resource.clone(),
                status,
                recorded_at: Utc::now(),
                api_calls,
                duration_ms,
                error_message,
            })
            .await
    }

    async fn notify_completed(&self, record: &CanonicalRecord) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_sync_completed(record).await;
        }
    }
}

const fn outcome_label(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::NoChange => "noop",
        SyncOutcome::Created => "created",
        SyncOutcome::Updated => "updated",
        SyncOutcome::LocalRetained => "local_retained",
        SyncOutcome::Deleted => "deleted",
        SyncOutcome::ConflictPending(_) => "conflict_pending",
    }
}

#[async_trait]
impl EventProcessor for SyncEngine {
    async fn process(&self, event: &WebhookEvent) -> Result<()> {
        match event.event_type {
            WebhookEventType::ResourceDeleted => self.delete_resource(&event.resource).await,
            WebhookEventType::ResourceCreated | WebhookEventType::ResourceUpdated => {
                // Webhooks usually carry a snapshot of the record; fall
                // back to a tracker fetch when they do not.
                let raw = if event.payload.as_object().is_some_and(|o| !o.is_empty()) {
                    RawRecord::new(
                        event.resource.resource_type,
                        event.resource.resource_id.clone(),
                        event.occurred_at,
                        event.payload.clone(),
                    )
                } else {
                    self.planner().plan_resource(&event.resource).await?
                };

                let mapping = self
                    .mappings
                    .read()
                    .await
                    .active_set(event.resource.resource_type);
                self.sync_resource(&raw, &mapping).await.map(|_| ())
            }
        }
    }
}
