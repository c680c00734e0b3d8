//! Portfolio snapshots and the TTL cache.
//!
//! A [`PortfolioSnapshot`] is derived state: always recomputable from
//! canonical issue records plus workstream membership and sprint history.
//! Snapshots are cached keyed by `(board_id, filter_hash)` with
//! window-dependent TTLs (short for real-time views, longer for
//! historical/report views) and explicitly invalidated whenever a
//! contributing board completes a sync.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use cadence_core::{CanonicalRecord, canonical_json};

use crate::detector::{DetectorConfig, Detection, MetaBoardDetector, ProjectWorkstream};
use crate::error::{PortfolioError, Result};
use crate::forecast::{DEFAULT_TRIALS, Forecast, ForecastInput, monte_carlo};
use crate::risk::{RiskInput, RiskScore, risk_score};
use crate::velocity::{
    CapacityUtilization, SprintStat, coefficient_of_variation, rolling_velocity, velocity_samples,
};

/// Label marking an issue as cross-project-dependent.
const CROSS_PROJECT_LABEL: &str = "cross-project";

/// Statuses counted as completed work.
const DONE_STATUSES: &[&str] = &["done", "closed", "resolved"];

/// Snapshot view window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotWindow {
    /// Real-time view (short TTL).
    RealTime,
    /// Historical / report view (longer TTL).
    Historical,
}

/// Portfolio service configuration.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioConfig {
    /// Meta-board detector settings.
    pub detector: DetectorConfig,
    /// Cache TTL for real-time snapshots.
    pub realtime_ttl: Duration,
    /// Cache TTL for historical snapshots.
    pub historical_ttl: Duration,
    /// Sprints in the rolling velocity window.
    pub velocity_window: usize,
    /// Sprint length in days for forecast dates.
    pub sprint_length_days: u32,
    /// Monte Carlo trial count.
    pub forecast_trials: u32,
    /// Forecast RNG seed; `None` for entropy.
    pub forecast_seed: Option<u64>,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            realtime_ttl: Duration::from_secs(5 * 60),
            historical_ttl: Duration::from_secs(60 * 60),
            velocity_window: 6,
            sprint_length_days: 14,
            forecast_trials: DEFAULT_TRIALS,
            forecast_seed: None,
        }
    }
}

/// One project's rollup within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRollup {
    /// The contributing project.
    pub project_key: String,
    /// Rolling weighted velocity, when history exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    /// Capacity utilization.
    pub capacity: CapacityUtilization,
    /// Completion forecast, when history can parameterize one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<Forecast>,
    /// Story points remaining in the current sprint.
    pub remaining_points: f64,
    /// Story points already completed in the current sprint.
    pub completed_points: f64,
    /// Issues in the current sprint.
    pub total_issues: usize,
    /// Blocked issues in the current sprint.
    pub blocked_issues: usize,
}

/// Aggregated portfolio metrics for one board and time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// The meta-board.
    pub board_id: String,
    /// The view window.
    pub window: SnapshotWindow,
    /// When the snapshot was computed.
    pub computed_at: DateTime<Utc>,
    /// Per-project rollups, sorted by project key.
    pub rollups: Vec<ProjectRollup>,
    /// Portfolio risk with factor breakdown.
    pub risk: RiskScore,
}

/// Cache entry with expiry.
#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: PortfolioSnapshot,
    expires_at: DateTime<Utc>,
}

/// TTL cache for snapshots keyed by `(board_id, filter_hash)`.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: RwLock<HashMap<(String, String), CachedSnapshot>>,
}

impl SnapshotCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a live cached snapshot, if any.
    pub async fn get(&self, board_id: &str, filter_hash: &str) -> Option<PortfolioSnapshot> {
        let entries = self.entries.read().await;
        let cached = entries.get(&(board_id.to_string(), filter_hash.to_string()))?;
        if cached.expires_at <= Utc::now() {
            return None;
        }
        Some(cached.snapshot.clone())
    }

    /// Stores a snapshot with the given TTL.
    pub async fn put(&self, filter_hash: String, snapshot: PortfolioSnapshot, ttl: Duration) {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let key = (snapshot.board_id.clone(), filter_hash);
        self.entries
            .write()
            .await
            .insert(key, CachedSnapshot { snapshot, expires_at });
    }

    /// Drops every cached snapshot for a board (any filter).
    pub async fn invalidate_board(&self, board_id: &str) {
        self.entries
            .write()
            .await
            .retain(|(board, _), _| board != board_id);
    }

    /// Returns the number of cached entries (expired included).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The portfolio aggregation service.
///
/// Fed by sync completion callbacks (board issue sets and closed-sprint
/// stats); serves cached, recomputable snapshots to the query surface.
#[derive(Debug)]
pub struct PortfolioService {
    config: PortfolioConfig,
    detector: MetaBoardDetector,
    cache: SnapshotCache,
    board_issues: RwLock<HashMap<String, Vec<CanonicalRecord>>>,
    history: RwLock<HashMap<String, Vec<SprintStat>>>,
    capacities: RwLock<HashMap<String, f64>>,
}

impl PortfolioService {
    /// Creates a service.
    #[must_use]
    pub fn new(config: PortfolioConfig) -> Self {
        Self {
            config,
            detector: MetaBoardDetector::new(config.detector),
            cache: SnapshotCache::new(),
            board_issues: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            capacities: RwLock::new(HashMap::new()),
        }
    }

    /// Records a completed sync cycle for a board: re-runs meta-board
    /// detection, stores the issue set, and invalidates cached snapshots.
    pub async fn record_board_sync(
        &self,
        board_id: &str,
        issues: &[CanonicalRecord],
    ) -> Detection {
        let detection = self.detector.observe(board_id, issues).await;
        self.board_issues
            .write()
            .await
            .insert(board_id.to_string(), issues.to_vec());
        self.cache.invalidate_board(board_id).await;
        detection
    }

    /// Records a closed sprint's stats for velocity history.
    pub async fn record_sprint_stat(&self, stat: SprintStat) {
        self.history
            .write()
            .await
            .entry(stat.project_key.clone())
            .or_default()
            .push(stat);
    }

    /// Sets a project's available capacity (points per sprint).
    pub async fn set_capacity(&self, project_key: impl Into<String>, available: f64) {
        self.capacities.write().await.insert(project_key.into(), available);
    }

    /// Drops cached snapshots for a board (e.g. when a contributing
    /// resource finished syncing outside a full board pass).
    pub async fn invalidate_board(&self, board_id: &str) {
        self.cache.invalidate_board(board_id).await;
    }

    /// Returns whether a board is currently classified as a meta-board.
    pub async fn is_meta_board(&self, board_id: &str) -> bool {
        self.detector.is_meta_board(board_id).await
    }

    /// Returns a board's workstreams.
    pub async fn workstreams(&self, board_id: &str) -> Vec<ProjectWorkstream> {
        self.detector.workstreams(board_id).await
    }

    /// Returns the portfolio snapshot for a meta-board.
    ///
    /// Served from cache when a live entry exists for
    /// `(board_id, filter_hash)`; recomputed otherwise.
    ///
    /// # Errors
    ///
    /// - `NotMetaBoard` when the board is not (or no longer) classified.
    /// - `NoBoardData` when no synced issue set exists.
    /// - `InvalidFilter` when the filter value cannot be hashed.
    pub async fn snapshot(
        &self,
        board_id: &str,
        window: SnapshotWindow,
        filters: &serde_json::Value,
    ) -> Result<PortfolioSnapshot> {
        if !self.detector.is_meta_board(board_id).await {
            return Err(PortfolioError::NotMetaBoard {
                board_id: board_id.to_string(),
            });
        }

        let filter_hash = canonical_json::content_hash_hex(&serde_json::json!({
            "window": window,
            "filters": filters,
        }))
        .map_err(|e| PortfolioError::InvalidFilter {
            message: e.to_string(),
        })?;

        if let Some(cached) = self.cache.get(board_id, &filter_hash).await {
            return Ok(cached);
        }

        let snapshot = self.compute(board_id, window, filters).await?;
        let ttl = match window {
            SnapshotWindow::RealTime => self.config.realtime_ttl,
            SnapshotWindow::Historical => self.config.historical_ttl,
        };
        self.cache.put(filter_hash, snapshot.clone(), ttl).await;
        Ok(snapshot)
    }

    async fn compute(
        &self,
        board_id: &str,
        window: SnapshotWindow,
        filters: &serde_json::Value,
    ) -> Result<PortfolioSnapshot> {
        let issues = {
            let boards = self.board_issues.read().await;
            boards
                .get(board_id)
                .cloned()
                .ok_or_else(|| PortfolioError::NoBoardData {
                    board_id: board_id.to_string(),
                })?
        };

        let project_filter: Option<Vec<String>> = filters
            .get("projects")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });

        let mut by_project: HashMap<&str, Vec<&CanonicalRecord>> = HashMap::new();
        for issue in &issues {
            let Some(project) = issue.project_key.as_deref() else {
                continue;
            };
            if let Some(filter) = &project_filter {
                if !filter.iter().any(|p| p == project) {
                    continue;
                }
            }
            by_project.entry(project).or_default().push(issue);
        }

        let history = self.history.read().await;
        let capacities = self.capacities.read().await;

        let mut rollups = Vec::with_capacity(by_project.len());
        let mut all_samples = Vec::new();
        let mut capacity_utils = Vec::new();
        let mut blocked_total = 0usize;
        let mut cross_project_total = 0usize;
        let mut issue_total = 0usize;
        let now = Utc::now();

        let mut projects: Vec<&str> = by_project.keys().copied().collect();
        projects.sort_unstable();

        for project in projects {
            let project_issues = &by_project[project];
            let project_history = history.get(project).map(Vec::as_slice).unwrap_or_default();

            let mut remaining = 0.0;
            let mut completed = 0.0;
            let mut allocated = 0.0;
            let mut blocked = 0usize;
            for issue in project_issues {
                let points = issue.story_points.unwrap_or(0.0);
                allocated += points;
                if is_done(issue) {
                    completed += points;
                } else {
                    remaining += points;
                }
                if issue.blocked {
                    blocked += 1;
                }
                if issue.labels.iter().any(|l| l == CROSS_PROJECT_LABEL) {
                    cross_project_total += 1;
                }
            }

            let velocity = rolling_velocity(project_history, self.config.velocity_window);
            let samples = velocity_samples(project_history);
            all_samples.extend_from_slice(&samples);

            let available = capacities
                .get(project)
                .copied()
                .or(velocity)
                .unwrap_or(0.0);
            let capacity = CapacityUtilization {
                allocated,
                available,
            };
            capacity_utils.push(capacity);

            let forecast = self.project_forecast(&samples, velocity, remaining, now);

            blocked_total += blocked;
            issue_total += project_issues.len();

            rollups.push(ProjectRollup {
                project_key: project.to_string(),
                velocity,
                capacity,
                forecast,
                remaining_points: remaining,
                completed_points: completed,
                total_issues: project_issues.len(),
                blocked_issues: blocked,
            });
        }

        let risk = risk_score(&RiskInput {
            velocity_cv: coefficient_of_variation(&all_samples),
            capacities: &capacity_utils,
            blocked_issues: blocked_total,
            cross_project_issues: cross_project_total,
            total_issues: issue_total,
        });

        Ok(PortfolioSnapshot {
            board_id: board_id.to_string(),
            window,
            computed_at: now,
            rollups,
            risk,
        })
    }

    /// Builds a project's forecast from its velocity samples, when they
    /// can parameterize the triangular distribution.
    fn project_forecast(
        &self,
        samples: &[f64],
        velocity: Option<f64>,
        remaining: f64,
        now: DateTime<Utc>,
    ) -> Option<Forecast> {
        if samples.is_empty() || remaining <= 0.0 {
            return None;
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() || max <= 0.0 {
            return None;
        }
        let mode = velocity.unwrap_or(max).clamp(min, max);

        monte_carlo(
            &ForecastInput {
                remaining_points: remaining,
                velocity_min: min.max(0.0),
                velocity_mode: mode,
                velocity_max: max,
                sprint_length_days: self.config.sprint_length_days,
                trials: self.config.forecast_trials,
                seed: self.config.forecast_seed,
            },
            now,
        )
        .map_err(|err| {
            tracing::warn!(error = %err, "Forecast skipped for project");
            err
        })
        .ok()
    }
}

fn is_done(issue: &CanonicalRecord) -> bool {
    issue
        .status
        .as_deref()
        .is_some_and(|s| DONE_STATUSES.contains(&s.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ResourceKey;
    use chrono::TimeZone;
    use serde_json::json;

    fn issue(id: &str, project: &str, points: f64, status: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(ResourceKey::issue(id), id);
        record.project_key = Some(project.to_string());
        record.story_points = Some(points);
        record.status = Some(status.to_string());
        record
    }

    fn sprint_stat(project: &str, sprint: &str, points: f64, day: u32) -> SprintStat {
        SprintStat {
            sprint_id: sprint.to_string(),
            project_key: project.to_string(),
            completed_points: points,
            committed_points: points,
            closed_at: Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).single().expect("valid ts"),
        }
    }

    fn board_issues() -> Vec<CanonicalRecord> {
        vec![
            issue("A-1", "ALPHA", 5.0, "in_progress"),
            issue("B-1", "BETA", 3.0, "todo"),
            issue("A-2", "ALPHA", 2.0, "done"),
            issue("G-1", "GAMMA", 8.0, "in_progress"),
        ]
    }

    fn test_config() -> PortfolioConfig {
        PortfolioConfig {
            forecast_trials: 500,
            forecast_seed: Some(7),
            ..PortfolioConfig::default()
        }
    }

    async fn meta_board_service() -> PortfolioService {
        let service = PortfolioService::new(test_config());
        // Two cycles to satisfy hysteresis.
        service.record_board_sync("board-1", &board_issues()).await;
        service.record_board_sync("board-1", &board_issues()).await;
        service
    }

    #[tokio::test]
    async fn snapshot_has_one_rollup_per_project() {
        let service = meta_board_service().await;

        let snapshot = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");

        // {"ALPHA","BETA","ALPHA","GAMMA"}: exactly 3 rollups.
        assert_eq!(snapshot.rollups.len(), 3);
        let keys: Vec<&str> = snapshot.rollups.iter().map(|r| r.project_key.as_str()).collect();
        assert_eq!(keys, vec!["ALPHA", "BETA", "GAMMA"]);

        let alpha = &snapshot.rollups[0];
        assert!((alpha.remaining_points - 5.0).abs() < 1e-9);
        assert!((alpha.completed_points - 2.0).abs() < 1e-9);
        assert_eq!(alpha.total_issues, 2);
    }

    #[tokio::test]
    async fn non_meta_board_is_rejected() {
        let service = PortfolioService::new(test_config());
        // One cycle only: hysteresis not yet satisfied.
        service.record_board_sync("board-1", &board_issues()).await;

        let err = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect_err("not yet meta");
        assert!(matches!(err, PortfolioError::NotMetaBoard { .. }));
    }

    #[tokio::test]
    async fn snapshot_is_cached_until_invalidated() {
        let service = meta_board_service().await;

        let first = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        let second = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        // Identical computed_at proves the cache served the second call.
        assert_eq!(first.computed_at, second.computed_at);

        // A completed sync invalidates.
        service.record_board_sync("board-1", &board_issues()).await;
        let third = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        assert!(third.computed_at >= first.computed_at);
    }

    #[tokio::test]
    async fn different_filters_cache_separately() {
        let service = meta_board_service().await;

        let all = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        let filtered = service
            .snapshot(
                "board-1",
                SnapshotWindow::RealTime,
                &json!({"projects": ["ALPHA"]}),
            )
            .await
            .expect("snapshot");

        assert_eq!(all.rollups.len(), 3);
        assert_eq!(filtered.rollups.len(), 1);
        assert_eq!(filtered.rollups[0].project_key, "ALPHA");
    }

    #[tokio::test]
    async fn velocity_and_forecast_come_from_history() {
        let service = meta_board_service().await;
        for (i, points) in [18.0, 22.0, 20.0].iter().enumerate() {
            service
                .record_sprint_stat(sprint_stat("ALPHA", &format!("s{i}"), *points, (i as u32) * 7 + 1))
                .await;
        }

        let snapshot = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");

        let alpha = snapshot
            .rollups
            .iter()
            .find(|r| r.project_key == "ALPHA")
            .expect("alpha");
        assert!(alpha.velocity.is_some());
        let forecast = alpha.forecast.as_ref().expect("forecast");
        assert!(forecast.p50_sprints >= 1);
        assert!(forecast.p50_sprints <= forecast.p95_sprints);

        // Projects without history have no forecast.
        let beta = snapshot
            .rollups
            .iter()
            .find(|r| r.project_key == "BETA")
            .expect("beta");
        assert!(beta.forecast.is_none());
        assert!(beta.velocity.is_none());
    }

    #[tokio::test]
    async fn risk_breakdown_is_present() {
        let service = meta_board_service().await;
        let snapshot = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        assert!(snapshot.risk.composite <= 100);
        // The factor breakdown always accompanies the composite.
        assert!(snapshot.risk.factors.velocity_variability >= 0.0);
        assert!(snapshot.risk.factors.blocked_pressure >= 0.0);
    }

    #[tokio::test]
    async fn cache_ttl_expires() {
        let config = PortfolioConfig {
            realtime_ttl: Duration::from_millis(10),
            ..test_config()
        };
        let service = PortfolioService::new(config);
        service.record_board_sync("board-1", &board_issues()).await;
        service.record_board_sync("board-1", &board_issues()).await;

        let first = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = service
            .snapshot("board-1", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect("snapshot");
        assert!(second.computed_at > first.computed_at, "expired entry must recompute");
    }

    #[tokio::test]
    async fn missing_board_data_is_reported() {
        let service = PortfolioService::new(test_config());
        // Force classification without data by observing empty issue sets
        // with threshold 0 semantics: instead, observe real data then drop
        // it is not possible, so assert the NoBoardData path directly.
        let err = service
            .compute("missing", SnapshotWindow::RealTime, &json!({}))
            .await
            .expect_err("no data");
        assert!(matches!(err, PortfolioError::NoBoardData { .. }));
    }

    #[tokio::test]
    async fn snapshot_cache_invalidation_is_per_board() {
        let cache = SnapshotCache::new();
        let snapshot = PortfolioSnapshot {
            board_id: "board-1".into(),
            window: SnapshotWindow::RealTime,
            computed_at: Utc::now(),
            rollups: Vec::new(),
            risk: risk_score(&RiskInput {
                velocity_cv: 0.0,
                capacities: &[],
                blocked_issues: 0,
                cross_project_issues: 0,
                total_issues: 0,
            }),
        };
        let mut other = snapshot.clone();
        other.board_id = "board-2".into();

        cache
            .put("h1".into(), snapshot, Duration::from_secs(60))
            .await;
        cache.put("h2".into(), other, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 2);

        cache.invalidate_board("board-1").await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("board-2", "h2").await.is_some());
        assert!(cache.get("board-1", "h1").await.is_none());
    }
}
