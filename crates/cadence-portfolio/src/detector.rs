//! Meta-board detection.
//!
//! A board is a meta-board when its current sprint's issues span multiple
//! distinct projects. Detection re-runs on every completed sync of the
//! board's sprint data; composition changes over time and the
//! classification tracks it.
//!
//! Classification flaps are damped with hysteresis: a board is only
//! (re)classified after the threshold comparison agrees for a configurable
//! number of consecutive sync cycles, in both directions. A transient data
//! glitch in one cycle therefore never flips the classification.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use cadence_core::CanonicalRecord;

/// Detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Minimum distinct project keys for meta-board classification.
    pub threshold: usize,
    /// Consecutive agreeing cycles required to change classification.
    pub hysteresis_cycles: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            hysteresis_cycles: 2,
        }
    }
}

/// One contributing project within a meta-board's aggregate view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWorkstream {
    /// The contributing project.
    pub project_key: String,
    /// The board this workstream belongs to.
    pub board_id: String,
    /// When the project was first observed on the board.
    pub detected_at: DateTime<Utc>,
    /// Whether the project appeared in the most recent sync cycle.
    /// Projects that disappear are deactivated, not removed.
    pub is_active: bool,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Distinct project keys observed this cycle.
    pub distinct_projects: usize,
    /// The classification after this cycle.
    pub is_meta_board: bool,
    /// Whether this cycle changed the classification.
    pub changed: bool,
}

/// Per-board detection state.
#[derive(Debug, Default)]
struct BoardState {
    is_meta: bool,
    consecutive_above: u32,
    consecutive_below: u32,
    workstreams: HashMap<String, ProjectWorkstream>,
}

/// The meta-board detector.
#[derive(Debug)]
pub struct MetaBoardDetector {
    config: DetectorConfig,
    boards: RwLock<HashMap<String, BoardState>>,
}

impl MetaBoardDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            boards: RwLock::new(HashMap::new()),
        }
    }

    /// Observes one completed sync cycle of a board's sprint issues.
    pub async fn observe(&self, board_id: &str, issues: &[CanonicalRecord]) -> Detection {
        let projects: BTreeSet<&str> = issues
            .iter()
            .filter_map(|i| i.project_key.as_deref())
            .collect();
        let distinct = projects.len();
        let above = distinct >= self.config.threshold;

        let mut boards = self.boards.write().await;
        let state = boards.entry(board_id.to_string()).or_default();

        if above {
            state.consecutive_above += 1;
            state.consecutive_below = 0;
        } else {
            state.consecutive_below += 1;
            state.consecutive_above = 0;
        }

        let was_meta = state.is_meta;
        if !state.is_meta && state.consecutive_above >= self.config.hysteresis_cycles {
            state.is_meta = true;
            tracing::info!(board_id, distinct, "Board classified as meta-board");
        } else if state.is_meta && state.consecutive_below >= self.config.hysteresis_cycles {
            state.is_meta = false;
            tracing::info!(board_id, distinct, "Board declassified as meta-board");
        }

        // Track workstream membership: new projects join active, absent
        // projects deactivate.
        let now = Utc::now();
        for workstream in state.workstreams.values_mut() {
            workstream.is_active = projects.contains(workstream.project_key.as_str());
        }
        for project in projects {
            state
                .workstreams
                .entry(project.to_string())
                .or_insert_with(|| ProjectWorkstream {
                    project_key: project.to_string(),
                    board_id: board_id.to_string(),
                    detected_at: now,
                    is_active: true,
                });
        }

        Detection {
            distinct_projects: distinct,
            is_meta_board: state.is_meta,
            changed: state.is_meta != was_meta,
        }
    }

    /// Returns the current classification for a board.
    pub async fn is_meta_board(&self, board_id: &str) -> bool {
        let boards = self.boards.read().await;
        boards.get(board_id).is_some_and(|s| s.is_meta)
    }

    /// Returns a board's workstreams (active and inactive), sorted by
    /// project key.
    pub async fn workstreams(&self, board_id: &str) -> Vec<ProjectWorkstream> {
        let boards = self.boards.read().await;
        let mut workstreams: Vec<ProjectWorkstream> = boards
            .get(board_id)
            .map(|s| s.workstreams.values().cloned().collect())
            .unwrap_or_default();
        workstreams.sort_by(|a, b| a.project_key.cmp(&b.project_key));
        workstreams
    }
}

impl Default for MetaBoardDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ResourceKey;

    fn issue(id: &str, project: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(ResourceKey::issue(id), id);
        record.project_key = Some(project.to_string());
        record
    }

    fn multi_project() -> Vec<CanonicalRecord> {
        // {"ALPHA","BETA","ALPHA","GAMMA"}: 3 distinct keys.
        vec![
            issue("A-1", "ALPHA"),
            issue("B-1", "BETA"),
            issue("A-2", "ALPHA"),
            issue("G-1", "GAMMA"),
        ]
    }

    fn single_project() -> Vec<CanonicalRecord> {
        vec![issue("A-1", "ALPHA"), issue("A-2", "ALPHA")]
    }

    #[tokio::test]
    async fn classification_requires_consecutive_cycles() {
        let detector = MetaBoardDetector::default();

        let first = detector.observe("board-1", &multi_project()).await;
        assert_eq!(first.distinct_projects, 3);
        assert!(!first.is_meta_board, "one cycle must not classify");

        let second = detector.observe("board-1", &multi_project()).await;
        assert!(second.is_meta_board);
        assert!(second.changed);
        assert!(detector.is_meta_board("board-1").await);
    }

    #[tokio::test]
    async fn transient_glitch_does_not_flap() {
        let detector = MetaBoardDetector::default();
        detector.observe("board-1", &multi_project()).await;
        detector.observe("board-1", &multi_project()).await;
        assert!(detector.is_meta_board("board-1").await);

        // One below-threshold cycle: still a meta-board.
        detector.observe("board-1", &single_project()).await;
        assert!(detector.is_meta_board("board-1").await);

        // Recovery resets the demotion streak.
        detector.observe("board-1", &multi_project()).await;
        detector.observe("board-1", &single_project()).await;
        assert!(detector.is_meta_board("board-1").await);

        // Two consecutive below-threshold cycles demote.
        let demoted = detector.observe("board-1", &single_project()).await;
        assert!(!demoted.is_meta_board);
        assert!(demoted.changed);
    }

    #[tokio::test]
    async fn glitch_resets_promotion_streak() {
        let detector = MetaBoardDetector::default();
        detector.observe("board-1", &multi_project()).await;
        detector.observe("board-1", &single_project()).await;
        detector.observe("board-1", &multi_project()).await;
        assert!(!detector.is_meta_board("board-1").await);

        detector.observe("board-1", &multi_project()).await;
        assert!(detector.is_meta_board("board-1").await);
    }

    #[tokio::test]
    async fn workstreams_track_membership() {
        let detector = MetaBoardDetector::default();
        detector.observe("board-1", &multi_project()).await;

        let workstreams = detector.workstreams("board-1").await;
        assert_eq!(workstreams.len(), 3);
        assert!(workstreams.iter().all(|w| w.is_active));
        assert_eq!(workstreams[0].project_key, "ALPHA");

        // GAMMA drops out: deactivated, not removed.
        detector
            .observe("board-1", &[issue("A-1", "ALPHA"), issue("B-1", "BETA")])
            .await;
        let workstreams = detector.workstreams("board-1").await;
        assert_eq!(workstreams.len(), 3);
        let gamma = workstreams
            .iter()
            .find(|w| w.project_key == "GAMMA")
            .expect("retained");
        assert!(!gamma.is_active);
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let detector = MetaBoardDetector::new(DetectorConfig {
            threshold: 4,
            hysteresis_cycles: 1,
        });
        let detection = detector.observe("board-1", &multi_project()).await;
        assert!(!detection.is_meta_board, "3 distinct < threshold 4");
    }

    #[tokio::test]
    async fn hysteresis_is_configurable() {
        let detector = MetaBoardDetector::new(DetectorConfig {
            threshold: 2,
            hysteresis_cycles: 1,
        });
        let detection = detector.observe("board-1", &multi_project()).await;
        assert!(detection.is_meta_board, "single cycle suffices at 1");
    }

    #[tokio::test]
    async fn issues_without_project_keys_are_ignored() {
        let detector = MetaBoardDetector::new(DetectorConfig {
            threshold: 2,
            hysteresis_cycles: 1,
        });
        let mut record = CanonicalRecord::new(ResourceKey::issue("X-1"), "X-1");
        record.project_key = None;
        let detection = detector.observe("board-1", &[record, issue("A-1", "ALPHA")]).await;
        assert_eq!(detection.distinct_projects, 1);
        assert!(!detection.is_meta_board);
    }

    #[tokio::test]
    async fn unknown_board_is_not_meta() {
        let detector = MetaBoardDetector::default();
        assert!(!detector.is_meta_board("missing").await);
        assert!(detector.workstreams("missing").await.is_empty());
    }
}
