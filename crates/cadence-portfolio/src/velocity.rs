//! Per-project velocity and capacity math.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed sprint's outcome for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintStat {
    /// The sprint.
    pub sprint_id: String,
    /// The contributing project.
    pub project_key: String,
    /// Story points completed in the sprint.
    pub completed_points: f64,
    /// Story points committed at sprint start.
    pub committed_points: f64,
    /// When the sprint closed.
    pub closed_at: DateTime<Utc>,
}

/// Rolling weighted average velocity over the `window` most recent closed
/// sprints.
///
/// Recent sprints weigh heavier (linear weights: the newest of `n`
/// sprints has weight `n`, the oldest weight 1). Returns `None` with no
/// history.
#[must_use]
pub fn rolling_velocity(history: &[SprintStat], window: usize) -> Option<f64> {
    if history.is_empty() || window == 0 {
        return None;
    }

    let mut sprints: Vec<&SprintStat> = history.iter().collect();
    sprints.sort_by_key(|s| s.closed_at);
    let recent = &sprints[sprints.len().saturating_sub(window)..];

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (index, sprint) in recent.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let weight = (index + 1) as f64;
        weighted_sum += sprint.completed_points * weight;
        weight_total += weight;
    }
    Some(weighted_sum / weight_total)
}

/// Velocity samples (completed points per sprint), oldest first.
#[must_use]
pub fn velocity_samples(history: &[SprintStat]) -> Vec<f64> {
    let mut sprints: Vec<&SprintStat> = history.iter().collect();
    sprints.sort_by_key(|s| s.closed_at);
    sprints.iter().map(|s| s.completed_points).collect()
}

/// Coefficient of variation (stddev / mean) of velocity samples.
///
/// Returns 0 for fewer than two samples or a zero mean.
#[must_use]
pub fn coefficient_of_variation(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Allocated vs. available capacity for one project.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityUtilization {
    /// Points allocated (committed) to the project in the current sprint.
    pub allocated: f64,
    /// Points the project's team can absorb.
    pub available: f64,
}

impl CapacityUtilization {
    /// Utilization ratio; 0 when no capacity is available.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.available.abs() < f64::EPSILON {
            0.0
        } else {
            self.allocated / self.available
        }
    }

    /// Whether the project is allocated beyond its capacity.
    #[must_use]
    pub fn is_over_allocated(&self) -> bool {
        self.ratio() > 1.0
    }
}
