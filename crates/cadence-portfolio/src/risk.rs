//! Composite risk scoring.
//!
//! The risk score folds velocity variability, capacity over-allocation,
//! and blocked / cross-project-dependent issue pressure into a single
//! 0-100 composite. The per-factor breakdown is always retained alongside
//! the composite so a score is explainable, never a bare number.

use serde::{Deserialize, Serialize};

use crate::velocity::CapacityUtilization;

/// Factor weights (must sum to 1).
const WEIGHT_VELOCITY: f64 = 0.40;
const WEIGHT_CAPACITY: f64 = 0.35;
const WEIGHT_BLOCKED: f64 = 0.25;

/// Inputs to the risk computation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskInput<'a> {
    /// Coefficient of variation of velocity samples.
    pub velocity_cv: f64,
    /// Capacity utilization per contributing project.
    pub capacities: &'a [CapacityUtilization],
    /// Blocked issues in the current sprint.
    pub blocked_issues: usize,
    /// Issues with cross-project dependencies.
    pub cross_project_issues: usize,
    /// Total issues in the current sprint.
    pub total_issues: usize,
}

/// Per-factor risk breakdown, each normalized to 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    /// Velocity variability pressure.
    pub velocity_variability: f64,
    /// Capacity over-allocation pressure.
    pub capacity_over_allocation: f64,
    /// Blocked / cross-project dependency pressure.
    pub blocked_pressure: f64,
}

/// The composite risk score with its retained breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    /// Composite 0-100 score.
    pub composite: u8,
    /// The factor breakdown behind the composite.
    pub factors: RiskFactors,
}

/// Computes the composite risk score.
#[must_use]
pub fn risk_score(input: &RiskInput<'_>) -> RiskScore {
    // CV of 1.0 (stddev equal to the mean) saturates the factor.
    let velocity_variability = (input.velocity_cv * 100.0).clamp(0.0, 100.0);

    // Average overage across projects; 50% over-allocation saturates.
    let capacity_over_allocation = if input.capacities.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let n = input.capacities.len() as f64;
        let overage: f64 = input
            .capacities
            .iter()
            .map(|c| (c.ratio() - 1.0).max(0.0))
            .sum::<f64>()
            / n;
        (overage * 200.0).clamp(0.0, 100.0)
    };

    // Share of issues blocked or cross-project-dependent.
    let blocked_pressure = if input.total_issues == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let share = (input.blocked_issues + input.cross_project_issues) as f64
            / input.total_issues as f64;
        (share * 100.0).clamp(0.0, 100.0)
    };

    let composite = velocity_variability
        .mul_add(
            WEIGHT_VELOCITY,
            capacity_over_allocation.mul_add(WEIGHT_CAPACITY, blocked_pressure * WEIGHT_BLOCKED),
        )
        .clamp(0.0, 100.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    RiskScore {
        composite: composite.round() as u8,
        factors: RiskFactors {
            velocity_variability,
            capacity_over_allocation,
            blocked_pressure,
        },
    }
}
