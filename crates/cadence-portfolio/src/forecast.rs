//! Monte Carlo completion forecasting.
//!
//! Completion is forecast by sampling per-sprint velocity from a
//! triangular distribution parameterized by (min, most-likely, max)
//! historical velocity and simulating sprints until the remaining work is
//! burned down. The report is the resulting distribution's percentiles
//! (P50/P80/P95), never a single point estimate.
//!
//! The RNG is seedable so forecasts are reproducible in tests and
//! replayable for audit.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PortfolioError, Result};

/// Default number of simulation trials.
pub const DEFAULT_TRIALS: u32 = 10_000;

/// Ceiling on simulated sprints per trial, to bound degenerate runs.
const MAX_SPRINTS_PER_TRIAL: u32 = 1_000;

/// Forecast input parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastInput {
    /// Story points remaining.
    pub remaining_points: f64,
    /// Historical minimum velocity.
    pub velocity_min: f64,
    /// Historical most-likely velocity.
    pub velocity_mode: f64,
    /// Historical maximum velocity.
    pub velocity_max: f64,
    /// Sprint length in days (for date projection).
    pub sprint_length_days: u32,
    /// Number of simulation trials.
    pub trials: u32,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl ForecastInput {
    fn validate(&self) -> Result<()> {
        if self.velocity_min < 0.0
            || self.velocity_max < self.velocity_min
            || self.velocity_mode < self.velocity_min
            || self.velocity_mode > self.velocity_max
        {
            return Err(PortfolioError::InvalidForecastInput {
                message: format!(
                    "velocity parameters must satisfy 0 <= min <= mode <= max (got {}, {}, {})",
                    self.velocity_min, self.velocity_mode, self.velocity_max
                ),
            });
        }
        if !self.remaining_points.is_finite() || self.remaining_points < 0.0 {
            return Err(PortfolioError::InvalidForecastInput {
                message: format!("remaining points must be non-negative ({})", self.remaining_points),
            });
        }
        if self.trials == 0 {
            return Err(PortfolioError::InvalidForecastInput {
                message: "trial count must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// A completion forecast: sprint-count and date percentiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Sprints to completion at the 50th percentile.
    pub p50_sprints: u32,
    /// Sprints to completion at the 80th percentile.
    pub p80_sprints: u32,
    /// Sprints to completion at the 95th percentile.
    pub p95_sprints: u32,
    /// Projected completion date at the 50th percentile.
    pub p50_date: DateTime<Utc>,
    /// Projected completion date at the 80th percentile.
    pub p80_date: DateTime<Utc>,
    /// Projected completion date at the 95th percentile.
    pub p95_date: DateTime<Utc>,
    /// Trials simulated.
    pub trials: u32,
}

/// Runs the Monte Carlo simulation.
///
/// # Errors
///
/// Returns `InvalidForecastInput` for inconsistent parameters and
/// `DegenerateVelocity` when the velocity range cannot burn work down
/// (all parameters effectively zero).
pub fn monte_carlo(input: &ForecastInput, start: DateTime<Utc>) -> Result<Forecast> {
    input.validate()?;

    if input.velocity_max < f64::EPSILON && input.remaining_points > 0.0 {
        return Err(PortfolioError::DegenerateVelocity {
            project_key: String::new(),
            message: "maximum historical velocity is zero".to_string(),
        });
    }

    let mut rng = match input.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut outcomes: Vec<u32> = (0..input.trials)
        .map(|_| simulate_trial(input, &mut rng))
        .collect();
    outcomes.sort_unstable();

    let p50 = percentile(&outcomes, 50);
    let p80 = percentile(&outcomes, 80);
    let p95 = percentile(&outcomes, 95);

    let sprint_days = i64::from(input.sprint_length_days.max(1));
    let date_for = |sprints: u32| start + Duration::days(sprint_days * i64::from(sprints));

    Ok(Forecast {
        p50_sprints: p50,
        p80_sprints: p80,
        p95_sprints: p95,
        p50_date: date_for(p50),
        p80_date: date_for(p80),
        p95_date: date_for(p95),
        trials: input.trials,
    })
}

fn simulate_trial(input: &ForecastInput, rng: &mut StdRng) -> u32 {
    let mut remaining = input.remaining_points;
    let mut sprints = 0u32;

    while remaining > 0.0 && sprints < MAX_SPRINTS_PER_TRIAL {
        let velocity = sample_triangular(
            rng,
            input.velocity_min,
            input.velocity_mode,
            input.velocity_max,
        );
        sprints += 1;
        if velocity > 0.0 {
            remaining -= velocity;
        }
    }
    sprints
}

/// Samples the triangular distribution via the inverse CDF.
fn sample_triangular(rng: &mut StdRng, min: f64, mode: f64, max: f64) -> f64 {
    let range = max - min;
    if range < f64::EPSILON {
        return min;
    }
    let u: f64 = rng.r#gen();
    let cut = (mode - min) / range;
    if u < cut {
        min + (u * range * (mode - min)).sqrt()
    } else {
        max - ((1.0 - u) * range * (max - mode)).sqrt()
    }
}

/// Nearest-rank percentile of a sorted sample.
fn percentile(sorted: &[u32], pct: u32) -> u32 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (u64::from(pct) * sorted.len() as u64).div_ceil(100);
    let index = usize::try_from(rank.saturating_sub(1)).unwrap_or(0);
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("valid ts")
    }

    fn input() -> ForecastInput {
        ForecastInput {
            remaining_points: 100.0,
            velocity_min: 10.0,
            velocity_mode: 20.0,
            velocity_max: 30.0,
            sprint_length_days: 14,
            trials: 2_000,
            seed: Some(42),
        }
    }

    #[test]
    fn percentiles_are_monotone() {
        let forecast = monte_carlo(&input(), start()).expect("forecast");
        assert!(forecast.p50_sprints <= forecast.p80_sprints);
        assert!(forecast.p80_sprints <= forecast.p95_sprints);
        assert!(forecast.p50_date <= forecast.p95_date);
    }

    #[test]
    fn forecast_is_deterministic_with_seed() {
        let a = monte_carlo(&input(), start()).expect("forecast");
        let b = monte_carlo(&input(), start()).expect("forecast");
        assert_eq!(a, b);
    }

    #[test]
    fn forecast_brackets_plain_division() {
        // 100 points at ~20/sprint: P50 near 5 sprints, never below the
        // best case (100/30 → 4) nor above the worst (100/10 → 10).
        let forecast = monte_carlo(&input(), start()).expect("forecast");
        assert!(forecast.p50_sprints >= 4, "p50={}", forecast.p50_sprints);
        assert!(forecast.p95_sprints <= 10, "p95={}", forecast.p95_sprints);
    }

    #[test]
    fn dates_follow_sprint_length() {
        let forecast = monte_carlo(&input(), start()).expect("forecast");
        let expected = start() + Duration::days(14 * i64::from(forecast.p50_sprints));
        assert_eq!(forecast.p50_date, expected);
    }

    #[test]
    fn zero_remaining_completes_immediately() {
        let forecast = monte_carlo(
            &ForecastInput {
                remaining_points: 0.0,
                ..input()
            },
            start(),
        )
        .expect("forecast");
        assert_eq!(forecast.p95_sprints, 0);
        assert_eq!(forecast.p50_date, start());
    }

    #[test]
    fn invalid_range_is_rejected() {
        let err = monte_carlo(
            &ForecastInput {
                velocity_min: 30.0,
                velocity_mode: 20.0,
                velocity_max: 10.0,
                ..input()
            },
            start(),
        )
        .expect_err("invalid");
        assert!(matches!(err, PortfolioError::InvalidForecastInput { .. }));
    }

    #[test]
    fn zero_velocity_is_degenerate() {
        let err = monte_carlo(
            &ForecastInput {
                velocity_min: 0.0,
                velocity_mode: 0.0,
                velocity_max: 0.0,
                ..input()
            },
            start(),
        )
        .expect_err("degenerate");
        assert!(matches!(err, PortfolioError::DegenerateVelocity { .. }));
    }

    #[test]
    fn zero_trials_is_rejected() {
        let err = monte_carlo(
            &ForecastInput {
                trials: 0,
                ..input()
            },
            start(),
        )
        .expect_err("invalid");
        assert!(matches!(err, PortfolioError::InvalidForecastInput { .. }));
    }

    #[test]
    fn constant_velocity_is_exact() {
        // min == mode == max == 20: every trial takes exactly 5 sprints.
        let forecast = monte_carlo(
            &ForecastInput {
                velocity_min: 20.0,
                velocity_mode: 20.0,
                velocity_max: 20.0,
                ..input()
            },
            start(),
        )
        .expect("forecast");
        assert_eq!(forecast.p50_sprints, 5);
        assert_eq!(forecast.p95_sprints, 5);
    }
}
