//! # cadence-portfolio
//!
//! Meta-board detection and cross-project portfolio aggregation.
//!
//! A board whose current sprint spans multiple distinct projects is a
//! *meta-board*; this crate classifies boards (with hysteresis against
//! flapping), tracks per-project workstreams, and computes portfolio
//! rollups: rolling weighted velocity, capacity utilization, Monte Carlo
//! completion forecasts (P50/P80/P95), and an explainable 0-100 risk
//! score.
//!
//! Snapshots are derived state, cached with window-dependent TTLs and
//! invalidated on every completed sync of a contributing board. The crate
//! reads canonical records only, never raw tracker payloads.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod detector;
pub mod error;
pub mod forecast;
pub mod risk;
pub mod snapshot;
pub mod velocity;

pub use detector::{Detection, DetectorConfig, MetaBoardDetector, ProjectWorkstream};
pub use error::{PortfolioError, Result};
pub use forecast::{DEFAULT_TRIALS, Forecast, ForecastInput, monte_carlo};
pub use risk::{RiskFactors, RiskInput, RiskScore, risk_score};
pub use snapshot::{
    PortfolioConfig, PortfolioService, PortfolioSnapshot, ProjectRollup, SnapshotCache,
    SnapshotWindow,
};
pub use velocity::{
    CapacityUtilization, SprintStat, coefficient_of_variation, rolling_velocity, velocity_samples,
};
