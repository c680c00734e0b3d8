//! # cadence-api
//!
//! The Cadence HTTP surface: the signed inbound webhook endpoint and the
//! query API (sync status, conflicts, portfolio snapshots) consumed by
//! report and presentation layers.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{AppState, router, serve};
