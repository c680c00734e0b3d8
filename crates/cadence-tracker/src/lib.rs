//! # cadence-tracker
//!
//! The external issue-tracker client capability consumed by the Cadence
//! sync engine.
//!
//! This crate defines:
//!
//! - [`IssueTrackerClient`]: the read-only capability trait
//! - [`RawRecord`] / [`RawIssue`]: raw payloads prior to field mapping
//! - [`TrackerError`]: typed taxonomy separating retryable from permanent
//!   failures
//! - [`HttpTrackerClient`]: reqwest adapter with a shared token-bucket
//!   rate limiter and injected retry policy
//! - [`InMemoryTracker`]: seedable fake with failure injection for tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod http;
pub mod memory;
pub mod raw;

pub use client::IssueTrackerClient;
pub use error::{Result, TrackerError};
pub use http::{HttpTrackerClient, HttpTrackerConfig, TrackerLimiter};
pub use memory::InMemoryTracker;
pub use raw::{ChangeCursor, RawIssue, RawRecord};
