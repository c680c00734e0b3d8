//! Server configuration.
//!
//! All runtime configuration comes from `CADENCE_*` environment variables;
//! defaults target local development. Secrets are redacted from Debug
//! output.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use cadence_core::{Error, LogFormat, Result};
use cadence_sync::OverflowPolicy;

/// Configuration for the Cadence API server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Shared secret for webhook HMAC signatures.
    pub webhook_secret: String,

    /// Maximum accepted webhook payload size in bytes.
    pub webhook_max_body_bytes: usize,

    /// Retention window for event dedup records, in hours.
    pub webhook_retention_hours: u64,

    /// Per-resource ingest queue capacity.
    pub queue_capacity: usize,

    /// Queue overflow policy (`block` or `reject`).
    pub queue_overflow: OverflowPolicy,

    /// Ingest worker count.
    pub workers: usize,

    /// Distinct-project threshold for meta-board classification.
    pub meta_board_threshold: usize,

    /// Consecutive agreeing sync cycles required to (re)classify.
    pub meta_board_hysteresis: u32,

    /// TTL for real-time portfolio snapshots, in seconds.
    pub snapshot_realtime_ttl_secs: u64,

    /// TTL for historical portfolio snapshots, in seconds.
    pub snapshot_historical_ttl_secs: u64,

    /// Tracker base URL; unset runs against the in-memory fake (dev only).
    pub tracker_base_url: Option<String>,

    /// Tracker bearer token.
    pub tracker_token: Option<String>,

    /// Global tracker request quota per minute.
    pub tracker_rate_per_minute: u32,

    /// Interval between scheduled polling cycles, in seconds. Zero
    /// disables polling (webhooks only).
    pub poll_interval_secs: u64,

    /// Log output format (`json` or `pretty`).
    #[serde(skip)]
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("webhook_secret", &"[REDACTED]")
            .field("webhook_max_body_bytes", &self.webhook_max_body_bytes)
            .field("webhook_retention_hours", &self.webhook_retention_hours)
            .field("queue_capacity", &self.queue_capacity)
            .field("queue_overflow", &self.queue_overflow)
            .field("workers", &self.workers)
            .field("meta_board_threshold", &self.meta_board_threshold)
            .field("meta_board_hysteresis", &self.meta_board_hysteresis)
            .field("tracker_base_url", &self.tracker_base_url)
            .field(
                "tracker_token",
                &self.tracker_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("tracker_rate_per_minute", &self.tracker_rate_per_minute)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            webhook_secret: String::new(),
            webhook_max_body_bytes: 1024 * 1024,
            webhook_retention_hours: 24,
            queue_capacity: 1000,
            queue_overflow: OverflowPolicy::Reject,
            workers: 4,
            meta_board_threshold: 2,
            meta_board_hysteresis: 2,
            snapshot_realtime_ttl_secs: 5 * 60,
            snapshot_historical_ttl_secs: 60 * 60,
            tracker_base_url: None,
            tracker_token: None,
            tracker_rate_per_minute: 300,
            poll_interval_secs: 5 * 60,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `CADENCE_HTTP_PORT`
    /// - `CADENCE_WEBHOOK_SECRET` (required outside dev)
    /// - `CADENCE_WEBHOOK_MAX_BODY_BYTES`
    /// - `CADENCE_WEBHOOK_RETENTION_HOURS`
    /// - `CADENCE_QUEUE_CAPACITY`
    /// - `CADENCE_QUEUE_OVERFLOW` (`block` | `reject`)
    /// - `CADENCE_WORKERS`
    /// - `CADENCE_META_BOARD_THRESHOLD`
    /// - `CADENCE_META_BOARD_HYSTERESIS`
    /// - `CADENCE_SNAPSHOT_REALTIME_TTL_SECS`
    /// - `CADENCE_SNAPSHOT_HISTORICAL_TTL_SECS`
    /// - `CADENCE_TRACKER_BASE_URL`
    /// - `CADENCE_TRACKER_TOKEN`
    /// - `CADENCE_TRACKER_RATE_PER_MINUTE`
    /// - `CADENCE_POLL_INTERVAL_SECS` (0 disables polling)
    /// - `CADENCE_LOG_FORMAT` (`json` | `pretty`)
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed,
    /// or if validation fails.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("CADENCE_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(secret) = env_string("CADENCE_WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }
        if let Some(bytes) = env_usize("CADENCE_WEBHOOK_MAX_BODY_BYTES")? {
            config.webhook_max_body_bytes = bytes;
        }
        if let Some(hours) = env_u64("CADENCE_WEBHOOK_RETENTION_HOURS")? {
            config.webhook_retention_hours = hours;
        }
        if let Some(capacity) = env_usize("CADENCE_QUEUE_CAPACITY")? {
            config.queue_capacity = capacity;
        }
        if let Some(overflow) = env_string("CADENCE_QUEUE_OVERFLOW") {
            config.queue_overflow = parse_overflow("CADENCE_QUEUE_OVERFLOW", &overflow)?;
        }
        if let Some(workers) = env_usize("CADENCE_WORKERS")? {
            config.workers = workers;
        }
        if let Some(threshold) = env_usize("CADENCE_META_BOARD_THRESHOLD")? {
            config.meta_board_threshold = threshold;
        }
        if let Some(hysteresis) = env_u32("CADENCE_META_BOARD_HYSTERESIS")? {
            config.meta_board_hysteresis = hysteresis;
        }
        if let Some(ttl) = env_u64("CADENCE_SNAPSHOT_REALTIME_TTL_SECS")? {
            config.snapshot_realtime_ttl_secs = ttl;
        }
        if let Some(ttl) = env_u64("CADENCE_SNAPSHOT_HISTORICAL_TTL_SECS")? {
            config.snapshot_historical_ttl_secs = ttl;
        }
        config.tracker_base_url = env_string("CADENCE_TRACKER_BASE_URL");
        config.tracker_token = env_string("CADENCE_TRACKER_TOKEN");
        if let Some(rate) = env_u32("CADENCE_TRACKER_RATE_PER_MINUTE")? {
            config.tracker_rate_per_minute = rate;
        }
        if let Some(interval) = env_u64("CADENCE_POLL_INTERVAL_SECS")? {
            config.poll_interval_secs = interval;
        }
        if let Some(format) = env_string("CADENCE_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.tracker_base_url.is_some() && self.tracker_token.is_none() {
            return Err(Error::InvalidInput(
                "CADENCE_TRACKER_TOKEN is required when CADENCE_TRACKER_BASE_URL is set"
                    .to_string(),
            ));
        }
        if self.meta_board_threshold == 0 {
            return Err(Error::InvalidInput(
                "CADENCE_META_BOARD_THRESHOLD must be at least 1".to_string(),
            ));
        }
        if self.meta_board_hysteresis == 0 {
            return Err(Error::InvalidInput(
                "CADENCE_META_BOARD_HYSTERESIS must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidInput(
                "CADENCE_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the dedup retention window as a `Duration`.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.webhook_retention_hours * 60 * 60)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn parse_overflow(name: &str, value: &str) -> Result<OverflowPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "block" => Ok(OverflowPolicy::Block),
        "reject" => Ok(OverflowPolicy::Reject),
        other => Err(Error::InvalidInput(format!(
            "{name} must be one of: block, reject (got {other})"
        ))),
    }
}
