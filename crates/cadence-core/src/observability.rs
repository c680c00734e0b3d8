//! Observability infrastructure for Cadence.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across all Cadence
//! components.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(crate::error::Error::InvalidInput(format!(
                "log format must be 'json' or 'pretty' (got {other})"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cadence_sync=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for sync operations with standard fields.
#[must_use]
pub fn sync_span(operation: &str, resource_type: &str, resource_id: &str) -> Span {
    tracing::info_span!(
        "sync",
        op = operation,
        resource_type = resource_type,
        resource_id = resource_id,
    )
}

/// Creates a span for webhook ingestion operations.
#[must_use]
pub fn ingest_span(operation: &str, event_id: &str) -> Span {
    tracing::info_span!("ingest", op = operation, event_id = event_id)
}
