//! Cadence API server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use cadence_api::config::Config;
use cadence_api::server::{AppState, serve};
use cadence_core::init_logging;
use cadence_sync::metrics::register_metrics;
use cadence_sync::{Poller, PollerConfig};
use cadence_tracker::{HttpTrackerClient, HttpTrackerConfig, InMemoryTracker, IssueTrackerClient};

/// Interval for pruning the dedup index and expired events.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_logging(config.log_format);
    tracing::info!(?config, "Starting Cadence API");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;
    register_metrics();

    let tracker: Arc<dyn IssueTrackerClient> = match (&config.tracker_base_url, &config.tracker_token)
    {
        (Some(base_url), Some(token)) => {
            let mut tracker_config = HttpTrackerConfig::new(base_url.clone(), token.clone());
            tracker_config.requests_per_minute = config.tracker_rate_per_minute;
            Arc::new(HttpTrackerClient::new(tracker_config).context("tracker client")?)
        }
        _ => {
            tracing::warn!("No tracker configured; using the in-memory fake (dev only)");
            Arc::new(InMemoryTracker::new())
        }
    };

    let state = AppState::new(config, tracker)
        .await
        .with_metrics_handle(metrics_handle);

    let workers = state.spawn_workers();

    let poller = if state.config.poll_interval_secs > 0 {
        Some(Poller::spawn(
            state.engine(),
            PollerConfig {
                interval: Duration::from_secs(state.config.poll_interval_secs),
                ..PollerConfig::default()
            },
        ))
    } else {
        tracing::info!("Scheduled polling disabled; webhooks only");
        None
    };

    // Periodic retention pruning (dedup index + terminal events).
    let pruner = {
        let pipeline = state.pipeline();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let pruned = pipeline.prune().await;
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned expired ingest records");
                }
            }
        })
    };

    let result = serve(state).await;

    pruner.abort();
    if let Some(poller) = poller {
        poller.shutdown().await;
    }
    workers.shutdown().await;

    result.context("server")
}
