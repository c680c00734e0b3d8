//! Scheduled polling.
//!
//! Webhooks are the low-latency path; polling is the safety net that
//! catches anything the tracker never delivered. Each cycle runs an
//! incremental sync per configured resource type, advancing a cursor to
//! the cycle's start time only when the pass succeeds, so a failed cycle
//! is re-covered by the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use cadence_core::ResourceType;
use cadence_tracker::ChangeCursor;

use crate::engine::SyncEngine;
use crate::planner::PlanOptions;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between polling cycles.
    pub interval: Duration,
    /// Resource types to poll, in order.
    pub resource_types: Vec<ResourceType>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            resource_types: vec![ResourceType::Issue, ResourceType::Sprint],
        }
    }
}

/// Handle to the running poller task.
pub struct Poller {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}

impl Poller {
    /// Spawns the polling loop.
    #[must_use]
    pub fn spawn(engine: Arc<SyncEngine>, config: PollerConfig) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut cursors: Vec<Option<DateTime<Utc>>> =
                vec![None; config.resource_types.len()];

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                for (slot, resource_type) in config.resource_types.iter().enumerate() {
                    let cycle_start = Utc::now();
                    let options = PlanOptions {
                        since: cursors[slot].map(ChangeCursor::from_timestamp),
                        full_resync: false,
                    };

                    match engine.sync_changed(*resource_type, &options).await {
                        Ok(result) => {
                            tracing::info!(
                                resource_type = %resource_type,
                                synced = result.synced,
                                noops = result.noops,
                                failures = result.failures.len(),
                                conflicts = result.conflicts.len(),
                                "Poll cycle completed"
                            );
                            // Advance the cursor only on success; failed
                            // cycles are re-covered next time.
                            cursors[slot] = Some(cycle_start);
                        }
                        Err(err) => {
                            tracing::warn!(
                                resource_type = %resource_type,
                                error = %err,
                                "Poll cycle failed; cursor not advanced"
                            );
                        }
                    }
                }
            }
        });

        Self { handle, shutdown }
    }

    /// Stops the poller and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
