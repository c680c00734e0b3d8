//! Worker pool draining the ingest queues.
//!
//! N tokio tasks each claim one event at a time from the shared queues.
//! The queue claim protocol guarantees a resource is owned by at most one
//! worker, so per-resource processing is serialized while independent
//! resources proceed in parallel. Workers waiting on rate-limit backoff or
//! empty queues yield their slot rather than occupying a thread.
//!
//! Shutdown is cooperative: a watch signal stops the claim loops; an
//! in-flight event finishes (or fails) before its worker exits, and lease
//! TTLs reclaim anything a killed process left behind.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ingest::{EventProcessor, IngestPipeline};
use crate::metrics;

/// Idle poll fallback when no wakeup arrives (missed-notify safety net).
const IDLE_POLL: Duration = Duration::from_millis(200);

/// A pool of event-processing workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `workers` tasks processing events from `pipeline` through
    /// `processor`.
    #[must_use]
    pub fn spawn(
        workers: usize,
        pipeline: Arc<IngestPipeline>,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let pipeline = Arc::clone(&pipeline);
                let processor = Arc::clone(&processor);
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    worker_loop(worker_id, &pipeline, processor.as_ref(), &mut shutdown_rx).await;
                })
            })
            .collect();

        Self { handles, shutdown }
    }

    /// Signals shutdown and waits for all workers to finish their
    /// in-flight events.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: &IngestPipeline,
    processor: &dyn EventProcessor,
    shutdown: &mut watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "Ingest worker started");
    let queues = pipeline.queues();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match pipeline.process_next(processor).await {
            Ok(Some((event_id, status))) => {
                tracing::debug!(worker_id, %event_id, ?status, "Event processed");
                metrics::record_queue_depth(queues.total_depth().await);
            }
            Ok(None) => {
                // No claimable work (or a retry was re-queued): wait for a
                // wakeup, a shutdown, or the idle poll fallback.
                tokio::select! {
                    () = queues.wait_for_work() => {}
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
            Err(err) => {
                // Infrastructure failure: the event was re-queued; back
                // off before the next claim so a broken store does not
                // spin the pool.
                tracing::error!(worker_id, error = %err, "Infrastructure error in worker");
                tokio::select! {
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    tracing::debug!(worker_id, "Ingest worker stopped");
}
