//! API server implementation.
//!
//! Wires the sync engine, ingest pipeline, and portfolio service into one
//! `axum` router and owns the application state shared by all handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use cadence_core::{CanonicalRecord, MemoryLeaseStore, Result};
use cadence_portfolio::{DetectorConfig, PortfolioConfig, PortfolioService};
use cadence_sync::{
    EngineConfig, IngestConfig, IngestPipeline, MemorySyncStateStore, QueueConfig,
    SyncCompletionListener, SyncEngine, SyncStateStore, WorkerPool,
};
use cadence_tracker::{InMemoryTracker, IssueTrackerClient};

use crate::config::Config;
use crate::routes;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    engine: Arc<SyncEngine>,
    pipeline: Arc<IngestPipeline>,
    portfolio: Arc<PortfolioService>,
    metrics_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("metrics", &self.metrics_handle.is_some())
            .finish_non_exhaustive()
    }
}

/// Routes completed syncs into the portfolio service: board passes re-run
/// meta-board detection, individual completions invalidate cached
/// snapshots.
struct PortfolioBridge {
    portfolio: Arc<PortfolioService>,
}

#[async_trait]
impl SyncCompletionListener for PortfolioBridge {
    async fn on_sync_completed(&self, record: &CanonicalRecord) {
        if let Some(board_id) = record.board_id.as_deref() {
            self.portfolio.invalidate_board(board_id).await;
        }
    }

    async fn on_board_synced(&self, board_id: &str, issues: &[CanonicalRecord]) {
        self.portfolio.record_board_sync(board_id, issues).await;
    }
}

impl AppState {
    /// Creates application state around the given tracker client, with
    /// in-memory stores.
    pub async fn new(config: Config, tracker: Arc<dyn IssueTrackerClient>) -> Self {
        let store: Arc<dyn SyncStateStore> = Arc::new(MemorySyncStateStore::new());
        let leases = Arc::new(MemoryLeaseStore::new());

        let engine = Arc::new(SyncEngine::new(
            tracker,
            store,
            leases,
            EngineConfig::default(),
        ));

        let pipeline = Arc::new(IngestPipeline::new(IngestConfig {
            retention: config.retention(),
            queue: QueueConfig {
                capacity: config.queue_capacity,
                soft_watermark: (config.queue_capacity * 4) / 5,
                overflow: config.queue_overflow,
            },
            ..IngestConfig::default()
        }));

        let portfolio = Arc::new(PortfolioService::new(PortfolioConfig {
            detector: DetectorConfig {
                threshold: config.meta_board_threshold,
                hysteresis_cycles: config.meta_board_hysteresis,
            },
            realtime_ttl: std::time::Duration::from_secs(config.snapshot_realtime_ttl_secs),
            historical_ttl: std::time::Duration::from_secs(config.snapshot_historical_ttl_secs),
            ..PortfolioConfig::default()
        }));

        engine
            .add_listener(Arc::new(PortfolioBridge {
                portfolio: Arc::clone(&portfolio),
            }))
            .await;

        Self {
            config,
            engine,
            pipeline,
            portfolio,
            metrics_handle: None,
        }
    }

    /// Creates state against the in-memory fake tracker (tests and local
    /// development).
    pub async fn in_memory(config: Config) -> (Self, Arc<InMemoryTracker>) {
        let tracker = Arc::new(InMemoryTracker::new());
        let state = Self::new(config, Arc::clone(&tracker) as Arc<dyn IssueTrackerClient>).await;
        (state, tracker)
    }

    /// Attaches the Prometheus render handle for `/metrics`.
    #[must_use]
    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Returns the sync engine.
    #[must_use]
    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// Returns the ingest pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Arc<IngestPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Returns the portfolio service.
    #[must_use]
    pub fn portfolio(&self) -> Arc<PortfolioService> {
        Arc::clone(&self.portfolio)
    }

    /// Returns the sync state store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn SyncStateStore> {
        self.engine.store()
    }

    /// Spawns the ingest worker pool for this state.
    #[must_use]
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(
            self.config.workers,
            Arc::clone(&self.pipeline),
            self.engine.clone(),
        )
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/v1/webhooks/tracker", post(routes::webhooks::receive))
        .route(
            "/v1/sync/:resource_type/:resource_id",
            get(routes::sync::get_sync_status),
        )
        .route("/v1/sync", get(routes::sync::list_sync_states))
        .route("/v1/events/failed", get(routes::sync::list_failed_events))
        .route("/v1/conflicts", get(routes::conflicts::list_conflicts))
        .route(
            "/v1/conflicts/:id/resolve",
            post(routes::conflicts::resolve_conflict),
        )
        .route(
            "/v1/boards/:board_id/portfolio",
            get(routes::portfolio::get_snapshot),
        )
        .route(
            "/v1/boards/:board_id/workstreams",
            get(routes::portfolio::get_workstreams),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the API until ctrl-c.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| cadence_core::Error::Internal {
            message: format!("failed to bind {addr}: {e}"),
        })?;

    tracing::info!(addr = %addr, "Cadence API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| cadence_core::Error::Internal {
            message: format!("server error: {e}"),
        })
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn ready() -> axum::Json<ReadyResponse> {
    axum::Json(ReadyResponse { ready: true })
}

async fn metrics(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
