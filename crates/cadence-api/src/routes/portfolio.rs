//! Portfolio snapshot routes.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use cadence_portfolio::{PortfolioSnapshot, ProjectWorkstream, SnapshotWindow};

use crate::error::ApiResult;
use crate::server::AppState;

/// Query parameters for portfolio snapshots.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    /// View window; defaults to real-time.
    pub window: Option<SnapshotWindow>,
    /// Comma-separated project keys to restrict the rollup to.
    pub projects: Option<String>,
}

/// `GET /v1/boards/:board_id/portfolio`
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<PortfolioSnapshot>> {
    let window = query.window.unwrap_or(SnapshotWindow::RealTime);

    let filters = match &query.projects {
        Some(projects) => {
            let keys: Vec<&str> = projects
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            json!({ "projects": keys })
        }
        None => json!({}),
    };

    let snapshot = state
        .portfolio()
        .snapshot(&board_id, window, &filters)
        .await?;
    Ok(Json(snapshot))
}

/// `GET /v1/boards/:board_id/workstreams`
pub async fn get_workstreams(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
) -> ApiResult<Json<Vec<ProjectWorkstream>>> {
    Ok(Json(state.portfolio().workstreams(&board_id).await))
}
