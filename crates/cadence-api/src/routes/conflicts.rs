//! Conflict query and resolution routes.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use cadence_core::{ConflictId, ResourceType};
use cadence_sync::{ConflictRecord, ConflictResolution, ResolutionStrategy};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Query parameters for listing conflicts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConflictsQuery {
    /// Filter by resource type.
    pub resource_type: Option<ResourceType>,
    /// Filter by resolution status.
    pub status: Option<ConflictResolution>,
}

/// Request body for conflict resolution.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    /// The strategy to apply (`remote_wins` or `local_wins`).
    pub strategy: ResolutionStrategy,
}

/// Response body for conflict resolution.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    /// The conflict that was resolved.
    pub conflict_id: String,
    /// The recorded resolution.
    pub resolution: ConflictResolution,
}

/// `GET /v1/conflicts`
pub async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ListConflictsQuery>,
) -> ApiResult<Json<Vec<ConflictRecord>>> {
    let conflicts = state
        .store()
        .list_conflicts(query.resource_type, query.status)
        .await?;
    Ok(Json(conflicts))
}

/// `POST /v1/conflicts/:id/resolve`
///
/// Idempotent per conflict ID: repeating a resolution with the same
/// strategy returns the recorded outcome without further writes.
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let conflict_id: ConflictId = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid conflict id '{id}'")))?;

    let resolution = state
        .engine()
        .resolve_conflict(conflict_id, request.strategy)
        .await?;

    Ok(Json(ResolveResponse {
        conflict_id: conflict_id.to_string(),
        resolution,
    }))
}
