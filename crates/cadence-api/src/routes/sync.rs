//! Sync status query routes.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use cadence_core::{ResourceKey, ResourceType};
use cadence_sync::{SyncState, SyncStatus, WebhookEvent};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Query parameters for listing sync states.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStatesQuery {
    /// Filter by resource type.
    pub resource_type: Option<ResourceType>,
    /// Filter by sync status.
    pub status: Option<SyncStatus>,
}

/// `GET /v1/sync/:resource_type/:resource_id`
pub async fn get_sync_status(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<SyncState>> {
    let resource_type: ResourceType = resource_type.parse()?;
    let key = ResourceKey::new(resource_type, resource_id);

    let sync_state = state
        .store()
        .get_state(&key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no sync state for {key}")))?;
    Ok(Json(sync_state))
}

/// `GET /v1/sync`
pub async fn list_sync_states(
    State(state): State<AppState>,
    Query(query): Query<ListStatesQuery>,
) -> ApiResult<Json<Vec<SyncState>>> {
    let states = state
        .store()
        .list_states(query.resource_type, query.status)
        .await?;
    Ok(Json(states))
}

/// `GET /v1/events/failed`
///
/// The operator queue: webhook events that exhausted their retries.
pub async fn list_failed_events(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    Ok(Json(state.pipeline().list_failed().await))
}
