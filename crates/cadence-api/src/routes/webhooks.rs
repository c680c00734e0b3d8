//! Inbound webhook endpoint.
//!
//! Order of checks matters:
//!
//! 1. Size: oversized bodies are rejected 413 before any work.
//! 2. Signature: HMAC over the raw bytes; 401 on failure, logged as a
//!    security event, no processing.
//! 3. Parse, then durable enqueue; 200 is returned after the enqueue, not
//!    after processing.
//!
//! Duplicate deliveries are acknowledged 200 with `duplicate: true` so
//! well-behaved senders stop redelivering.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::Serialize;

use cadence_sync::{SIGNATURE_HEADER, SubmitOutcome, WebhookEnvelope, metrics, verify_signature};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Acknowledgement body for accepted deliveries.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    /// Whether the delivery was accepted (or recognized as a duplicate).
    pub accepted: bool,
    /// Whether the delivery was a duplicate of a previously seen event.
    pub duplicate: bool,
    /// Internal event ID for accepted, non-duplicate deliveries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// `POST /v1/webhooks/tracker`
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    if body.len() > state.config.webhook_max_body_bytes {
        return Err(ApiError::payload_too_large(format!(
            "payload of {} bytes exceeds limit of {}",
            body.len(),
            state.config.webhook_max_body_bytes
        )));
    }

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(state.config.webhook_secret.as_bytes(), &body, provided) {
        // Security event: log the (unverified) delivery id for
        // traceability, never the payload.
        let claimed_event_id = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("eventId")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
            });
        tracing::warn!(
            claimed_event_id = claimed_event_id.as_deref().unwrap_or("unknown"),
            "Rejected webhook with invalid signature"
        );
        metrics::record_signature_rejected();
        return Err(ApiError::invalid_signature());
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid webhook payload: {e}")))?;

    match state.pipeline().submit(envelope).await? {
        SubmitOutcome::Accepted { event_id } => Ok(Json(WebhookAck {
            accepted: true,
            duplicate: false,
            event_id: Some(event_id.to_string()),
        })),
        SubmitOutcome::Duplicate => Ok(Json(WebhookAck {
            accepted: true,
            duplicate: true,
            event_id: None,
        })),
        SubmitOutcome::Rejected { retry_after } => {
            Err(ApiError::queue_full(retry_after.as_secs().max(1)))
        }
    }
}
