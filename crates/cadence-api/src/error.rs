//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use cadence_core::Error as CoreError;
use cadence_portfolio::PortfolioError;
use cadence_sync::SyncError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients; never an internal
    /// stack trace).
    pub message: String,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for a missing or invalid webhook
    /// signature.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SIGNATURE",
            "Webhook signature missing or invalid",
        )
    }

    /// Returns an error response for an oversized payload.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            message,
        )
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for failed preconditions.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            "PRECONDITION_FAILED",
            message,
        )
    }

    /// Returns an error response for a full ingest queue.
    #[must_use]
    pub fn queue_full(retry_after_secs: u64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "QUEUE_FULL",
            "Ingest queue is at capacity; retry later",
        )
        .with_retry_after(retry_after_secs)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } => Self::bad_request(message),
            CoreError::InvalidInput(message) => Self::bad_request(message),
            CoreError::ResourceNotFound { resource_type, id } => {
                Self::not_found(format!("{resource_type} not found: {id}"))
            }
            CoreError::LeaseHeld { resource, holder } => {
                Self::conflict(format!("sync in progress for {resource} (held by {holder})"))
            }
            CoreError::PreconditionFailed { message } => Self::precondition_failed(message),
            CoreError::Store { message, .. }
            | CoreError::Serialization { message }
            | CoreError::Internal { message } => Self::internal(message),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Core(core) => core.into(),
            SyncError::Validation(err) => Self::bad_request(err.to_string()),
            SyncError::ConflictPending { conflict_id, resource } => Self::conflict(format!(
                "resource {resource} halted on conflict {conflict_id}"
            )),
            SyncError::LeaseHeld { resource, holder } => {
                Self::conflict(format!("sync in progress for {resource} (held by {holder})"))
            }
            SyncError::QueueFull { .. } => Self::queue_full(5),
            SyncError::TransientExternal { message }
            | SyncError::PermanentExternal { message } => Self::internal(message),
            SyncError::Store { message, .. } => Self::internal(message),
        }
    }
}

impl From<PortfolioError> for ApiError {
    fn from(value: PortfolioError) -> Self {
        match value {
            PortfolioError::NotMetaBoard { board_id } => {
                Self::conflict(format!("board {board_id} is not a meta-board"))
            }
            PortfolioError::NoBoardData { board_id } => {
                Self::not_found(format!("no synced data for board {board_id}"))
            }
            PortfolioError::InvalidFilter { message } => Self::bad_request(message),
            PortfolioError::DegenerateVelocity { .. }
            | PortfolioError::InvalidForecastInput { .. } => Self::internal(value.to_string()),
        }
    }
}
