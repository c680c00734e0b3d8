//! HTTP implementation of the tracker client.
//!
//! All requests pass through a single token-bucket rate limiter shared
//! across the worker pool, so the tracker's global quota is respected
//! regardless of per-worker concurrency. A worker waiting for a token
//! yields rather than occupying a thread.
//!
//! Transient failures (network errors, 5xx, rate-limit responses) are
//! retried per the injected [`RetryPolicy`]; permanent failures (auth,
//! 404) are returned immediately.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;

use cadence_core::{ResourceType, RetryPolicy};

use crate::client::IssueTrackerClient;
use crate::error::{Result, TrackerError};
use crate::raw::{ChangeCursor, RawIssue, RawRecord};

/// Shared tracker-quota token bucket.
pub type TrackerLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the HTTP tracker client.
#[derive(Clone)]
pub struct HttpTrackerConfig {
    /// Tracker base URL (e.g. `https://tracker.example.com`).
    pub base_url: String,
    /// Bearer token for API access.
    pub token: String,
    /// Global request quota per minute, shared across all workers.
    pub requests_per_minute: u32,
    /// Burst capacity above the steady rate.
    pub burst: u32,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for HttpTrackerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTrackerConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("requests_per_minute", &self.requests_per_minute)
            .field("burst", &self.burst)
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpTrackerConfig {
    /// Creates a config with default quota (300 req/min, burst 30) and
    /// retry policy.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            requests_per_minute: 300,
            burst: 30,
            retry: RetryPolicy::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL or token is empty.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(TrackerError::Config {
                message: "base_url must not be empty".into(),
            });
        }
        if self.token.trim().is_empty() {
            return Err(TrackerError::Config {
                message: "token must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// HTTP tracker client.
#[derive(Clone)]
pub struct HttpTrackerClient {
    config: HttpTrackerConfig,
    client: reqwest::Client,
    limiter: Arc<TrackerLimiter>,
}

impl std::fmt::Debug for HttpTrackerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTrackerClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wire shape of a single remote resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRecord {
    id: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    fields: serde_json::Value,
}

/// Wire shape of a paginated list response.
#[derive(Debug, Deserialize)]
struct RemotePage {
    values: Vec<RemoteRecord>,
}

impl HttpTrackerClient {
    /// Creates a new client with its own shared rate limiter.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: HttpTrackerConfig) -> Result<Self> {
        config.validate()?;

        let rate = NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(rate).allow_burst(burst);
        let limiter = Arc::new(RateLimiter::direct(quota));

        Self::with_limiter(config, limiter)
    }

    /// Creates a new client sharing an existing rate limiter.
    ///
    /// Use this when several clients (e.g. polling and backfill) must share
    /// one tracker quota.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn with_limiter(config: HttpTrackerConfig, limiter: Arc<TrackerLimiter>) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Ok(Self {
            config,
            client,
            limiter,
        })
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> Arc<TrackerLimiter> {
        Arc::clone(&self.limiter)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.config
            .retry
            .run(TrackerError::is_retryable, |_attempt| async move {
                self.request_once(path, query).await
            })
            .await
    }

    async fn request_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        // Shared global quota; waiting yields the task.
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.config.token)
            .query(query)
            .send()
            .await
            .map_err(|e| TrackerError::transient_with_source("tracker request failed", e))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                TrackerError::InvalidResponse {
                    message: format!("failed to parse tracker response: {e}"),
                }
            });
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => Err(TrackerError::Auth { message }),
            404 => Err(TrackerError::NotFound { resource: path.to_string() }),
            429 => Err(TrackerError::RateLimited { retry_after }),
            _ => Err(TrackerError::transient(format!(
                "tracker returned {status}: {message}"
            ))),
        }
    }
}

fn to_raw(resource_type: ResourceType, remote: RemoteRecord) -> RawRecord {
    RawRecord::new(resource_type, remote.id, remote.updated_at, remote.fields)
}

#[async_trait]
impl IssueTrackerClient for HttpTrackerClient {
    async fn fetch_resource(&self, resource_type: ResourceType, id: &str) -> Result<RawRecord> {
        let path = format!("rest/api/resources/{resource_type}/{id}");
        let remote: RemoteRecord = self.get_json(&path, &[]).await?;
        Ok(to_raw(resource_type, remote))
    }

    async fn list_changed_since(
        &self,
        resource_type: ResourceType,
        cursor: Option<&ChangeCursor>,
    ) -> Result<Vec<RawRecord>> {
        let path = format!("rest/api/resources/{resource_type}");
        let page: RemotePage = match cursor {
            Some(cursor) => {
                self.get_json(&path, &[("changedSince", cursor.as_str())])
                    .await?
            }
            None => self.get_json(&path, &[]).await?,
        };
        Ok(page
            .values
            .into_iter()
            .map(|r| to_raw(resource_type, r))
            .collect())
    }

    async fn fetch_board_sprint_issues(
        &self,
        board_id: &str,
        sprint_id: &str,
    ) -> Result<Vec<RawIssue>> {
        let path = format!("rest/api/boards/{board_id}/sprints/{sprint_id}/issues");
        let page: RemotePage = self.get_json(&path, &[]).await?;
        Ok(page
            .values
            .into_iter()
            .map(|r| to_raw(ResourceType::Issue, r))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;

    fn test_config(base_url: String) -> HttpTrackerConfig {
        HttpTrackerConfig {
            retry: RetryPolicy::none(),
            ..HttpTrackerConfig::new(base_url, "test-token")
        }
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn config_validation() {
        assert!(HttpTrackerConfig::new("", "tok").validate().is_err());
        assert!(HttpTrackerConfig::new("https://t", "").validate().is_err());
        assert!(HttpTrackerConfig::new("https://t", "tok").validate().is_ok());
    }

    #[test]
    fn debug_redacts_token() {
        let config = HttpTrackerConfig::new("https://t", "super-secret");
        let dbg = format!("{config:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("super-secret"));
    }

    #[tokio::test]
    async fn fetch_resource_parses_record() {
        let app = Router::new().route(
            "/rest/api/resources/issue/ABC-1",
            get(|| async {
                axum::Json(json!({
                    "id": "ABC-1",
                    "updatedAt": "2025-06-01T10:00:00Z",
                    "fields": {"summary": "Fix login", "project": {"key": "ABC"}}
                }))
            }),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let record = client
            .fetch_resource(ResourceType::Issue, "ABC-1")
            .await
            .expect("fetch");
        assert_eq!(record.resource_id, "ABC-1");
        assert_eq!(record.project_key(), Some("ABC"));
    }

    #[tokio::test]
    async fn list_changed_since_sends_cursor() {
        let app = Router::new().route(
            "/rest/api/resources/issue",
            get(
                |axum::extract::Query(q): axum::extract::Query<
                    std::collections::HashMap<String, String>,
                >| async move {
                    assert_eq!(q.get("changedSince").map(String::as_str), Some("2025-06-01T00:00:00+00:00"));
                    axum::Json(json!({
                        "values": [
                            {"id": "ABC-1", "updatedAt": "2025-06-01T10:00:00Z", "fields": {}},
                            {"id": "ABC-2", "updatedAt": "2025-06-01T11:00:00Z", "fields": {}}
                        ]
                    }))
                },
            ),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let cursor = ChangeCursor::new("2025-06-01T00:00:00+00:00");
        let records = client
            .list_changed_since(ResourceType::Issue, Some(&cursor))
            .await
            .expect("list");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let app = Router::new().route(
            "/rest/api/resources/issue/ABC-1",
            get(|| async { (StatusCode::UNAUTHORIZED, axum::Json(json!({"message": "bad token"}))) }),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let err = client
            .fetch_resource(ResourceType::Issue, "ABC-1")
            .await
            .expect_err("should fail");
        assert!(matches!(err, TrackerError::Auth { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn missing_resource_maps_to_not_found() {
        let app = Router::new().route(
            "/rest/api/resources/issue/NOPE-1",
            get(|| async { (StatusCode::NOT_FOUND, axum::Json(json!({"message": "gone"}))) }),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let err = client
            .fetch_resource(ResourceType::Issue, "NOPE-1")
            .await
            .expect_err("should fail");
        assert!(matches!(err, TrackerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn server_error_maps_to_transient() {
        let app = Router::new().route(
            "/rest/api/resources/sprint/9",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let err = client
            .fetch_resource(ResourceType::Sprint, "9")
            .await
            .expect_err("should fail");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let app = Router::new().route(
            "/rest/api/resources/issue/ABC-1",
            get(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("retry-after", "30")],
                    "slow down",
                )
            }),
        );
        let base_url = spawn_server(app).await;
        let client = HttpTrackerClient::new(test_config(base_url)).expect("client");

        let err = client
            .fetch_resource(ResourceType::Issue, "ABC-1")
            .await
            .expect_err("should fail");
        let TrackerError::RateLimited { retry_after } = err else {
            panic!("expected rate limited, got {err:?}");
        };
        assert_eq!(retry_after, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn clients_can_share_one_limiter() {
        let quota = Quota::per_minute(NonZeroU32::new(60).expect("nonzero"));
        let limiter = Arc::new(RateLimiter::direct(quota));

        let a = HttpTrackerClient::with_limiter(
            test_config("https://tracker-a".into()),
            Arc::clone(&limiter),
        )
        .expect("client a");
        let b = HttpTrackerClient::with_limiter(test_config("https://tracker-b".into()), limiter)
            .expect("client b");

        assert!(Arc::ptr_eq(&a.limiter(), &b.limiter()));
    }
}
