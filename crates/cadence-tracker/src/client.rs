//! The `IssueTrackerClient` capability.

use async_trait::async_trait;

use cadence_core::ResourceType;

use crate::error::Result;
use crate::raw::{ChangeCursor, RawIssue, RawRecord};

/// Read access to the external issue tracker.
///
/// Implementations must surface rate-limit and auth failures as the typed
/// [`TrackerError`](crate::TrackerError) variants so the engine can
/// distinguish them from transient network failures.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; a single client instance is shared across
/// the worker pool.
#[async_trait]
pub trait IssueTrackerClient: Send + Sync {
    /// Fetches a single resource by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids, `Auth` for credential failures,
    /// `RateLimited`/`Transient` for retryable conditions.
    async fn fetch_resource(&self, resource_type: ResourceType, id: &str) -> Result<RawRecord>;

    /// Lists resources changed since the given cursor.
    ///
    /// A `None` cursor returns all resources of the type (used by full
    /// resyncs and first syncs).
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`fetch_resource`](Self::fetch_resource).
    async fn list_changed_since(
        &self,
        resource_type: ResourceType,
        cursor: Option<&ChangeCursor>,
    ) -> Result<Vec<RawRecord>>;

    /// Fetches all issues in one sprint of one board.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`fetch_resource`](Self::fetch_resource).
    async fn fetch_board_sprint_issues(
        &self,
        board_id: &str,
        sprint_id: &str,
    ) -> Result<Vec<RawIssue>>;
}
