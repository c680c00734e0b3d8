//! Sync state store.
//!
//! The store is the durable record of per-resource sync status, conflicts,
//! history, and the canonical records themselves. It is the single source
//! of truth every component reads and writes; the lease store
//! ([`cadence_core::lease`]) decides who may write a given resource at any
//! moment.

pub mod memory;

use async_trait::async_trait;

use cadence_core::{CanonicalRecord, ConflictId, ResourceKey, ResourceType};

use crate::error::Result;
use crate::state::{ConflictRecord, ConflictResolution, SyncHistoryEntry, SyncState, SyncStatus};

pub use memory::MemorySyncStateStore;

/// Durable store of sync state, conflicts, history, and canonical records.
///
/// ## Semantics
///
/// - `SyncState` rows are upserted, never deleted.
/// - History is append-only.
/// - Conflicts live on their resource's state row; they are updated in
///   place on resolution and retained afterwards for audit.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Returns the sync state for a resource, if it has ever been synced.
    async fn get_state(&self, resource: &ResourceKey) -> Result<Option<SyncState>>;

    /// Inserts or replaces the sync state for a resource.
    async fn put_state(&self, state: SyncState) -> Result<()>;

    /// Lists sync states, optionally filtered by type and status.
    async fn list_states(
        &self,
        resource_type: Option<ResourceType>,
        status: Option<SyncStatus>,
    ) -> Result<Vec<SyncState>>;

    /// Appends a history entry.
    async fn append_history(&self, entry: SyncHistoryEntry) -> Result<()>;

    /// Returns the history for a resource, oldest first.
    async fn history(&self, resource: &ResourceKey) -> Result<Vec<SyncHistoryEntry>>;

    /// Lists conflicts, optionally filtered by resource type and
    /// resolution status.
    async fn list_conflicts(
        &self,
        resource_type: Option<ResourceType>,
        resolution: Option<ConflictResolution>,
    ) -> Result<Vec<ConflictRecord>>;

    /// Finds a conflict by ID, returning it with its owning resource.
    async fn find_conflict(&self, id: ConflictId) -> Result<Option<ConflictRecord>>;

    /// Replaces a conflict record on its resource's state row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the resource or conflict is unknown.
    async fn update_conflict(&self, conflict: ConflictRecord) -> Result<()>;

    /// Returns the canonical record for a resource, if any.
    async fn canonical_record(&self, resource: &ResourceKey) -> Result<Option<CanonicalRecord>>;

    /// Inserts or replaces a canonical record.
    async fn put_canonical(&self, record: CanonicalRecord) -> Result<()>;

    /// Deletes a canonical record (resource deleted upstream).
    ///
    /// Deleting a record that does not exist is a no-op.
    async fn delete_canonical(&self, resource: &ResourceKey) -> Result<()>;
}
