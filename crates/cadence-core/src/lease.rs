//! Per-resource sync leases.
//!
//! The sync state store is the single source of truth for "who owns this
//! resource's sync right now". Ownership is a lease row acquired by
//! compare-and-set with:
//! - **TTL**: automatic expiry so a crashed worker never wedges a resource
//! - **Fencing sequence**: incremented on every takeover, so a stale holder
//!   can be detected
//! - **Owner-checked release**: releasing only clears a lease the caller
//!   still holds
//!
//! At most one in-progress sync per resource follows directly from the CAS
//! acquire: a second worker observes `Held` and skips the resource.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::id::ResourceKey;

/// Default lease TTL (60 seconds).
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// A held (or observed) sync lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLease {
    /// The resource this lease covers.
    pub resource: ResourceKey,

    /// Unique holder ID.
    pub holder_id: String,

    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,

    /// When the lease expires.
    pub expires_at: DateTime<Utc>,

    /// Monotonically increasing sequence number for fencing.
    ///
    /// Incremented on each acquisition of the same resource, including
    /// takeovers of expired leases.
    pub sequence: u64,
}

impl SyncLease {
    /// Returns whether this lease has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns the remaining TTL, or zero if expired.
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        let remaining = self.expires_at - Utc::now();
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
        }
    }
}

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The lease was acquired.
    Acquired(SyncLease),
    /// Another holder owns a live lease.
    Held {
        /// The current holder.
        holder_id: String,
        /// When the current lease expires.
        expires_at: DateTime<Utc>,
    },
}

impl AcquireOutcome {
    /// Returns the acquired lease, if acquisition succeeded.
    #[must_use]
    pub fn acquired(self) -> Option<SyncLease> {
        match self {
            Self::Acquired(lease) => Some(lease),
            Self::Held { .. } => None,
        }
    }
}

/// Store of per-resource sync leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Attempts to acquire the lease for `resource` once (no retries).
    ///
    /// An expired lease is taken over with an incremented fencing sequence.
    ///
    /// # Errors
    ///
    /// Returns an error only on store-level failures; contention is
    /// reported through [`AcquireOutcome::Held`].
    async fn try_acquire(
        &self,
        resource: &ResourceKey,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome>;

    /// Releases a held lease.
    ///
    /// Returns `true` if the lease was released, `false` if it was no
    /// longer held by the caller (expired and taken over, or already
    /// released). A `false` return is not an error: the takeover already
    /// fenced the caller out.
    ///
    /// # Errors
    ///
    /// Returns an error on store-level failures.
    async fn release(&self, lease: &SyncLease) -> Result<bool>;

    /// Extends a held lease by `additional_ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` if the lease is no longer held by the
    /// caller.
    async fn extend(&self, lease: &mut SyncLease, additional_ttl: Duration) -> Result<()>;

    /// Returns the current lease on `resource`, if any (expired or not).
    async fn current(&self, resource: &ResourceKey) -> Result<Option<SyncLease>>;
}

/// Generates a unique lease holder ID.
#[must_use]
pub fn new_holder_id() -> String {
    Ulid::new().to_string()
}

/// In-memory lease store.
///
/// Backs single-process deployments and tests. The CAS semantics match the
/// trait contract exactly; a persistent implementation would use a
/// conditional write on the lease row instead of a process-local lock.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: RwLock<HashMap<ResourceKey, SyncLease>>,
}

impl MemoryLeaseStore {
    /// Creates an empty lease store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        resource: &ResourceKey,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let mut leases = self.leases.write().await;

        let sequence = match leases.get(resource) {
            Some(existing) if !existing.is_expired() => {
                return Ok(AcquireOutcome::Held {
                    holder_id: existing.holder_id.clone(),
                    expires_at: existing.expires_at,
                });
            }
            // Expired lease: take over, bumping the fencing sequence.
            Some(existing) => existing.sequence.saturating_add(1),
            None => 1,
        };

        let lease = SyncLease {
            resource: resource.clone(),
            holder_id: holder_id.to_string(),
            acquired_at: Utc::now(),
            expires_at: expiry(ttl),
            sequence,
        };
        leases.insert(resource.clone(), lease.clone());
        Ok(AcquireOutcome::Acquired(lease))
    }

    async fn release(&self, lease: &SyncLease) -> Result<bool> {
        let mut leases = self.leases.write().await;
        match leases.get(&lease.resource) {
            Some(current)
                if current.holder_id == lease.holder_id
                    && current.sequence == lease.sequence =>
            {
                leases.remove(&lease.resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, lease: &mut SyncLease, additional_ttl: Duration) -> Result<()> {
        let mut leases = self.leases.write().await;
        match leases.get_mut(&lease.resource) {
            Some(current)
                if current.holder_id == lease.holder_id
                    && current.sequence == lease.sequence =>
            {
                current.expires_at = expiry(additional_ttl);
                lease.expires_at = current.expires_at;
                Ok(())
            }
            Some(current) => Err(Error::PreconditionFailed {
                message: format!(
                    "lease on {} held by {} (sequence {})",
                    lease.resource, current.holder_id, current.sequence
                ),
            }),
            None => Err(Error::PreconditionFailed {
                message: format!("no lease on {}", lease.resource),
            }),
        }
    }

    async fn current(&self, resource: &ResourceKey) -> Result<Option<SyncLease>> {
        let leases = self.leases.read().await;
        Ok(leases.get(resource).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::issue("ABC-1")
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let store = MemoryLeaseStore::new();
        let outcome = store
            .try_acquire(&key(), "worker-1", Duration::from_secs(30))
            .await
            .expect("acquire");

        let lease = outcome.acquired().expect("should acquire");
        assert_eq!(lease.sequence, 1);
        assert!(!lease.is_expired());

        assert!(store.release(&lease).await.expect("release"));
        assert!(store.current(&key()).await.expect("current").is_none());
    }

    #[tokio::test]
    async fn second_acquire_is_held() {
        let store = MemoryLeaseStore::new();
        let _lease = store
            .try_acquire(&key(), "worker-1", Duration::from_secs(30))
            .await
            .expect("acquire")
            .acquired()
            .expect("acquired");

        let outcome = store
            .try_acquire(&key(), "worker-2", Duration::from_secs(30))
            .await
            .expect("acquire");
        match outcome {
            AcquireOutcome::Held { holder_id, .. } => assert_eq!(holder_id, "worker-1"),
            AcquireOutcome::Acquired(_) => panic!("second acquire should be held"),
        }
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over_with_fencing() {
        let store = MemoryLeaseStore::new();
        let lease1 = store
            .try_acquire(&key(), "worker-1", Duration::from_millis(1))
            .await
            .expect("acquire")
            .acquired()
            .expect("acquired");
        assert_eq!(lease1.sequence, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let lease2 = store
            .try_acquire(&key(), "worker-2", Duration::from_secs(30))
            .await
            .expect("acquire")
            .acquired()
            .expect("takeover");
        assert_eq!(lease2.sequence, 2);
        assert_ne!(lease1.holder_id, lease2.holder_id);

        // The fenced-out holder's release is a no-op.
        assert!(!store.release(&lease1).await.expect("release"));
        assert!(store.current(&key()).await.expect("current").is_some());
    }

    #[tokio::test]
    async fn extend_updates_expiry() {
        let store = MemoryLeaseStore::new();
        let mut lease = store
            .try_acquire(&key(), "worker-1", Duration::from_secs(1))
            .await
            .expect("acquire")
            .acquired()
            .expect("acquired");

        store
            .extend(&mut lease, Duration::from_secs(60))
            .await
            .expect("extend");
        assert!(lease.remaining_ttl() > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn extend_fails_after_takeover() {
        let store = MemoryLeaseStore::new();
        let mut lease1 = store
            .try_acquire(&key(), "worker-1", Duration::from_millis(1))
            .await
            .expect("acquire")
            .acquired()
            .expect("acquired");

        tokio::time::sleep(Duration::from_millis(10)).await;

        let _lease2 = store
            .try_acquire(&key(), "worker-2", Duration::from_secs(30))
            .await
            .expect("acquire")
            .acquired()
            .expect("takeover");

        let err = store
            .extend(&mut lease1, Duration::from_secs(30))
            .await
            .expect_err("stale holder must not extend");
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn leases_are_per_resource() {
        let store = MemoryLeaseStore::new();
        let a = store
            .try_acquire(&ResourceKey::issue("A-1"), "w", Duration::from_secs(30))
            .await
            .expect("acquire");
        let b = store
            .try_acquire(&ResourceKey::issue("B-1"), "w", Duration::from_secs(30))
            .await
            .expect("acquire");
        assert!(a.acquired().is_some());
        assert!(b.acquired().is_some());
    }
}
