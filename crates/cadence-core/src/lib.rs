//! # cadence-core
//!
//! Core abstractions for the Cadence synchronization & aggregation engine.
//!
//! This crate provides the foundational types and traits used across all
//! Cadence components:
//!
//! - **Identifiers**: Strongly-typed IDs and the external [`ResourceKey`]
//! - **Canonical Records**: The mapping-normalized resource representation
//! - **Canonical JSON**: Deterministic encoding + SHA-256 content hashing
//! - **Retry Policies**: Explicit, injectable backoff policies
//! - **Sync Leases**: CAS-acquired, TTL-bounded per-resource ownership
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `cadence-core` is the **only** crate allowed to define shared
//! primitives. All cross-component interaction happens via the types
//! defined here.
//!
//! ## Example
//!
//! ```rust
//! use cadence_core::prelude::*;
//!
//! let key = ResourceKey::issue("ABC-1");
//! let record = CanonicalRecord::new(key, "10001");
//! let hash = record.content_hash().expect("hash");
//! assert_eq!(hash.len(), 64);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical_json;
pub mod error;
pub mod id;
pub mod lease;
pub mod observability;
pub mod record;
pub mod retry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use cadence_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::canonical_json::{content_hash_hex, to_canonical_bytes, to_canonical_string};
    pub use crate::error::{Error, Result};
    pub use crate::id::{ConflictId, EventId, ResourceKey, ResourceType, SyncRunId};
    pub use crate::lease::{AcquireOutcome, LeaseStore, MemoryLeaseStore, SyncLease};
    pub use crate::record::CanonicalRecord;
    pub use crate::retry::RetryPolicy;
}

// Re-export key types at crate root for ergonomics
pub use canonical_json::{CanonicalJsonError, content_hash_hex, to_canonical_bytes, to_canonical_string};
pub use error::{Error, Result};
pub use id::{ConflictId, EventId, ResourceKey, ResourceType, SyncRunId};
pub use lease::{AcquireOutcome, DEFAULT_LEASE_TTL, LeaseStore, MemoryLeaseStore, SyncLease, new_holder_id};
pub use observability::{LogFormat, init_logging};
pub use record::CanonicalRecord;
pub use retry::RetryPolicy;
