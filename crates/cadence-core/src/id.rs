//! Strongly-typed identifiers for Cadence entities.
//!
//! Internally generated identifiers (sync runs, conflicts, ingested events)
//! are ULIDs:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: No coordination required for generation
//!
//! Externally keyed identity is the [`ResourceKey`]: the tracker owns the
//! resource id, so the key is a (resource type, id string) pair rather than
//! a generated value.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::id::{ConflictId, ResourceKey, ResourceType, SyncRunId};
//!
//! let run = SyncRunId::generate();
//! let conflict = ConflictId::generate();
//! let key = ResourceKey::new(ResourceType::Issue, "ABC-1");
//! assert_eq!(key.to_string(), "issue:ABC-1");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = self.0.timestamp_ms();
                chrono::DateTime::from_timestamp_millis(ms as i64)
                    .unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
                    message: format!("invalid {} '{s}': {e}", $label),
                })
            }
        }
    };
}

ulid_id!(
    /// A unique identifier for a single sync run (one reconciliation pass
    /// over one resource).
    SyncRunId,
    "sync run ID"
);

ulid_id!(
    /// A unique identifier for a detected conflict. Resolution is keyed by
    /// this ID, which is what makes repeated resolution idempotent.
    ConflictId,
    "conflict ID"
);

ulid_id!(
    /// A unique internal identifier for an ingested webhook event.
    ///
    /// This is distinct from the external `event_id` delivered by the
    /// tracker, which is the deduplication key.
    EventId,
    "event ID"
);

/// The type of a synchronized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A single issue (story, bug, task).
    Issue,
    /// A sprint / iteration.
    Sprint,
    /// A board aggregating sprints.
    Board,
    /// A project.
    Project,
}

impl ResourceType {
    /// Returns the resource type as a path/key segment.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Sprint => "sprint",
            Self::Board => "board",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "issue" => Ok(Self::Issue),
            "sprint" => Ok(Self::Sprint),
            "board" => Ok(Self::Board),
            "project" => Ok(Self::Project),
            other => Err(Error::InvalidId {
                message: format!("invalid resource type '{other}'"),
            }),
        }
    }
}

/// Identity of a synchronized resource: its type plus the external
/// tracker's identifier.
///
/// Serialized as `"<type>:<id>"` when used as a map key; the engine's
/// per-resource ordering, lease, and queue guarantees are all scoped to
/// this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// The resource type.
    pub resource_type: ResourceType,
    /// The external identifier assigned by the tracker (e.g. `ABC-1`).
    pub resource_id: String,
}

impl ResourceKey {
    /// Creates a new resource key.
    #[must_use]
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Convenience constructor for issue keys.
    #[must_use]
    pub fn issue(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Issue, id)
    }

    /// Convenience constructor for sprint keys.
    #[must_use]
    pub fn sprint(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Sprint, id)
    }

    /// Convenience constructor for board keys.
    #[must_use]
    pub fn board(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Board, id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (type_part, id_part) = s.split_once(':').ok_or_else(|| Error::InvalidId {
            message: format!("resource key '{s}' must be '<type>:<id>'"),
        })?;
        if id_part.is_empty() {
            return Err(Error::InvalidId {
                message: format!("resource key '{s}' has an empty id"),
            });
        }
        Ok(Self::new(type_part.parse::<ResourceType>()?, id_part))
    }
}
