//! Canonical record model.
//!
//! A [`CanonicalRecord`] is the internal, mapping-normalized representation
//! of an external tracker resource. The schema is fixed; anything the active
//! mapping set does not place into a typed field lands in the
//! `extra_fields` side-map, so raw dynamic payloads never travel past the
//! field mapping engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical_json::{CanonicalJsonError, content_hash_hex};
use crate::id::ResourceKey;

/// The internal, mapping-normalized representation of an external resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    /// Identity of the resource this record represents.
    pub key: ResourceKey,

    /// The external system's own identifier (may differ from the key id for
    /// trackers that expose both numeric ids and human-readable keys).
    pub external_id: String,

    /// Project key the resource belongs to (e.g. `ALPHA`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,

    /// Short human-readable summary/title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Workflow status (e.g. `in_progress`, `done`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Assignee identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Story point estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_points: Option<f64>,

    /// Sprint the resource is scheduled in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,

    /// Board the resource belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,

    /// Labels / tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Whether the resource is flagged as blocked.
    #[serde(default)]
    pub blocked: bool,

    /// Creation timestamp reported by the tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Last-update timestamp reported by the tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Mapped-but-untyped data: external fields the active mapping set
    /// routed to named internal fields outside the fixed schema.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, serde_json::Value>,
}

impl CanonicalRecord {
    /// Creates an empty canonical record for the given resource.
    #[must_use]
    pub fn new(key: ResourceKey, external_id: impl Into<String>) -> Self {
        Self {
            key,
            external_id: external_id.into(),
            project_key: None,
            summary: None,
            status: None,
            assignee: None,
            story_points: None,
            sprint_id: None,
            board_id: None,
            labels: Vec::new(),
            blocked: false,
            created_at: None,
            updated_at: None,
            extra_fields: BTreeMap::new(),
        }
    }

    /// Computes the content hash of this record's canonical JSON encoding.
    ///
    /// The hash covers the mapped fields only; it is the cheap change /
    /// conflict detection digest stored on `SyncState`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record contains a non-finite number (should
    /// not happen for mapped records, since the mapping engine validates
    /// numeric conversions).
    pub fn content_hash(&self) -> Result<String, CanonicalJsonError> {
        content_hash_hex(self)
    }
}
