//! Raw records as returned by the external tracker.
//!
//! Raw payloads are arbitrary JSON shapes that vary per tracker instance.
//! They exist only between the client and the field mapping engine; nothing
//! downstream of mapping touches them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{ResourceKey, ResourceType};

/// A raw resource as fetched from the tracker, before field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// The resource type.
    pub resource_type: ResourceType,

    /// The tracker's identifier for the resource.
    pub resource_id: String,

    /// The tracker-reported last-update timestamp.
    pub updated_at: DateTime<Utc>,

    /// The unparsed field payload.
    pub fields: serde_json::Value,
}

impl RawRecord {
    /// Creates a raw record.
    #[must_use]
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        updated_at: DateTime<Utc>,
        fields: serde_json::Value,
    ) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
            updated_at,
            fields,
        }
    }

    /// Returns the resource key for this record.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, self.resource_id.clone())
    }

    /// Extracts the project key from the raw payload, if present.
    ///
    /// Looks for `fields.project.key` first (nested tracker shape), then a
    /// top-level `projectKey` string.
    #[must_use]
    pub fn project_key(&self) -> Option<&str> {
        self.fields
            .get("project")
            .and_then(|p| p.get("key"))
            .and_then(serde_json::Value::as_str)
            .or_else(|| self.fields.get("projectKey").and_then(serde_json::Value::as_str))
    }
}

/// A raw issue within a board's sprint, as returned by
/// `fetch_board_sprint_issues`.
pub type RawIssue = RawRecord;

/// Opaque incremental-sync cursor.
///
/// Wraps the tracker's "changed since" watermark. The planner treats it as
/// opaque; the HTTP client encodes it as an RFC3339 timestamp query
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(String);

impl ChangeCursor {
    /// Creates a cursor from a raw watermark string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Creates a cursor from a timestamp.
    #[must_use]
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.to_rfc3339())
    }

    /// Returns the raw cursor value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
