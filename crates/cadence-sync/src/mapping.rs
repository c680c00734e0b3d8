//! Field mapping engine.
//!
//! Normalizes raw external-system fields into [`CanonicalRecord`]s using
//! versioned, user-configurable mapping rules. `apply` is a pure function
//! of `(raw record, mapping set)`: no clock, no store, no global state, so
//! historical syncs replay deterministically against the mapping version
//! that was in effect at sync time.
//!
//! A sync run captures one [`MappingSet`] up front and applies it for the
//! whole batch; there is no implicit "latest wins" mid-batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cadence_core::{CanonicalRecord, ResourceType};
use cadence_tracker::RawRecord;

/// Mapping failure, naming the offending field and record.
#[derive(Debug, thiserror::Error)]
pub enum FieldMappingError {
    /// Validation failed and no default value was configured.
    #[error("validation failed for field '{field}' on {record}: {reason}")]
    Validation {
        /// The record being mapped (resource key).
        record: String,
        /// The internal field that failed validation.
        field: String,
        /// Why validation failed.
        reason: String,
    },

    /// A transformation rule could not be applied.
    #[error("transformation failed for field '{field}' on {record}: {reason}")]
    Transformation {
        /// The record being mapped (resource key).
        record: String,
        /// The internal field being produced.
        field: String,
        /// Why the transformation failed.
        reason: String,
    },
}

/// How an external field value is transformed into an internal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TransformationRule {
    /// Copy the external value unchanged.
    DirectCopy,
    /// Extract a nested value by dot-separated path (e.g. `project.key`).
    NestedValue {
        /// Dot-separated path into the raw payload.
        path: String,
    },
    /// Render the value into a template; `{}` is replaced with the value's
    /// string form.
    StringFormat {
        /// Template containing a single `{}` placeholder.
        template: String,
    },
    /// Coerce the value to a number (numbers pass through; numeric strings
    /// are parsed).
    NumericConversion,
    /// Parse a date/time string with the given `chrono` format and emit
    /// RFC3339. The format may describe a full timestamp or a bare date.
    DateFormat {
        /// `chrono` format string (e.g. `%Y/%m/%d`).
        format: String,
    },
    /// Choose between two values based on another raw field's value.
    Conditional {
        /// Raw field (dot path) to inspect.
        field: String,
        /// Value to compare against.
        equals: Value,
        /// Result when equal.
        then_value: Value,
        /// Result otherwise.
        else_value: Value,
    },
}

/// Validation applied after transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// The value must be present (not null/absent).
    Required,
    /// The value must be a non-empty string.
    NonEmptyString,
    /// The value must be a number within `[min, max]`.
    NumericRange {
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// The value must be one of the listed values.
    OneOf {
        /// Allowed values.
        values: Vec<Value>,
    },
}

/// One configured field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// The external field to read (top-level key, or the anchor for
    /// `NestedValue` paths).
    pub external_field_id: String,

    /// The external field's declared type (informational; kept for the
    /// administrative surface).
    pub external_field_type: String,

    /// The internal canonical field to write.
    pub internal_field: String,

    /// The transformation to apply.
    pub transformation: TransformationRule,

    /// Validation applied to the transformed value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,

    /// Fallback used when validation fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// A versioned, immutable set of field mappings for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSet {
    /// Monotonically increasing version.
    pub version: u32,
    /// Resource type this set applies to.
    pub resource_type: ResourceType,
    /// The mappings, applied in order.
    pub mappings: Vec<FieldMapping>,
}

impl MappingSet {
    /// The built-in default mapping, used for resources synced before any
    /// mapping configuration exists. Guarantees the pipeline always
    /// produces a canonical record with zero configuration.
    ///
    /// Version 0 is reserved for this set.
    #[must_use]
    pub fn builtin_default(resource_type: ResourceType) -> Self {
        let direct = |external: &str, internal: &str| FieldMapping {
            external_field_id: external.to_string(),
            external_field_type: "any".to_string(),
            internal_field: internal.to_string(),
            transformation: TransformationRule::DirectCopy,
            validation: None,
            default_value: None,
        };

        Self {
            version: 0,
            resource_type,
            mappings: vec![
                direct("summary", "summary"),
                direct("status", "status"),
                direct("assignee", "assignee"),
                FieldMapping {
                    external_field_id: "storyPoints".to_string(),
                    external_field_type: "number".to_string(),
                    internal_field: "storyPoints".to_string(),
                    transformation: TransformationRule::NumericConversion,
                    validation: None,
                    default_value: None,
                },
                FieldMapping {
                    external_field_id: "project".to_string(),
                    external_field_type: "object".to_string(),
                    internal_field: "projectKey".to_string(),
                    transformation: TransformationRule::NestedValue {
                        path: "project.key".to_string(),
                    },
                    validation: None,
                    default_value: None,
                },
                direct("sprintId", "sprintId"),
                direct("boardId", "boardId"),
                direct("labels", "labels"),
                direct("blocked", "blocked"),
            ],
        }
    }
}

/// Result of a lenient mapping pass: a partially-mapped record plus the
/// fields that failed validation.
#[derive(Debug, Clone)]
pub struct PartialMapping {
    /// The record with every valid field mapped; failed fields are marked
    /// in `extra_fields` under `missingFields`.
    pub record: CanonicalRecord,
    /// Internal field names that failed validation with no default.
    pub missing_fields: Vec<String>,
}

/// Registry of versioned mapping sets.
///
/// Mutated only through the administrative surface; the engine reads it to
/// capture the active set at the start of each run and to look up
/// historical versions for replay.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    sets: HashMap<(ResourceType, u32), Arc<MappingSet>>,
    active: HashMap<ResourceType, u32>,
}

impl MappingRegistry {
    /// Creates an empty registry; every resource type resolves to the
    /// built-in default mapping until a set is registered and activated.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping set. Does not activate it.
    pub fn register(&mut self, set: MappingSet) {
        self.sets
            .insert((set.resource_type, set.version), Arc::new(set));
    }

    /// Activates a registered version for a resource type.
    ///
    /// Returns `false` if the version is unknown.
    pub fn activate(&mut self, resource_type: ResourceType, version: u32) -> bool {
        if self.sets.contains_key(&(resource_type, version)) {
            self.active.insert(resource_type, version);
            true
        } else {
            false
        }
    }

    /// Returns the currently active set for a resource type, falling back
    /// to the built-in default.
    #[must_use]
    pub fn active_set(&self, resource_type: ResourceType) -> Arc<MappingSet> {
        self.active
            .get(&resource_type)
            .and_then(|v| self.sets.get(&(resource_type, *v)))
            .cloned()
            .unwrap_or_else(|| Arc::new(MappingSet::builtin_default(resource_type)))
    }

    /// Returns a specific historical version, if registered. Version 0
    /// always resolves to the built-in default.
    #[must_use]
    pub fn set_at(&self, resource_type: ResourceType, version: u32) -> Option<Arc<MappingSet>> {
        if version == 0 {
            return Some(Arc::new(MappingSet::builtin_default(resource_type)));
        }
        self.sets.get(&(resource_type, version)).cloned()
    }
}

/// Applies a mapping set to a raw record, producing a canonical record.
///
/// Pure: identical inputs produce identical output. Raw top-level fields
/// not consumed by any mapping land in `extra_fields`.
///
/// # Errors
///
/// Returns [`FieldMappingError`] when a transformation cannot be applied
/// or validation fails with no configured default. A required field is
/// never silently dropped.
pub fn apply(raw: &RawRecord, set: &MappingSet) -> Result<CanonicalRecord, FieldMappingError> {
    let (record, failures) = apply_inner(raw, set);
    if let Some(failure) = failures.into_iter().next() {
        return Err(failure);
    }
    Ok(record)
}

/// Applies a mapping set leniently: validation failures without defaults
/// are collected instead of aborting, and the partially-mapped record
/// carries an explicit `missingFields` marker in `extra_fields`.
///
/// Used to retain a partially-mapped record when a sync halts on a
/// validation error.
#[must_use]
pub fn apply_lenient(raw: &RawRecord, set: &MappingSet) -> PartialMapping {
    let (mut record, failures) = apply_inner(raw, set);
    let missing_fields: Vec<String> = failures
        .iter()
        .map(|f| match f {
            FieldMappingError::Validation { field, .. }
            | FieldMappingError::Transformation { field, .. } => field.clone(),
        })
        .collect();
    if !missing_fields.is_empty() {
        record.extra_fields.insert(
            "missingFields".to_string(),
            Value::Array(missing_fields.iter().cloned().map(Value::String).collect()),
        );
    }
    PartialMapping {
        record,
        missing_fields,
    }
}

fn apply_inner(raw: &RawRecord, set: &MappingSet) -> (CanonicalRecord, Vec<FieldMappingError>) {
    let mut record = CanonicalRecord::new(raw.key(), raw.resource_id.clone());
    record.updated_at = Some(raw.updated_at);

    let mut consumed: Vec<&str> = Vec::new();
    let mut failures = Vec::new();

    for mapping in &set.mappings {
        consumed.push(mapping.external_field_id.as_str());

        let transformed = match transform(raw, mapping) {
            Ok(value) => value,
            Err(e) => {
                failures.push(e);
                continue;
            }
        };

        let value = match validate(&transformed, mapping, &raw.key().to_string()) {
            Ok(()) => transformed,
            Err(reason) => match &mapping.default_value {
                Some(default) => default.clone(),
                None => {
                    failures.push(FieldMappingError::Validation {
                        record: raw.key().to_string(),
                        field: mapping.internal_field.clone(),
                        reason,
                    });
                    continue;
                }
            },
        };

        if !value.is_null() {
            assign(&mut record, &mapping.internal_field, value);
        }
    }

    // Unmapped raw fields are preserved in the side-map, never dropped.
    if let Value::Object(fields) = &raw.fields {
        for (name, value) in fields {
            if !consumed.contains(&name.as_str()) {
                record.extra_fields.insert(name.clone(), value.clone());
            }
        }
    }

    (record, failures)
}

fn transform(raw: &RawRecord, mapping: &FieldMapping) -> Result<Value, FieldMappingError> {
    let source = raw.fields.get(&mapping.external_field_id).cloned();
    let fail = |reason: String| FieldMappingError::Transformation {
        record: raw.key().to_string(),
        field: mapping.internal_field.clone(),
        reason,
    };

    match &mapping.transformation {
        TransformationRule::DirectCopy => Ok(source.unwrap_or(Value::Null)),
        TransformationRule::NestedValue { path } => Ok(lookup_path(&raw.fields, path)),
        TransformationRule::StringFormat { template } => {
            let value = source.unwrap_or(Value::Null);
            if value.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::String(template.replace("{}", &value_to_string(&value))))
        }
        TransformationRule::NumericConversion => match source {
            None | Some(Value::Null) => Ok(Value::Null),
            Some(Value::Number(n)) => Ok(Value::Number(n)),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| fail(format!("'{s}' is not numeric"))),
            Some(other) => Err(fail(format!("cannot convert {other} to a number"))),
        },
        TransformationRule::DateFormat { format } => match source {
            None | Some(Value::Null) => Ok(Value::Null),
            Some(Value::String(s)) => parse_date(&s, format)
                .map(|dt| Value::String(dt.to_rfc3339()))
                .ok_or_else(|| fail(format!("'{s}' does not match date format '{format}'"))),
            Some(other) => Err(fail(format!("cannot parse {other} as a date"))),
        },
        TransformationRule::Conditional {
            field,
            equals,
            then_value,
            else_value,
        } => {
            let probe = lookup_path(&raw.fields, field);
            if &probe == equals {
                Ok(then_value.clone())
            } else {
                Ok(else_value.clone())
            }
        }
    }
}

fn validate(value: &Value, mapping: &FieldMapping, _record: &str) -> Result<(), String> {
    let Some(rule) = &mapping.validation else {
        return Ok(());
    };
    match rule {
        ValidationRule::Required => {
            if value.is_null() {
                Err("required field is missing".to_string())
            } else {
                Ok(())
            }
        }
        ValidationRule::NonEmptyString => match value {
            Value::String(s) if !s.trim().is_empty() => Ok(()),
            Value::String(_) => Err("string is empty".to_string()),
            other => Err(format!("expected a non-empty string, got {other}")),
        },
        ValidationRule::NumericRange { min, max } => match value.as_f64() {
            Some(n) if n >= *min && n <= *max => Ok(()),
            Some(n) => Err(format!("{n} is outside [{min}, {max}]")),
            None => Err(format!("expected a number, got {value}")),
        },
        ValidationRule::OneOf { values } => {
            if values.contains(value) {
                Ok(())
            } else {
                Err(format!("{value} is not one of the allowed values"))
            }
        }
    }
}

/// Routes a transformed value onto the canonical record. Known internal
/// field names fill the typed schema; anything else goes to the side-map.
fn assign(record: &mut CanonicalRecord, internal_field: &str, value: Value) {
    match internal_field {
        "projectKey" => record.project_key = value.as_str().map(str::to_string),
        "summary" => record.summary = value.as_str().map(str::to_string),
        "status" => record.status = value.as_str().map(str::to_string),
        "assignee" => record.assignee = value.as_str().map(str::to_string),
        "storyPoints" => record.story_points = value.as_f64(),
        "sprintId" => record.sprint_id = value.as_str().map(str::to_string),
        "boardId" => record.board_id = value.as_str().map(str::to_string),
        "labels" => {
            record.labels = value
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
        }
        "blocked" => record.blocked = value.as_bool().unwrap_or(false),
        "createdAt" => {
            record.created_at = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
        }
        "updatedAt" => {
            record.updated_at = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .or(record.updated_at);
        }
        other => {
            record.extra_fields.insert(other.to_string(), value);
        }
    }
}

fn lookup_path(root: &Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_date(s: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, format) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Builds a map view of a canonical record's mapped fields, used by
/// conflict field-diffing.
#[must_use]
pub fn record_fields(record: &CanonicalRecord) -> BTreeMap<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}
