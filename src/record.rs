//! Shared record plumbing: identifiers, timestamps, pagination and
//! JSON-valued mappings.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use crate::{Error, Result};

/// Default page size when a list request does not specify one
pub const DEFAULT_LIMIT: usize = 100;

/// Upper bound on a single page
pub const MAX_LIMIT: usize = 1000;

/// Generate a new opaque record identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time, used for `created_at`/`updated_at`
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Pagination window over insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: DEFAULT_LIMIT }
    }
}

impl Page {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    /// Limit clamped to `MAX_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_LIMIT)
    }

    /// LIMIT bound for SQL
    pub fn sql_limit(&self) -> i64 {
        self.effective_limit() as i64
    }

    /// OFFSET bound for SQL, saturating instead of wrapping negative
    pub fn sql_offset(&self) -> i64 {
        i64::try_from(self.skip).unwrap_or(i64::MAX)
    }
}

/// Reject JSON mappings that are not objects or arrays.
///
/// Absent values are stored as `{}`; scalars never are.
pub fn ensure_mapping(field: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(()),
        other => Err(Error::Validation(format!(
            "{} must be a JSON object or array, got {}",
            field,
            json_type_name(other)
        ))),
    }
}

/// Empty JSON object
pub fn empty_mapping() -> Value {
    Value::Object(serde_json::Map::new())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge the keys of `patch` into `target` (both must be objects).
pub fn merge_mapping(field: &str, target: &mut Value, patch: Value) -> Result<()> {
    let Value::Object(patch) = patch else {
        return Err(Error::Validation(format!("{} must be a JSON object", field)));
    };
    match target {
        Value::Object(map) => {
            map.extend(patch);
            Ok(())
        }
        _ => Err(Error::Conflict(format!(
            "{} is stored as an array and cannot be merged",
            field
        ))),
    }
}

/// Reject blank required strings, returning the trimmed value
pub fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}
