//! Wire parsers: raw backend payloads to raw records.
//!
//! Parsers are pure. They check the backend's error envelope first, then
//! extract `Raw*` records whose references to other entities are left as
//! keys ([`UserRef`], [`EntityRef`]). Turning those keys into shared domain
//! objects is the resolver's job.

pub mod bugzilla;
pub mod jira;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, TrackerError};
use crate::model::{EntityRef, IssueLink};

/// A user as described by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUser {
    pub id: String,
    pub name: String,
    pub real_name: String,
    pub team: Option<String>,
}

/// A reference to a user, optionally carrying the user's data when the
/// backend embeds it in the referencing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub key: EntityRef,
    pub known: Option<RawUser>,
}

impl UserRef {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            key: EntityRef::Id(id.into()),
            known: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            key: EntityRef::Name(name.into()),
            known: None,
        }
    }

    /// A reference whose target is fully described inline.
    pub fn embedded(user: RawUser) -> Self {
        Self {
            key: EntityRef::Id(user.id.clone()),
            known: Some(user),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClassification {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComponent {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProject {
    pub id: String,
    pub name: String,
    pub description: String,
    pub classification: Option<String>,
    pub components: Vec<RawComponent>,
    /// Version and milestone names, without duplicates.
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComment {
    pub id: String,
    pub issue_id: String,
    pub text: String,
    pub author: UserRef,
    pub update_author: Option<UserRef>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub attachment_id: Option<String>,
    /// Position within the issue, when the backend numbers comments.
    pub ordinal: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttachment {
    pub id: String,
    pub issue_id: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub filename: String,
    pub content_type: String,
    pub author: Option<UserRef>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIssue {
    pub id: String,
    pub summary: String,
    /// Absent when the backend keeps the description as the first comment.
    pub description: Option<String>,
    pub status: String,
    pub resolution: String,
    pub priority: Option<String>,
    pub severity: Option<String>,
    pub issue_type: String,
    pub reporter: Option<UserRef>,
    pub assignee: Option<UserRef>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub project: Option<EntityRef>,
    pub components: Vec<String>,
    pub affected_versions: Vec<String>,
    pub planned_versions: Vec<String>,
    pub fix_versions: Vec<String>,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub links: Vec<IssueLink>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub issues: crate::batch::Batch<RawIssue>,
    /// Total number of matches, when the backend reports it.
    pub total: Option<u64>,
}

// ============================================================================
// Field extraction helpers
// ============================================================================

/// View `value` as a JSON object.
pub(crate) fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| TrackerError::protocol(format!("{} is not a JSON object", what)))
}

/// A field's value, treating JSON `null` as absent.
pub(crate) fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

/// Render a scalar as a string. Backends disagree on whether ids are
/// numbers or strings.
pub(crate) fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn required_string(obj: &Map<String, Value>, name: &str) -> Result<String> {
    let value =
        field(obj, name).ok_or_else(|| TrackerError::protocol(format!("missing field '{}'", name)))?;
    scalar(value).ok_or_else(|| TrackerError::protocol(format!("field '{}' is not a scalar", name)))
}

pub(crate) fn optional_string(obj: &Map<String, Value>, name: &str) -> Result<Option<String>> {
    match field(obj, name) {
        None => Ok(None),
        Some(value) => scalar(value)
            .map(Some)
            .ok_or_else(|| TrackerError::protocol(format!("field '{}' is not a scalar", name))),
    }
}

/// A field that may hold one scalar or a list of scalars.
pub(crate) fn string_list(obj: &Map<String, Value>, name: &str) -> Result<Vec<String>> {
    match field(obj, name) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                scalar(item).ok_or_else(|| {
                    TrackerError::protocol(format!("field '{}' holds a non-scalar entry", name))
                })
            })
            .collect(),
        Some(value) => scalar(value)
            .map(|s| vec![s])
            .ok_or_else(|| TrackerError::protocol(format!("field '{}' is not a list", name))),
    }
}

pub(crate) fn required_array<'a>(obj: &'a Map<String, Value>, name: &str) -> Result<&'a Vec<Value>> {
    field(obj, name)
        .and_then(Value::as_array)
        .ok_or_else(|| TrackerError::protocol(format!("field '{}' is not an array", name)))
}

/// The value of `name` on a nested object field, e.g. `status.name`.
pub(crate) fn nested_string(
    obj: &Map<String, Value>,
    outer: &str,
    inner: &str,
) -> Result<Option<String>> {
    match field(obj, outer) {
        None => Ok(None),
        Some(Value::Object(nested)) => optional_string(nested, inner),
        Some(_) => Err(TrackerError::protocol(format!(
            "field '{}' is not an object",
            outer
        ))),
    }
}

/// Best-effort id of an item, for failure reports.
pub(crate) fn item_id(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(scalar)
}

/// Parse an RFC 3339 timestamp such as `2014-01-01T00:00:00Z`.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrackerError::protocol(format!("invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn required_timestamp(
    obj: &Map<String, Value>,
    name: &str,
    parse: fn(&str) -> Result<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    let raw = field(obj, name)
        .and_then(Value::as_str)
        .ok_or_else(|| TrackerError::protocol(format!("missing timestamp '{}'", name)))?;
    parse(raw)
}
