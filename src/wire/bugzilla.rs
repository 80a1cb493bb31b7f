//! Parsers for Bugzilla's JSON-RPC responses.
//!
//! Every response is wrapped in the envelope
//! `{"error": null | {"code", "message"}, "result": {...}}`.
//! Timestamps are RFC 3339.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{Map, Value};

use super::{
    field, item_id, object, optional_string, parse_rfc3339, required_array, required_string,
    required_timestamp, scalar, string_list, RawAttachment, RawClassification, RawComment,
    RawComponent, RawIssue, RawProject, RawUser, SearchPage, UserRef,
};
use crate::batch::Batch;
use crate::error::{Result, TrackerError};
use crate::model::{EntityRef, IssueLink, LinkType};

/// Fault codes Bugzilla uses for ids and aliases that do not exist.
const MISSING_BUG_CODES: &[&str] = &["100", "101"];

/// Milestone name Bugzilla uses for "no milestone".
const NO_MILESTONE: &str = "---";

/// Result of `User.login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub user_id: String,
    pub token: Option<String>,
}

/// Check the envelope and return its `result` body.
///
/// A non-null `error` member aborts extraction with
/// [`TrackerError::Backend`].
pub fn check_error(payload: &Value) -> Result<&Map<String, Value>> {
    let envelope = object(payload, "response")?;

    if let Some(error) = field(envelope, "error") {
        let (code, message) = match error {
            Value::Object(err) => (
                err.get("code").and_then(scalar).unwrap_or_default(),
                err.get("message").and_then(scalar).unwrap_or_default(),
            ),
            other => (String::new(), other.to_string()),
        };
        return Err(TrackerError::Backend { code, message });
    }

    let result = field(envelope, "result")
        .ok_or_else(|| TrackerError::protocol("response has neither error nor result"))?;
    object(result, "result")
}

fn fault_error(code: String, message: String) -> TrackerError {
    if MISSING_BUG_CODES.contains(&code.as_str()) {
        TrackerError::NotFound(message)
    } else {
        TrackerError::Backend { code, message }
    }
}

/// Collect `faults` reported by permissive calls as item failures.
fn collect_faults<T>(result: &Map<String, Value>, kind: &'static str, batch: &mut Batch<T>) {
    let Some(Value::Array(faults)) = field(result, "faults") else {
        return;
    };
    for fault in faults {
        let code = fault.get("faultCode").and_then(scalar).unwrap_or_default();
        let message = fault
            .get("faultString")
            .and_then(scalar)
            .unwrap_or_else(|| "unknown fault".to_string());
        batch.push(kind, item_id(fault, "id"), Err(fault_error(code, message)));
    }
}

/// Parse `User.login`.
pub fn parse_login(payload: &Value) -> Result<Login> {
    let result = check_error(payload)?;
    Ok(Login {
        user_id: required_string(result, "id")?,
        token: optional_string(result, "token")?,
    })
}

/// Parse `Bugzilla.version`.
pub fn parse_version(payload: &Value) -> Result<String> {
    let result = check_error(payload)?;
    required_string(result, "version")
}

/// Parse one user record.
pub fn parse_user(item: &Value) -> Result<RawUser> {
    let obj = object(item, "user")?;
    let name = required_string(obj, "name")?;
    Ok(RawUser {
        id: required_string(obj, "id")?,
        real_name: optional_string(obj, "real_name")?.unwrap_or_default(),
        team: None,
        name,
    })
}

/// Parse `User.get`.
pub fn parse_users(payload: &Value) -> Result<Batch<RawUser>> {
    let result = check_error(payload)?;
    let users = required_array(result, "users")?;

    let mut batch = Batch::new();
    for item in users {
        batch.push("user", item_id(item, "id"), parse_user(item));
    }
    collect_faults(result, "user", &mut batch);
    Ok(batch)
}

/// Parse `Classification.get`.
pub fn parse_classifications(payload: &Value) -> Result<Batch<RawClassification>> {
    let result = check_error(payload)?;
    let items = required_array(result, "classifications")?;

    let mut batch = Batch::new();
    for item in items {
        let parsed = object(item, "classification").and_then(|obj| {
            Ok(RawClassification {
                id: required_string(obj, "id")?,
                name: required_string(obj, "name")?,
                description: optional_string(obj, "description")?.unwrap_or_default(),
            })
        });
        batch.push("classification", item_id(item, "id"), parsed);
    }
    Ok(batch)
}

fn parse_product(item: &Value) -> Result<RawProject> {
    let obj = object(item, "product")?;

    let mut components = Vec::new();
    if let Some(Value::Array(items)) = field(obj, "components") {
        for component in items {
            let c = object(component, "component")?;
            components.push(RawComponent {
                name: required_string(c, "name")?,
                description: optional_string(c, "description")?.unwrap_or_default(),
            });
        }
    }

    let mut versions: Vec<String> = Vec::new();
    for list in ["versions", "milestones"] {
        if let Some(Value::Array(items)) = field(obj, list) {
            for version in items {
                let name = required_string(object(version, "version")?, "name")?;
                if name != NO_MILESTONE && !versions.contains(&name) {
                    versions.push(name);
                }
            }
        }
    }

    Ok(RawProject {
        id: required_string(obj, "id")?,
        name: required_string(obj, "name")?,
        description: optional_string(obj, "description")?.unwrap_or_default(),
        classification: optional_string(obj, "classification")?,
        components,
        versions,
    })
}

/// Parse `Product.get`.
pub fn parse_products(payload: &Value) -> Result<Batch<RawProject>> {
    let result = check_error(payload)?;
    let items = required_array(result, "products")?;

    let mut batch = Batch::new();
    for item in items {
        batch.push("product", item_id(item, "id"), parse_product(item));
    }
    Ok(batch)
}

/// A user reference from a login field, using the `*_detail` companion
/// object when the server sent one.
fn user_ref(obj: &Map<String, Value>, name: &str) -> Result<Option<UserRef>> {
    let Some(login) = optional_string(obj, name)? else {
        return Ok(None);
    };

    let detail = format!("{}_detail", name);
    if let Some(detail) = field(obj, &detail) {
        if let Ok(user) = parse_user(detail) {
            return Ok(Some(UserRef {
                key: EntityRef::Name(login),
                known: Some(user),
            }));
        }
    }
    Ok(Some(UserRef::by_name(login)))
}

/// Parse one comment record.
pub fn parse_comment(item: &Value) -> Result<RawComment> {
    let obj = object(item, "comment")?;

    let author = match user_ref(obj, "creator")? {
        Some(author) => author,
        None => user_ref(obj, "author")?
            .ok_or_else(|| TrackerError::protocol("comment has no creator"))?,
    };
    let updated = required_timestamp(obj, "time", parse_rfc3339)?;
    let created = match field(obj, "creation_time") {
        Some(_) => required_timestamp(obj, "creation_time", parse_rfc3339)?,
        None => updated,
    };

    Ok(RawComment {
        id: required_string(obj, "id")?,
        issue_id: required_string(obj, "bug_id")?,
        text: optional_string(obj, "text")?.unwrap_or_default(),
        author,
        update_author: None,
        created,
        updated,
        attachment_id: optional_string(obj, "attachment_id")?,
        ordinal: optional_string(obj, "count")?.and_then(|c| c.parse().ok()),
    })
}

/// Parse `Bug.comments`.
///
/// Comments are grouped per bug under `result.bugs`; comments requested by
/// id come back under `result.comments`. A malformed bug entry fails that
/// bug's comments only.
pub fn parse_comments(payload: &Value) -> Result<Batch<RawComment>> {
    let result = check_error(payload)?;
    let mut batch = Batch::new();

    if let Some(bugs) = field(result, "bugs") {
        for (bug_id, entry) in object(bugs, "bugs")? {
            let comments = object(entry, "bug entry").and_then(|e| required_array(e, "comments"));
            match comments {
                Ok(comments) => {
                    for item in comments {
                        batch.push_in(bug_id, "comment", item_id(item, "id"), parse_comment(item));
                    }
                }
                Err(e) => batch.push_in(bug_id, "comments", Some(bug_id.clone()), Err(e)),
            }
        }
    }

    if let Some(comments) = field(result, "comments") {
        for (comment_id, item) in object(comments, "comments")? {
            let outcome = parse_comment(item);
            match item_id(item, "bug_id") {
                Some(bug_id) => batch.push_in(&bug_id, "comment", Some(comment_id.clone()), outcome),
                None => batch.push("comment", Some(comment_id.clone()), outcome),
            }
        }
    }

    Ok(batch)
}

/// Parse one attachment record. `data` is ignored.
pub fn parse_attachment(item: &Value) -> Result<RawAttachment> {
    let obj = object(item, "attachment")?;

    let author = match user_ref(obj, "creator")? {
        Some(author) => Some(author),
        None => user_ref(obj, "attacher")?,
    };

    Ok(RawAttachment {
        id: required_string(obj, "id")?,
        issue_id: required_string(obj, "bug_id")?,
        date: required_timestamp(obj, "creation_time", parse_rfc3339)?,
        description: optional_string(obj, "summary")?.unwrap_or_default(),
        filename: optional_string(obj, "file_name")?.unwrap_or_default(),
        content_type: optional_string(obj, "content_type")?
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        author,
        url: None,
    })
}

/// Parse `Bug.attachments`.
pub fn parse_attachments(payload: &Value) -> Result<Batch<RawAttachment>> {
    let result = check_error(payload)?;
    let mut batch = Batch::new();

    if let Some(bugs) = field(result, "bugs") {
        for (bug_id, entry) in object(bugs, "bugs")? {
            match entry.as_array() {
                Some(items) => {
                    for item in items {
                        batch.push_in(
                            bug_id,
                            "attachment",
                            item_id(item, "id"),
                            parse_attachment(item),
                        );
                    }
                }
                None => batch.push_in(
                    bug_id,
                    "attachments",
                    Some(bug_id.clone()),
                    Err(TrackerError::protocol("attachment list is not an array")),
                ),
            }
        }
    }

    if let Some(attachments) = field(result, "attachments") {
        for (attachment_id, item) in object(attachments, "attachments")? {
            let outcome = parse_attachment(item);
            match item_id(item, "bug_id") {
                Some(bug_id) => {
                    batch.push_in(&bug_id, "attachment", Some(attachment_id.clone()), outcome)
                }
                None => batch.push("attachment", Some(attachment_id.clone()), outcome),
            }
        }
    }

    Ok(batch)
}

/// Extract and decode the content of attachment `id` from
/// `Bug.attachments`.
pub fn parse_attachment_data(payload: &Value, id: &str) -> Result<Vec<u8>> {
    let result = check_error(payload)?;
    let attachment = field(result, "attachments")
        .and_then(|a| a.get(id))
        .ok_or_else(|| TrackerError::NotFound(format!("attachment {}", id)))?;
    let data = attachment
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| TrackerError::protocol(format!("attachment {} has no data", id)))?;

    BASE64
        .decode(data)
        .map_err(|e| TrackerError::protocol(format!("attachment {} data: {}", id, e)))
}

/// Parse one bug record.
pub fn parse_bug(item: &Value) -> Result<RawIssue> {
    let obj = object(item, "bug")?;
    let id = required_string(obj, "id")?;

    let mut links = BTreeSet::new();
    for target in string_list(obj, "depends_on")? {
        links.insert(IssueLink::new(LinkType::DependsOn, false, target));
    }
    for target in string_list(obj, "blocks")? {
        links.insert(IssueLink::new(LinkType::DependencyOf, false, target));
    }
    if let Some(target) = optional_string(obj, "dupe_of")? {
        links.insert(IssueLink::new(LinkType::Duplicate, false, target));
    }

    let severity = optional_string(obj, "severity")?;
    let planned_versions = string_list(obj, "target_milestone")?
        .into_iter()
        .filter(|m| m != NO_MILESTONE)
        .collect();

    Ok(RawIssue {
        summary: required_string(obj, "summary")?,
        description: None,
        status: required_string(obj, "status")?,
        resolution: optional_string(obj, "resolution")?.unwrap_or_default(),
        priority: optional_string(obj, "priority")?,
        issue_type: severity.clone().unwrap_or_default(),
        severity,
        reporter: user_ref(obj, "creator")?,
        assignee: user_ref(obj, "assigned_to")?,
        created: required_timestamp(obj, "creation_time", parse_rfc3339)?,
        updated: required_timestamp(obj, "last_change_time", parse_rfc3339)?,
        project: optional_string(obj, "product")?.map(EntityRef::Name),
        components: string_list(obj, "component")?,
        affected_versions: string_list(obj, "version")?,
        planned_versions,
        fix_versions: Vec::new(),
        parent_id: None,
        children: Vec::new(),
        links: links.into_iter().collect(),
        id,
    })
}

/// Parse `Bug.get` or `Bug.search`.
pub fn parse_bugs(payload: &Value) -> Result<SearchPage> {
    let result = check_error(payload)?;
    let bugs = required_array(result, "bugs")?;

    let mut issues = Batch::new();
    for item in bugs {
        issues.push("bug", item_id(item, "id"), parse_bug(item));
    }
    collect_faults(result, "bug", &mut issues);

    Ok(SearchPage {
        issues,
        total: None,
    })
}
