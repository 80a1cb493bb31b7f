//! Parsers for Jira REST responses.
//!
//! Failed requests carry `{"errorMessages": [...], "errors": {...}}`.
//! Timestamps look like `2014-01-01T00:00:00.000+0000`. Rich-text fields may
//! be plain strings or Atlassian Document Format trees.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{
    field, item_id, nested_string, object, optional_string, parse_rfc3339, required_array,
    required_string, required_timestamp, RawAttachment, RawClassification, RawComment,
    RawComponent, RawIssue, RawProject, RawUser, SearchPage, UserRef,
};
use crate::batch::Batch;
use crate::error::{Result, TrackerError};
use crate::model::{EntityRef, IssueLink, LinkType};

/// Timestamp format used throughout the Jira REST API.
const JIRA_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Code reported for envelope errors that carry no HTTP status.
const ENVELOPE_ERROR_CODE: &str = "error";

/// Session cookie returned by the authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    /// The value of a `Cookie` header carrying this session.
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Parse a Jira timestamp, accepting RFC 3339 as well.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, JIRA_TIMESTAMP_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| parse_rfc3339(raw))
}

/// Collect the messages of an error envelope, if the payload is one.
pub fn error_message(payload: &Value) -> Option<String> {
    let obj = payload.as_object()?;
    let mut messages: Vec<String> = Vec::new();

    if let Some(Value::Array(items)) = obj.get("errorMessages") {
        messages.extend(items.iter().filter_map(|v| v.as_str()).map(String::from));
    }
    if let Some(Value::Object(errors)) = obj.get("errors") {
        messages.extend(errors.iter().map(|(k, v)| match v.as_str() {
            Some(s) => format!("{}: {}", k, s),
            None => format!("{}: {}", k, v),
        }));
    }

    if messages.is_empty() {
        None
    } else {
        Some(messages.join(", "))
    }
}

/// Check the envelope and return the payload as an object.
pub fn check_error(payload: &Value) -> Result<&Map<String, Value>> {
    if let Some(message) = error_message(payload) {
        return Err(TrackerError::backend(ENVELOPE_ERROR_CODE, message));
    }
    object(payload, "response")
}

/// Parse the session handshake response.
pub fn parse_session(payload: &Value) -> Result<SessionCookie> {
    let obj = check_error(payload)?;
    let session = field(obj, "session")
        .ok_or_else(|| TrackerError::protocol("handshake response has no session"))?;
    let session = object(session, "session")?;
    Ok(SessionCookie {
        name: required_string(session, "name")?,
        value: required_string(session, "value")?,
    })
}

/// Parse `serverInfo`.
pub fn parse_server_version(payload: &Value) -> Result<String> {
    let obj = check_error(payload)?;
    required_string(obj, "version")
}

/// Parse a user object (`myself`, `user`, or embedded in an issue).
pub fn parse_user(item: &Value) -> Result<RawUser> {
    let obj = object(item, "user")?;

    let id = ["accountId", "key", "name"]
        .iter()
        .find_map(|k| optional_string(obj, k).ok().flatten())
        .ok_or_else(|| TrackerError::protocol("user has no identifier"))?;
    let name = ["name", "emailAddress"]
        .iter()
        .find_map(|k| optional_string(obj, k).ok().flatten())
        .unwrap_or_else(|| id.clone());

    Ok(RawUser {
        real_name: optional_string(obj, "displayName")?.unwrap_or_default(),
        team: None,
        id,
        name,
    })
}

/// Parse a `user/search`-style list, or a single user object.
pub fn parse_users(payload: &Value) -> Result<Batch<RawUser>> {
    let mut batch = Batch::new();
    match payload {
        Value::Array(items) => {
            for item in items {
                batch.push("user", item_id(item, "accountId"), parse_user(item));
            }
        }
        _ => {
            check_error(payload)?;
            batch.push("user", item_id(payload, "accountId"), parse_user(payload));
        }
    }
    Ok(batch)
}

fn embedded_user(obj: &Map<String, Value>, name: &str) -> Result<Option<UserRef>> {
    match field(obj, name) {
        None => Ok(None),
        Some(value) => parse_user(value).map(|user| Some(UserRef::embedded(user))),
    }
}

/// Flatten a rich-text value to plain text.
pub fn rich_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => {
            let mut out = String::new();
            flatten_node(other, &mut out);
            out.trim().to_string()
        }
    }
}

fn flatten_children(obj: &Map<String, Value>, out: &mut String) {
    if let Some(Value::Array(items)) = obj.get("content") {
        for item in items {
            flatten_node(item, out);
        }
    }
}

fn flatten_node(node: &Value, out: &mut String) {
    match node {
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = obj.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            Some("paragraph") | Some("heading") | Some("codeBlock") => {
                flatten_children(obj, out);
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Some("hardBreak") => out.push('\n'),
            Some("listItem") => {
                out.push_str("• ");
                flatten_children(obj, out);
            }
            Some("blockquote") => {
                out.push_str("> ");
                flatten_children(obj, out);
            }
            Some("mention") => {
                if let Some(text) = obj
                    .get("attrs")
                    .and_then(|a| a.get("text"))
                    .and_then(Value::as_str)
                {
                    out.push('@');
                    out.push_str(text.trim_start_matches('@'));
                }
            }
            Some("inlineCard") | Some("mediaGroup") | Some("mediaSingle") => {}
            _ => flatten_children(obj, out),
        },
        Value::Array(items) => {
            for item in items {
                flatten_node(item, out);
            }
        }
        _ => {}
    }
}

fn names(obj: &Map<String, Value>, list: &str) -> Result<Vec<String>> {
    match field(obj, list) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| required_string(object(item, list)?, "name"))
            .collect(),
        Some(_) => Err(TrackerError::protocol(format!("field '{}' is not an array", list))),
    }
}

/// Map a Jira link to the shared link vocabulary, keyed by the link type's
/// name and the side the other issue is on.
fn parse_link(item: &Value) -> Result<IssueLink> {
    let obj = object(item, "issue link")?;
    let type_name = nested_string(obj, "type", "name")?
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (target, inward) = match (field(obj, "inwardIssue"), field(obj, "outwardIssue")) {
        (Some(issue), _) => (issue, true),
        (None, Some(issue)) => (issue, false),
        (None, None) => return Err(TrackerError::protocol("issue link has no target")),
    };
    let target = required_string(object(target, "linked issue")?, "key")?;

    let link_type = if type_name.contains("duplicat") {
        LinkType::Duplicate
    } else if type_name.contains("block") || type_name.contains("depend") {
        if inward {
            LinkType::DependsOn
        } else {
            LinkType::DependencyOf
        }
    } else if type_name.contains("parent") || type_name.contains("child") {
        LinkType::Child
    } else {
        LinkType::Unspecified
    };

    Ok(IssueLink::new(link_type, inward, target))
}

/// Parse one issue.
pub fn parse_issue(item: &Value) -> Result<RawIssue> {
    let obj = object(item, "issue")?;
    let id = required_string(obj, "key")?;
    let fields = field(obj, "fields")
        .ok_or_else(|| TrackerError::protocol(format!("issue {} has no fields", id)))?;
    let fields = object(fields, "fields")?;

    let mut links = Vec::new();
    if let Some(Value::Array(items)) = field(fields, "issuelinks") {
        for link in items {
            links.push(parse_link(link)?);
        }
    }

    let mut children = Vec::new();
    if let Some(Value::Array(items)) = field(fields, "subtasks") {
        for subtask in items {
            children.push(required_string(object(subtask, "subtask")?, "key")?);
        }
    }

    Ok(RawIssue {
        summary: required_string(fields, "summary")?,
        description: Some(field(fields, "description").map(rich_text).unwrap_or_default()),
        status: nested_string(fields, "status", "name")?.unwrap_or_default(),
        resolution: nested_string(fields, "resolution", "name")?.unwrap_or_default(),
        priority: nested_string(fields, "priority", "name")?,
        severity: None,
        issue_type: nested_string(fields, "issuetype", "name")?.unwrap_or_default(),
        reporter: embedded_user(fields, "reporter")?,
        assignee: embedded_user(fields, "assignee")?,
        created: required_timestamp(fields, "created", parse_timestamp)?,
        updated: required_timestamp(fields, "updated", parse_timestamp)?,
        project: nested_string(fields, "project", "key")?.map(EntityRef::Name),
        components: names(fields, "components")?,
        affected_versions: names(fields, "versions")?,
        planned_versions: Vec::new(),
        fix_versions: names(fields, "fixVersions")?,
        parent_id: nested_string(fields, "parent", "key")?,
        children,
        links,
        id,
    })
}

/// Parse a `search` response.
pub fn parse_search(payload: &Value) -> Result<SearchPage> {
    let obj = check_error(payload)?;
    let issues = required_array(obj, "issues")?;

    let mut batch = Batch::new();
    for item in issues {
        batch.push("issue", item_id(item, "key"), parse_issue(item));
    }

    Ok(SearchPage {
        issues: batch,
        total: field(obj, "total").and_then(Value::as_u64),
    })
}

/// Parse one comment of issue `issue_id`.
pub fn parse_comment(item: &Value, issue_id: &str) -> Result<RawComment> {
    let obj = object(item, "comment")?;
    let author = embedded_user(obj, "author")?
        .ok_or_else(|| TrackerError::protocol("comment has no author"))?;
    let created = required_timestamp(obj, "created", parse_timestamp)?;
    let updated = match field(obj, "updated") {
        Some(_) => required_timestamp(obj, "updated", parse_timestamp)?,
        None => created,
    };

    Ok(RawComment {
        id: required_string(obj, "id")?,
        issue_id: issue_id.to_string(),
        text: field(obj, "body").map(rich_text).unwrap_or_default(),
        author,
        update_author: embedded_user(obj, "updateAuthor")?,
        created,
        updated,
        attachment_id: None,
        ordinal: None,
    })
}

/// Parse an `issue/{id}/comment` response.
pub fn parse_comments(payload: &Value, issue_id: &str) -> Result<Batch<RawComment>> {
    let obj = check_error(payload)?;
    let comments = required_array(obj, "comments")?;

    let mut batch = Batch::new();
    for item in comments {
        batch.push_in(issue_id, "comment", item_id(item, "id"), parse_comment(item, issue_id));
    }
    Ok(batch)
}

/// Parse one attachment of issue `issue_id`.
pub fn parse_attachment(item: &Value, issue_id: &str) -> Result<RawAttachment> {
    let obj = object(item, "attachment")?;
    Ok(RawAttachment {
        id: required_string(obj, "id")?,
        issue_id: issue_id.to_string(),
        date: required_timestamp(obj, "created", parse_timestamp)?,
        description: String::new(),
        filename: optional_string(obj, "filename")?.unwrap_or_default(),
        content_type: optional_string(obj, "mimeType")?
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        author: embedded_user(obj, "author")?,
        url: optional_string(obj, "content")?,
    })
}

/// Parse the attachments of an issue fetched with `fields=attachment`.
pub fn parse_issue_attachments(payload: &Value) -> Result<Batch<RawAttachment>> {
    let obj = check_error(payload)?;
    let issue_id = required_string(obj, "key")?;
    let fields = field(obj, "fields")
        .ok_or_else(|| TrackerError::protocol(format!("issue {} has no fields", issue_id)))?;
    let fields = object(fields, "fields")?;

    let mut batch = Batch::new();
    if let Some(Value::Array(items)) = field(fields, "attachment") {
        for item in items {
            batch.push_in(
                &issue_id,
                "attachment",
                item_id(item, "id"),
                parse_attachment(item, &issue_id),
            );
        }
    }
    Ok(batch)
}

/// Parse the content URL out of an `attachment/{id}` response.
pub fn parse_attachment_url(payload: &Value) -> Result<String> {
    let obj = check_error(payload)?;
    required_string(obj, "content")
}

/// Parse a `project/{key}` response.
pub fn parse_project(payload: &Value) -> Result<RawProject> {
    let obj = check_error(payload)?;

    let mut components = Vec::new();
    if let Some(Value::Array(items)) = field(obj, "components") {
        for item in items {
            let c = object(item, "component")?;
            components.push(RawComponent {
                name: required_string(c, "name")?,
                description: optional_string(c, "description")?.unwrap_or_default(),
            });
        }
    }

    let mut versions = names(obj, "versions")?;
    versions.dedup();

    Ok(RawProject {
        id: required_string(obj, "id")?,
        name: required_string(obj, "key")?,
        description: optional_string(obj, "description")?.unwrap_or_default(),
        classification: nested_string(obj, "projectCategory", "name")?,
        components,
        versions,
    })
}

/// Parse a project category, Jira's counterpart of a classification.
pub fn parse_classification(item: &Value) -> Result<RawClassification> {
    let obj = check_error(item)?;
    Ok(RawClassification {
        id: required_string(obj, "id")?,
        name: required_string(obj, "name")?,
        description: optional_string(obj, "description")?.unwrap_or_default(),
    })
}

/// Parse the `projectCategory` listing.
pub fn parse_classifications(payload: &Value) -> Result<Batch<RawClassification>> {
    let items = payload
        .as_array()
        .ok_or_else(|| TrackerError::protocol("project categories are not an array"))?;

    let mut batch = Batch::new();
    for item in items {
        batch.push("classification", item_id(item, "id"), parse_classification(item));
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_json(id: &str) -> Value {
        json!({"accountId": id, "name": id, "displayName": format!("User {}", id)})
    }

    fn issue_json() -> Value {
        json!({
            "id": "10001",
            "key": "TB-1",
            "fields": {
                "summary": "Login fails",
                "description": {
                    "type": "doc",
                    "version": 1,
                    "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "Steps:"}]},
                        {"type": "bulletList", "content": [
                            {"type": "listItem", "content": [
                                {"type": "paragraph", "content": [{"type": "text", "text": "open"}]}
                            ]}
                        ]}
                    ]
                },
                "status": {"name": "In Progress"},
                "resolution": null,
                "priority": {"name": "High"},
                "issuetype": {"name": "Bug"},
                "reporter": user_json("u1"),
                "assignee": null,
                "created": "2014-01-01T00:00:00.000+0000",
                "updated": "2014-01-02T10:30:00.000+0100",
                "project": {"id": "100", "key": "TB"},
                "components": [{"name": "Auth"}],
                "versions": [{"name": "1.0"}],
                "fixVersions": [{"name": "1.1"}],
                "parent": {"key": "TB-0"},
                "subtasks": [{"key": "TB-2"}],
                "issuelinks": [
                    {"type": {"name": "Blocks"}, "inwardIssue": {"key": "TB-9"}},
                    {"type": {"name": "Duplicate"}, "outwardIssue": {"key": "TB-3"}}
                ]
            }
        })
    }

    #[test]
    fn test_error_envelope_is_backend_error() {
        let payload = json!({"errorMessages": ["Issue does not exist"], "errors": {}});
        assert_eq!(
            parse_search(&payload).unwrap_err(),
            TrackerError::backend("error", "Issue does not exist")
        );
    }

    #[test]
    fn test_error_message_includes_field_errors() {
        let payload = json!({"errorMessages": [], "errors": {"jql": "bad query"}});
        assert_eq!(error_message(&payload).as_deref(), Some("jql: bad query"));
        assert!(error_message(&json!({"errorMessages": []})).is_none());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let jira = parse_timestamp("2014-01-01T01:00:00.000+0100").unwrap();
        let rfc = parse_timestamp("2014-01-01T00:00:00Z").unwrap();
        assert_eq!(jira, rfc);
        assert!(matches!(
            parse_timestamp("01/01/2014"),
            Err(TrackerError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_issue() {
        let issue = parse_issue(&issue_json()).unwrap();

        assert_eq!(issue.id, "TB-1");
        assert_eq!(issue.description.as_deref(), Some("Steps:\n• open"));
        assert_eq!(issue.status, "In Progress");
        assert_eq!(issue.resolution, "");
        assert_eq!(issue.project, Some(EntityRef::name("TB")));
        assert_eq!(issue.reporter.as_ref().map(|r| &r.key), Some(&EntityRef::id("u1")));
        assert!(issue.assignee.is_none());
        assert_eq!(issue.parent_id.as_deref(), Some("TB-0"));
        assert_eq!(issue.children, vec!["TB-2"]);
        assert_eq!(issue.fix_versions, vec!["1.1"]);
        assert_eq!(
            issue.links,
            vec![
                IssueLink::new(LinkType::DependsOn, true, "TB-9"),
                IssueLink::new(LinkType::Duplicate, false, "TB-3"),
            ]
        );
    }

    #[test]
    fn test_parse_search_isolates_bad_issue() {
        let payload = json!({
            "startAt": 0,
            "total": 2,
            "issues": [issue_json(), {"key": "TB-5", "fields": {"summary": "no dates"}}]
        });

        let page = parse_search(&payload).unwrap();
        assert_eq!(page.total, Some(2));
        assert_eq!(page.issues.items.len(), 1);
        assert_eq!(page.issues.failures[0].id.as_deref(), Some("TB-5"));
    }

    #[test]
    fn test_parse_comments() {
        let payload = json!({
            "comments": [{
                "id": "200",
                "author": user_json("u1"),
                "updateAuthor": user_json("u2"),
                "body": "Looks good",
                "created": "2014-01-01T00:00:00.000+0000",
                "updated": "2014-01-03T00:00:00.000+0000"
            }]
        });

        let batch = parse_comments(&payload, "TB-1").unwrap();
        let comment = &batch.items[0];
        assert_eq!(comment.issue_id, "TB-1");
        assert_eq!(comment.text, "Looks good");
        assert_eq!(comment.author.key, EntityRef::id("u1"));
        assert_eq!(
            comment.update_author.as_ref().map(|u| &u.key),
            Some(&EntityRef::id("u2"))
        );
    }

    #[test]
    fn test_parse_session() {
        let payload = json!({"session": {"name": "JSESSIONID", "value": "abc"}});
        let cookie = parse_session(&payload).unwrap();
        assert_eq!(cookie.header_value(), "JSESSIONID=abc");
    }

    #[test]
    fn test_parse_project() {
        let payload = json!({
            "id": "100",
            "key": "TB",
            "name": "Trackbridge",
            "projectCategory": {"id": "1", "name": "Tools"},
            "components": [{"name": "Auth"}],
            "versions": [{"name": "1.0"}, {"name": "1.1"}]
        });

        let project = parse_project(&payload).unwrap();
        assert_eq!(project.name, "TB");
        assert_eq!(project.classification.as_deref(), Some("Tools"));
        assert_eq!(project.versions, vec!["1.0", "1.1"]);
    }

    #[test]
    fn test_parse_user_without_account_id() {
        let user = parse_user(&json!({"key": "jdoe", "name": "jdoe", "displayName": "J"})).unwrap();
        assert_eq!(user.id, "jdoe");
        assert!(parse_user(&json!({"displayName": "nobody"})).is_err());
    }

    #[test]
    fn test_rich_text_mention() {
        let doc = json!({"type": "doc", "content": [
            {"type": "paragraph", "content": [
                {"type": "mention", "attrs": {"text": "@jdoe"}},
                {"type": "text", "text": " please look"}
            ]}
        ]});
        assert_eq!(rich_text(&doc), "@jdoe please look");
    }
}
