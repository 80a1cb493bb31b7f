//! Issues and the objects they contain.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Component, Project, User, Version};
use crate::batch::ItemFailure;

/// A fully resolved issue.
///
/// Every reference is resolved before an `Issue` is handed out; reading it
/// never performs I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    /// Backend-scoped id (bug number, issue key).
    pub id: String,
    pub summary: String,
    pub description: String,
    pub status: Status,
    /// Resolution, empty while unresolved.
    pub resolution: String,
    pub priority: Option<Priority>,
    pub severity: Option<Severity>,
    pub issue_type: IssueType,
    pub reporter: Option<Arc<User>>,
    pub assignee: Option<Arc<User>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub project: Option<Arc<Project>>,
    pub components: Vec<Arc<Component>>,
    pub affected_versions: Vec<Arc<Version>>,
    pub planned_versions: Vec<Arc<Version>>,
    pub fix_versions: Vec<Arc<Version>>,
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
    pub parent_id: Option<String>,
    pub children: BTreeSet<String>,
    pub links: BTreeSet<IssueLink>,
    /// Contained items that could not be built. Only non-empty under the
    /// partial-success batch policy.
    pub failures: Vec<ItemFailure>,
}

impl Issue {
    /// Comments, oldest first.
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn links(&self) -> &BTreeSet<IssueLink> {
        &self.links
    }

    /// Items of this issue that failed to resolve.
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// Check whether every contained item was built.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.summary)
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    /// Owning issue, by id.
    pub issue_id: String,
    pub text: String,
    pub author: Arc<User>,
    pub update_author: Option<Arc<User>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Attachment this comment announces, if any.
    pub attachment_id: Option<String>,
}

/// Attachment metadata. Content is fetched separately through the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: String,
    /// Owning issue, by id.
    pub issue_id: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub filename: String,
    pub content_type: String,
    pub author: Option<Arc<User>>,
    /// Direct download URL, when the backend provides one.
    pub url: Option<String>,
}

/// Kind of relation between two issues, keyed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    Unspecified,
    Child,
    Duplicate,
    DependencyOf,
    DependsOn,
}

impl LinkType {
    /// The link type's name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Child => "child",
            Self::Duplicate => "duplicate",
            Self::DependencyOf => "dependency-of",
            Self::DependsOn => "depends-on",
        }
    }

    /// Look a link type up by name. Unknown names are `Unspecified`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "child" => Self::Child,
            "duplicate" => Self::Duplicate,
            "dependency-of" => Self::DependencyOf,
            "depends-on" => Self::DependsOn,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A relation from one issue to another, by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueLink {
    pub link_type: LinkType,
    /// True when the relation was declared on the target issue.
    pub inward: bool,
    pub issue_id: String,
}

impl IssueLink {
    pub fn new(link_type: LinkType, inward: bool, issue_id: impl Into<String>) -> Self {
        Self {
            link_type,
            inward,
            issue_id: issue_id.into(),
        }
    }
}

/// Issue priority with its rank (1 = most urgent) when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Priority {
    pub name: String,
    pub rank: Option<u8>,
}

/// Issue severity with its rank (1 = most severe) when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Severity {
    pub name: String,
    pub rank: Option<u8>,
}

/// Workflow status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub name: String,
    pub is_open: bool,
}

/// Issue type (bug, enhancement, task...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueType {
    pub name: String,
    pub is_subtask: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_type_round_trips_by_name() {
        for link_type in [
            LinkType::Unspecified,
            LinkType::Child,
            LinkType::Duplicate,
            LinkType::DependencyOf,
            LinkType::DependsOn,
        ] {
            assert_eq!(LinkType::from_name(link_type.name()), link_type);
        }
    }

    #[test]
    fn test_child_and_duplicate_are_distinct() {
        assert_ne!(LinkType::from_name("child"), LinkType::from_name("duplicate"));
    }

    #[test]
    fn test_unknown_link_name_is_unspecified() {
        assert_eq!(LinkType::from_name("relates"), LinkType::Unspecified);
    }

    #[test]
    fn test_links_deduplicate() {
        let mut links = BTreeSet::new();
        links.insert(IssueLink::new(LinkType::DependsOn, false, "7"));
        links.insert(IssueLink::new(LinkType::DependsOn, false, "7"));
        links.insert(IssueLink::new(LinkType::DependsOn, true, "7"));
        assert_eq!(links.len(), 2);
    }
}
