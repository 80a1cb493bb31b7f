//! Backend vocabularies for priorities, severities, statuses and types.
//!
//! Each backend names these values differently. A [`Vocabulary`] maps the
//! raw names a backend sends onto the shared domain values; there is one
//! implementation per backend.

use std::fmt;

use super::{IssueType, Priority, Severity, Status};

/// Interpretation of backend-specific field values.
pub trait Vocabulary: fmt::Debug + Send + Sync {
    fn priority(&self, raw: &str) -> Priority;
    fn severity(&self, raw: &str) -> Severity;
    fn status(&self, raw: &str) -> Status;
    fn issue_type(&self, raw: &str) -> IssueType;
}

fn rank_of(table: &[&str], raw: &str) -> Option<u8> {
    table
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
        .map(|i| i as u8 + 1)
}

/// Bugzilla's stock priorities, severities and workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct BugzillaVocabulary;

const BUGZILLA_PRIORITIES: &[&str] = &["P1", "P2", "P3", "P4", "P5"];
const BUGZILLA_PRIORITY_WORDS: &[&str] = &["Highest", "High", "Normal", "Low", "Lowest"];
const BUGZILLA_SEVERITIES: &[&str] = &[
    "blocker",
    "critical",
    "major",
    "normal",
    "minor",
    "trivial",
    "enhancement",
];
const BUGZILLA_OPEN_STATUSES: &[&str] = &[
    "UNCONFIRMED",
    "CONFIRMED",
    "NEW",
    "ASSIGNED",
    "REOPENED",
    "IN_PROGRESS",
];

impl Vocabulary for BugzillaVocabulary {
    fn priority(&self, raw: &str) -> Priority {
        Priority {
            name: raw.to_string(),
            rank: rank_of(BUGZILLA_PRIORITIES, raw).or_else(|| rank_of(BUGZILLA_PRIORITY_WORDS, raw)),
        }
    }

    fn severity(&self, raw: &str) -> Severity {
        Severity {
            name: raw.to_string(),
            rank: rank_of(BUGZILLA_SEVERITIES, raw),
        }
    }

    fn status(&self, raw: &str) -> Status {
        Status {
            name: raw.to_string(),
            is_open: rank_of(BUGZILLA_OPEN_STATUSES, raw).is_some(),
        }
    }

    /// Bugzilla has no issue types; enhancements are told apart by severity.
    fn issue_type(&self, raw: &str) -> IssueType {
        let name = if raw.eq_ignore_ascii_case("enhancement") {
            "Enhancement"
        } else {
            "Bug"
        };
        IssueType {
            name: name.to_string(),
            is_subtask: false,
        }
    }
}

/// Jira's default schemes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JiraVocabulary;

const JIRA_PRIORITIES: &[&str] = &["Highest", "High", "Medium", "Low", "Lowest"];
const JIRA_LEGACY_PRIORITIES: &[&str] = &["Blocker", "Critical", "Major", "Minor", "Trivial"];
const JIRA_CLOSED_STATUSES: &[&str] = &["Done", "Closed", "Resolved"];
const JIRA_SUBTASK_TYPES: &[&str] = &["Sub-task", "Subtask"];

impl Vocabulary for JiraVocabulary {
    fn priority(&self, raw: &str) -> Priority {
        Priority {
            name: raw.to_string(),
            rank: rank_of(JIRA_PRIORITIES, raw).or_else(|| rank_of(JIRA_LEGACY_PRIORITIES, raw)),
        }
    }

    /// Jira has no severity field; legacy priority names double as one.
    fn severity(&self, raw: &str) -> Severity {
        Severity {
            name: raw.to_string(),
            rank: rank_of(JIRA_LEGACY_PRIORITIES, raw),
        }
    }

    fn status(&self, raw: &str) -> Status {
        Status {
            name: raw.to_string(),
            is_open: rank_of(JIRA_CLOSED_STATUSES, raw).is_none(),
        }
    }

    fn issue_type(&self, raw: &str) -> IssueType {
        IssueType {
            name: raw.to_string(),
            is_subtask: rank_of(JIRA_SUBTASK_TYPES, raw).is_some(),
        }
    }
}
