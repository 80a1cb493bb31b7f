//! Backend-independent domain objects.
//!
//! Entities that are shared between issues (users, projects, components,
//! versions, classifications) are handed out as `Arc`s by the
//! [`LazyRetriever`](crate::resolver::LazyRetriever), so two references to
//! the same entity within one session point at the same allocation.
//! Issue-to-issue relations are carried by id only.

mod issue;
mod project;
mod user;
mod vocabulary;

pub use issue::{
    Attachment, Comment, Issue, IssueLink, IssueType, LinkType, Priority, Severity, Status,
};
pub use project::{Classification, Component, Project, Version};
pub use user::User;
pub use vocabulary::{BugzillaVocabulary, JiraVocabulary, Vocabulary};

use std::fmt;

/// Reference to a cacheable entity by id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    /// Backend-scoped identifier.
    Id(String),
    /// Unique name (login name, product name, project key...).
    Name(String),
}

impl EntityRef {
    /// Reference by id.
    pub fn id(id: impl Into<String>) -> Self {
        EntityRef::Id(id.into())
    }

    /// Reference by name.
    pub fn name(name: impl Into<String>) -> Self {
        EntityRef::Name(name.into())
    }

    /// The id or name carried by this reference.
    pub fn value(&self) -> &str {
        match self {
            EntityRef::Id(v) | EntityRef::Name(v) => v,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "#{}", id),
            EntityRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::id("42").to_string(), "#42");
        assert_eq!(EntityRef::name("alice").to_string(), "'alice'");
    }

    #[test]
    fn test_entity_ref_kinds_are_distinct_keys() {
        assert_ne!(EntityRef::id("u1"), EntityRef::name("u1"));
        assert_eq!(EntityRef::id("u1").value(), EntityRef::name("u1").value());
    }
}
