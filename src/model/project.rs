//! Projects and the entities scoped by them.

use std::sync::Arc;

/// A project (Bugzilla product, Jira project). Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    /// Product name or project key.
    pub name: String,
    pub description: String,
    /// Name of the classification (Jira project category) it belongs to.
    pub classification: Option<String>,
    pub components: Vec<Arc<Component>>,
    pub versions: Vec<Arc<Version>>,
}

impl Project {
    /// Find a component by name.
    pub fn component(&self, name: &str) -> Option<&Arc<Component>> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Find a version by name.
    pub fn version(&self, name: &str) -> Option<&Arc<Version>> {
        self.versions.iter().find(|v| v.name == name)
    }
}

/// A grouping of projects. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A project component. Identity is `(project_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub project_id: String,
    pub name: String,
    pub description: String,
}

/// A project version or milestone. Identity is `(project_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub project_id: String,
    pub name: String,
}
