//! Search criteria: an ordered, multi-valued parameter bag.
//!
//! Field-by-field backends (Bugzilla) send every parameter as a search
//! field. Query-language backends (Jira) read the single opaque
//! [`QUERY_PARAMETER`].

use std::collections::{BTreeSet, HashMap};

/// Name of the parameter carrying an opaque query-language string.
pub const QUERY_PARAMETER: &str = "query";

/// Canonical separator for nested parameter names.
const PATH_SEPARATOR: char = '/';

/// Multi-valued search parameters.
///
/// Values are kept in insertion order per name and additions to an existing
/// name append. Parameter names are kept in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl SearchCriteria {
    /// Create empty criteria.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create criteria holding a single opaque query string.
    pub fn query(query: impl Into<String>) -> Self {
        let mut criteria = Self::new();
        criteria.add(QUERY_PARAMETER, query);
        criteria
    }

    /// Append a value to a parameter.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.values.entry(name).or_default().push(value.into());
        self
    }

    /// Append every value to a parameter, in order.
    pub fn add_all<I, V>(&mut self, name: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        for value in values {
            self.add(name.clone(), value);
        }
        self
    }

    /// Get the values of a parameter, in insertion order.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Check whether a parameter has at least one value.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// The set of parameter names.
    pub fn parameter_names(&self) -> BTreeSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Iterate over parameters in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.names
            .iter()
            .map(|name| (name.as_str(), self.values[name].as_slice()))
    }

    /// Number of distinct parameters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check whether no parameter has been added.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Build criteria from a hierarchical configuration tree.
    ///
    /// Every leaf becomes a parameter whose name is the path to it, with
    /// table nesting and dots inside keys both rendered as `/`. Keys and
    /// array elements are visited in document order; non-string scalars are
    /// rendered with their TOML representation.
    pub fn from_tree(tree: &toml::Value) -> Self {
        let mut criteria = Self::new();
        collect_leaves(tree, "", &mut criteria);
        criteria
    }
}

fn collect_leaves(value: &toml::Value, path: &str, criteria: &mut SearchCriteria) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let segment = normalize_segment(key);
                let child_path = if path.is_empty() {
                    segment
                } else {
                    format!("{}{}{}", path, PATH_SEPARATOR, segment)
                };
                collect_leaves(child, &child_path, criteria);
            }
        }
        toml::Value::Array(items) => {
            for item in items {
                collect_leaves(item, path, criteria);
            }
        }
        toml::Value::String(s) => {
            criteria.add(path, s.as_str());
        }
        other => {
            criteria.add(path, other.to_string());
        }
    }
}

fn normalize_segment(key: &str) -> String {
    key.split(['.', '/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(&PATH_SEPARATOR.to_string())
}
