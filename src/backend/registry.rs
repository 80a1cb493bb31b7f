//! Backend lookup by kind name.
//!
//! The set of backends is fixed at compile time. Each entry maps the kind
//! name used in configuration to a factory that builds an unauthenticated
//! [`Backend`] for a configuration.

use super::{bugzilla, jira, Backend};
use crate::config::Config;
use crate::error::Result;

/// Builds a backend for a configuration.
pub type BackendFactory = fn(&Config) -> Result<Backend>;

/// Known backends.
const BACKENDS: &[(&str, BackendFactory)] = &[
    ("bugzilla", bugzilla::connect),
    ("jira", jira::connect),
];

/// Look up the factory for `kind`, ignoring case and surrounding blanks.
pub fn lookup(kind: &str) -> Option<BackendFactory> {
    let kind = kind.trim();
    BACKENDS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(kind))
        .map(|(_, factory)| *factory)
}

/// Names of every registered backend kind.
pub fn kinds() -> Vec<&'static str> {
    BACKENDS.iter().map(|(name, _)| *name).collect()
}
