//! Backend profile configuration.

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

/// Connection details for one tracker instance.
///
/// Passwords are never stored here; they come from a
/// [`CredentialProvider`](crate::auth::CredentialProvider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendProfile {
    /// The backend kind, looked up in the backend registry (e.g. "bugzilla").
    pub kind: String,

    /// Base URL of the tracker instance.
    pub url: String,

    /// Login name used to authenticate.
    pub username: String,
}

impl BackendProfile {
    /// Create a new profile.
    pub fn new(kind: &str, url: &str, username: &str) -> Self {
        Self {
            kind: kind.to_string(),
            url: url.to_string(),
            username: username.to_string(),
        }
    }

    /// Validate this profile.
    ///
    /// Checks that the kind and username are non-empty and the URL has an
    /// http(s) scheme. Whether the kind names a known backend is checked
    /// when the session opens.
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend kind cannot be empty".to_string(),
            ));
        }

        if self.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "backend URL cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("https://") && !self.url.starts_with("http://") {
            return Err(ConfigError::ValidationError(format!(
                "backend URL '{}' must start with http:// or https://",
                self.url
            )));
        }

        if self.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "username cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The account name under which this profile's secret is kept in the
    /// OS keyring.
    pub fn keyring_user(&self) -> String {
        format!("{}@{}", self.username, self.url.trim_end_matches('/'))
    }
}
