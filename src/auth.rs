//! Credentials for logging in to a tracker.
//!
//! Secrets are never part of the configuration file. They are looked up
//! when a session opens, from the OS keyring or from the environment.

use std::fmt;

use crate::config::{BackendProfile, ConfigError, Result};

/// The keyring service name for Trackbridge secrets.
const KEYRING_SERVICE: &str = "trackbridge";

/// Environment variable read by [`EnvCredentials`].
pub const PASSWORD_ENV_VAR: &str = "TRACKBRIDGE_PASSWORD";

/// A username and the secret that authenticates it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password or API token.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for a backend profile.
pub trait CredentialProvider: Send + Sync {
    /// Produce credentials for `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CredentialError`] if no secret is available.
    fn credentials(&self, profile: &BackendProfile) -> Result<Credentials>;
}

/// Reads the secret from the OS keyring.
///
/// The keyring entry is keyed by [`BackendProfile::keyring_user`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringCredentials;

impl CredentialProvider for KeyringCredentials {
    fn credentials(&self, profile: &BackendProfile) -> Result<Credentials> {
        let secret = get_secret(&profile.keyring_user())?;
        Ok(Credentials::new(profile.username.clone(), secret))
    }
}

/// Reads the secret from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    /// Read from `TRACKBRIDGE_PASSWORD`.
    pub fn new() -> Self {
        Self::from_var(PASSWORD_ENV_VAR)
    }

    /// Read from a custom variable.
    pub fn from_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Check whether the variable is set.
    pub fn is_available(&self) -> bool {
        std::env::var(&self.var).is_ok()
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self, profile: &BackendProfile) -> Result<Credentials> {
        let secret = std::env::var(&self.var).map_err(|_| {
            ConfigError::CredentialError(format!("environment variable {} is not set", self.var))
        })?;
        Ok(Credentials::new(profile.username.clone(), secret))
    }
}

/// Fixed credentials, ignoring the profile's username.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, _profile: &BackendProfile) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Store a profile's secret in the OS keyring.
///
/// # Errors
///
/// Returns an error if the keyring is unavailable or rejects the entry.
pub fn store_secret(profile: &BackendProfile, secret: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &profile.keyring_user()).map_err(|e| {
        ConfigError::CredentialError(format!("failed to create keyring entry: {}", e))
    })?;

    entry
        .set_password(secret)
        .map_err(|e| ConfigError::CredentialError(format!("failed to store secret: {}", e)))?;

    Ok(())
}

/// Retrieve a secret from the OS keyring.
fn get_secret(keyring_user: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, keyring_user)
        .map_err(|e| ConfigError::CredentialError(format!("failed to access keyring: {}", e)))?;

    entry
        .get_password()
        .map_err(|e| ConfigError::CredentialError(format!("failed to retrieve secret: {}", e)))
}

/// Delete a profile's secret from the OS keyring.
///
/// # Errors
///
/// Returns an error if the entry cannot be accessed or deleted.
pub fn delete_secret(profile: &BackendProfile) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &profile.keyring_user())
        .map_err(|e| ConfigError::CredentialError(format!("failed to access keyring: {}", e)))?;

    entry
        .delete_password()
        .map_err(|e| ConfigError::CredentialError(format!("failed to delete secret: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn profile() -> BackendProfile {
        BackendProfile::new("bugzilla", "https://bugzilla.example.org", "alice")
    }

    #[test]
    fn test_credentials_do_not_expose_secret() {
        let credentials = Credentials::new("alice", "hunter2");
        let debug_output = format!("{:?}", credentials);

        assert!(debug_output.contains("alice"));
        assert!(!debug_output.contains("hunter2"));
    }

    #[test]
    fn test_static_credentials() {
        let provider = StaticCredentials(Credentials::new("bob", "pw"));
        let credentials = provider.credentials(&profile()).unwrap();
        assert_eq!(credentials.username(), "bob");
        assert_eq!(credentials.secret(), "pw");
    }

    #[test]
    #[serial]
    fn test_env_credentials_reads_variable() {
        let provider = EnvCredentials::from_var("TRACKBRIDGE_TEST_PASSWORD");
        std::env::set_var("TRACKBRIDGE_TEST_PASSWORD", "s3cret");

        let credentials = provider.credentials(&profile()).unwrap();
        assert_eq!(credentials.username(), "alice");
        assert_eq!(credentials.secret(), "s3cret");

        std::env::remove_var("TRACKBRIDGE_TEST_PASSWORD");
    }

    #[test]
    #[serial]
    fn test_env_credentials_missing_variable() {
        let provider = EnvCredentials::from_var("TRACKBRIDGE_TEST_PASSWORD");
        std::env::remove_var("TRACKBRIDGE_TEST_PASSWORD");

        assert!(!provider.is_available());
        let err = provider.credentials(&profile()).unwrap_err();
        assert!(matches!(err, ConfigError::CredentialError(msg) if msg.contains("TRACKBRIDGE_TEST_PASSWORD")));
    }
}
