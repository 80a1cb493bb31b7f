//! Configuration management for Trackbridge.
//!
//! A configuration file selects the backend, carries connection parameters
//! and holds the search parameters used to build a [`SearchCriteria`].
//!
//! ```toml
//! [backend]
//! kind = "bugzilla"
//! url = "https://bugzilla.example.org"
//! username = "me@example.org"
//!
//! [connection]
//! request_timeout_secs = 30
//!
//! [search]
//! product = ["Widgets"]
//! status.open = ["NEW", "ASSIGNED"]
//! ```

mod profile;
mod settings;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::criteria::SearchCriteria;

pub use profile::BackendProfile;
pub use settings::{BatchPolicy, ConnectionSettings};

/// Directory name used under the platform configuration directory.
const CONFIG_DIR_NAME: &str = "trackbridge";

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform configuration directory could not be determined.
    #[error("could not determine configuration directory")]
    NoConfigDir,

    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file is not valid TOML or has the wrong shape.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A setting has an invalid value.
    #[error("invalid configuration: {0}")]
    ValidationError(String),

    /// Credentials could not be obtained.
    #[error("credentials unavailable: {0}")]
    CredentialError(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Complete session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Which backend to talk to and as whom.
    pub backend: BackendProfile,

    /// Timeouts, proxy and paging.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Search parameters, as a tree.
    #[serde(default)]
    pub search: toml::Table,
}

impl Config {
    /// Create a configuration with default connection settings and no search
    /// parameters.
    pub fn new(backend: BackendProfile) -> Self {
        Self {
            backend,
            connection: ConnectionSettings::default(),
            search: toml::Table::new(),
        }
    }

    /// Load configuration from `path`, or from the default location when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        debug!(path = %path.display(), "Loading configuration");
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.connection.validate()
    }

    /// Build the search criteria described by the `[search]` section.
    pub fn search_criteria(&self) -> SearchCriteria {
        SearchCriteria::from_tree(&toml::Value::Table(self.search.clone()))
    }
}

/// Get the default configuration file path.
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
