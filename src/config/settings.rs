//! Connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

/// Largest page size accepted by either backend.
const MAX_PAGE_SIZE: u32 = 1000;

/// How failures of individual items inside a batch are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Drop the failed item, record it, keep its siblings.
    #[default]
    PartialSuccess,
    /// Fail the enclosing operation on the first failed item.
    AllOrNothing,
}

/// Transport and paging settings, applied uniformly to every backend call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionSettings {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Optional HTTP(S) proxy URL.
    pub proxy: Option<String>,
    /// Number of issues requested per search page.
    pub page_size: u32,
    /// Treatment of per-item failures.
    pub batch_policy: BatchPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            proxy: None,
            page_size: 100,
            batch_policy: BatchPolicy::default(),
        }
    }
}

impl ConnectionSettings {
    /// The connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if let Some(proxy) = &self.proxy {
            if !proxy.contains("://") {
                return Err(ConfigError::ValidationError(format!(
                    "proxy '{}' must be a URL",
                    proxy
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConnectionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = ConnectionSettings {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_page_size_bounds() {
        let settings = ConnectionSettings {
            page_size: MAX_PAGE_SIZE + 1,
            ..Default::default()
        };
        assert!(settings
            .validate()
            .unwrap_err()
            .to_string()
            .contains("page_size"));
    }

    #[test]
    fn test_proxy_must_be_url() {
        let settings = ConnectionSettings {
            proxy: Some("proxy.local:3128".to_string()),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_batch_policy_from_toml() {
        let settings: ConnectionSettings =
            toml::from_str("batch_policy = \"all_or_nothing\"").unwrap();
        assert_eq!(settings.batch_policy, BatchPolicy::AllOrNothing);
        assert_eq!(settings.page_size, 100);
    }
}
