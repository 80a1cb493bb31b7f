//! Error types shared by every layer of Trackbridge.
//!
//! Backend clients, wire parsers, the reference resolver and the session all
//! report failures through [`TrackerError`]. The type is `Clone` so that a
//! single failed fetch can be handed to every caller that joined it.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while talking to an issue tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// Bad or missing settings, detected when a session is opened.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connectivity failure or timeout. Callers may retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a payload of unexpected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend reported a business error (bad credentials, unknown id, ...).
    #[error("Backend error {code}: {message}")]
    Backend {
        /// Backend specific error code.
        code: String,
        /// Human readable message from the backend.
        message: String,
    },

    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not valid in the current session state.
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// Create a backend error from a code and a message.
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        TrackerError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        TrackerError::Protocol(msg.into())
    }

    /// Create an error from an HTTP status code.
    ///
    /// Statuses the caller may reasonably retry (timeouts, throttling,
    /// server failures) become [`TrackerError::Transport`]; everything else
    /// is a backend verdict.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            401 | 403 => TrackerError::backend(status.as_u16().to_string(), context),
            404 => TrackerError::NotFound(context.to_string()),
            408 | 429 | 500..=599 => {
                TrackerError::Transport(format!("HTTP {}: {}", status, context))
            }
            _ => TrackerError::backend(status.as_u16().to_string(), context),
        }
    }

    /// Check if the caller may retry the failed operation.
    ///
    /// Nothing inside Trackbridge retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::Transport(_))
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackerError::Protocol(format!("failed to decode response: {}", err))
        } else if err.is_timeout() {
            TrackerError::Transport(format!("request timed out: {}", err))
        } else if err.is_builder() {
            TrackerError::Configuration(format!("invalid request: {}", err))
        } else {
            TrackerError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Protocol(format!("malformed JSON: {}", err))
    }
}

impl From<ConfigError> for TrackerError {
    fn from(err: ConfigError) -> Self {
        TrackerError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_error_from_status_401() {
        let err = TrackerError::from_status(StatusCode::UNAUTHORIZED, "login");
        assert_eq!(err, TrackerError::backend("401", "login"));
    }

    #[test]
    fn test_error_from_status_404() {
        let err = TrackerError::from_status(StatusCode::NOT_FOUND, "issue PROJ-123");
        match err {
            TrackerError::NotFound(msg) => assert_eq!(msg, "issue PROJ-123"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_error_from_status_gateway_timeout_is_transport() {
        let err = TrackerError::from_status(StatusCode::GATEWAY_TIMEOUT, "search");
        assert!(matches!(err, TrackerError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_from_status_400_is_backend() {
        let err = TrackerError::from_status(StatusCode::BAD_REQUEST, "bad jql");
        assert!(matches!(err, TrackerError::Backend { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_from_config_error() {
        let err: TrackerError = ConfigError::ValidationError("no url".to_string()).into();
        assert!(matches!(err, TrackerError::Configuration(msg) if msg.contains("no url")));
    }

    #[test]
    fn test_error_display() {
        let err = TrackerError::backend("100", "bad id");
        assert_eq!(err.to_string(), "Backend error 100: bad id");

        let err = TrackerError::NotFound("user 'u1'".to_string());
        assert_eq!(err.to_string(), "Not found: user 'u1'");
    }
}
