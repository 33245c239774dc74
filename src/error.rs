//! Error types for the media cache
//!
//! Provides structured error types for the cache layers, the key strategy,
//! the warming service and configuration loading.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the cache subsystem
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Key Errors
    // =========================================================================
    #[error("Invalid cache key format: {key}")]
    InvalidKeyFormat { key: String },

    // =========================================================================
    // Memory Layer Errors
    // =========================================================================
    #[error("Cache full in layer {layer}: {reason}")]
    CacheFull { layer: String, reason: String },

    // =========================================================================
    // Remote Layer Errors
    // =========================================================================
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Remote connection pool error: {0}")]
    RemotePool(String),

    #[error("Remote operation {operation} timed out after {timeout:?}")]
    RemoteTimeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    #[error("Cron expression error: {expression} - {reason}")]
    CronParse { expression: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            Error::RemotePool(_) | Error::RemoteTimeout { .. } | Error::RemoteUnavailable(_) => {
                true
            }
            _ => false,
        }
    }

    /// Check if this error comes from caller misuse rather than a runtime condition
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Error::InvalidKeyFormat { .. })
    }
}

/// Result type alias for the cache subsystem
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        let timeout = Error::RemoteTimeout {
            operation: "get".into(),
            timeout: Duration::from_millis(500),
        };
        assert!(timeout.is_transient());
        assert!(Error::RemotePool("exhausted".into()).is_transient());

        let config_err = Error::Configuration("missing host".into());
        assert!(!config_err.is_transient());

        let full = Error::CacheFull {
            layer: "memory".into(),
            reason: "max keys".into(),
        };
        assert!(!full.is_transient());
    }

    #[test]
    fn test_caller_error() {
        let err = Error::InvalidKeyFormat { key: "nocolon".into() };
        assert!(err.is_caller_error());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Invalid cache key format: nocolon");
    }
}
