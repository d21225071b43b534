//! Unified error handling for Alertr services
//!
//! Library crates keep their own narrow error enums; binaries fold them into
//! [`AlertrError`] so that start-up and shutdown paths share one type.

use thiserror::Error;

// ============================================================================
// AlertrError - Main error type
// ============================================================================

/// Main error type for all Alertr services
#[derive(Debug, Error)]
pub enum AlertrError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Storage Errors
    // ======================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    // ======================================
    // State & Pipeline Errors
    // ======================================
    #[error("Inconsistent status update: {0}")]
    Inconsistent(String),

    #[error("Rule error: {0}")]
    Rule(String),

    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using AlertrError
pub type AlertrResult<T> = Result<T, AlertrError>;

impl AlertrError {
    /// Process exit code used when this error terminates a service
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => 78,
            Self::Storage(_) | Self::Sqlite(_) => 74,
            Self::Io(_) => 74,
            _ => 1,
        }
    }

    /// Errors that only affect a single event and never stop a service
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::Rule(_) | Self::Instrumentation(_) | Self::Timeout(_) | Self::Storage(_)
        )
    }

    /// Log level used when the error is reported
    pub fn log_level(&self) -> tracing::Level {
        if self.is_contained() {
            tracing::Level::WARN
        } else {
            tracing::Level::ERROR
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for AlertrError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AlertrError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<figment::Error> for AlertrError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::AlertrError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::AlertrError::Configuration(format!($fmt, $($arg)*))
    };
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AlertrError::Configuration("x".into()).exit_code(), 78);
        assert_eq!(
            AlertrError::InvalidConfig {
                field: "watchdog".into(),
                reason: "zero".into()
            }
            .exit_code(),
            78
        );
        assert_eq!(AlertrError::Storage("x".into()).exit_code(), 74);
        assert_eq!(AlertrError::Internal("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_contained_errors() {
        assert!(AlertrError::Rule("missing sensor".into()).is_contained());
        assert!(AlertrError::Instrumentation("exit 3".into()).is_contained());
        assert!(!AlertrError::Inconsistent("dup".into()).is_contained());
        assert_eq!(
            AlertrError::Timeout("t".into()).log_level(),
            tracing::Level::WARN
        );
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("bad value {}", 3);
        assert_eq!(err.to_string(), "Configuration error: bad value 3");
    }

    #[test]
    fn test_json_conversion() {
        let err: AlertrError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AlertrError::Serialization(_)));
    }
}
