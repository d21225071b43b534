//! Error types for the alerting hub
//!
//! Each failure class has its own enum so callers can match on the exact
//! containment policy: inconsistent status updates are rejected, instrumentation
//! and storage errors are logged and contained.

use alertr_model::{AlertLevelId, EntityKind, NodeId, NodeType, SensorId};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, AlertSrvError>;

// ============================================================================
// Reconciliation
// ============================================================================

/// Structural problem in a status update; the whole batch is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigInconsistencyError {
    #[error("Duplicate {kind} id {id} in status update")]
    DuplicateId { kind: EntityKind, id: String },

    #[error("{kind} {id} references unknown alert level {level}")]
    DanglingAlertLevel {
        kind: EntityKind,
        id: u32,
        level: AlertLevelId,
    },

    #[error("{kind} {id} references unknown node {node_id}")]
    DanglingNode {
        kind: EntityKind,
        id: u32,
        node_id: NodeId,
    },

    #[error("{kind} {id} cannot belong to node {node_id} of type {node_type}")]
    WrongNodeType {
        kind: EntityKind,
        id: u32,
        node_id: NodeId,
        node_type: NodeType,
    },

    #[error("Alert level {level} has rules activated but no rule")]
    MissingRuleRoot { level: AlertLevelId },

    #[error("Alert level {level} has an invalid rule: {reason}")]
    InvalidRule { level: AlertLevelId, reason: String },

    #[error("Alert level {level} has instrumentation activated but no command")]
    MissingInstrumentationCmd { level: AlertLevelId },
}

// ============================================================================
// Storage collaborator
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// ============================================================================
// Instrumentation
// ============================================================================

/// Failure of an instrumentation command; suppresses dispatch for its level
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentationError {
    #[error("Unable to execute instrumentation command: {0}")]
    Execution(String),

    #[error("Instrumentation exited with code {0}.")]
    ExitCode(i32),

    #[error("Process timed out.")]
    Timeout,

    #[error("Illegal script output.")]
    EmptyOutput,

    #[error("Illegal script output.")]
    IllegalOutput(String),

    #[error("Instrumentation cancelled.")]
    Cancelled,
}

impl InstrumentationError {
    /// Short classification used in diagnostic alerts and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execution(_) => "execution",
            Self::ExitCode(_) => "exit_code",
            Self::Timeout => "timeout",
            Self::EmptyOutput | Self::IllegalOutput(_) => "processing",
            Self::Cancelled => "cancelled",
        }
    }

    /// Detail beyond the display message, if any
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Execution(msg) | Self::IllegalOutput(msg) => Some(msg.clone()),
            Self::EmptyOutput => Some("no output".to_string()),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitCode(code) => Some(*code),
            _ => None,
        }
    }
}

// ============================================================================
// Service error
// ============================================================================

#[derive(Debug, Error)]
pub enum AlertSrvError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Inconsistent(#[from] ConfigInconsistencyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(SensorId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlertSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<figment::Error> for AlertSrvError {
    fn from(err: figment::Error) -> Self {
        AlertSrvError::Config(err.to_string())
    }
}

impl From<AlertSrvError> for errors::AlertrError {
    fn from(err: AlertSrvError) -> Self {
        match err {
            AlertSrvError::Config(msg) => errors::AlertrError::Configuration(msg),
            AlertSrvError::Inconsistent(e) => errors::AlertrError::Inconsistent(e.to_string()),
            AlertSrvError::Storage(e) => errors::AlertrError::Storage(e.to_string()),
            AlertSrvError::UnknownSensor(id) => {
                errors::AlertrError::Internal(format!("unknown sensor {}", id))
            },
            AlertSrvError::UnknownNode(id) => {
                errors::AlertrError::Internal(format!("unknown node {}", id))
            },
            AlertSrvError::InvalidData(msg) => errors::AlertrError::Deserialization(msg),
            AlertSrvError::Internal(msg) => errors::AlertrError::Internal(msg),
        }
    }
}
