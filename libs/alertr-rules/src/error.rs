//! Rule Engine Error Types

use alertr_model::{SensorDataType, SensorId};
use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Sensor leaf references a sensor that does not exist
    #[error("Rule references unknown sensor {0}")]
    UnknownSensor(SensorId),

    /// Sensor leaf was written against a different data type
    #[error("Sensor {sensor_id} has data type {actual}, rule expects {expected}")]
    DataTypeMismatch {
        sensor_id: SensorId,
        expected: SensorDataType,
        actual: SensorDataType,
    },

    /// Structurally invalid rule tree
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}
