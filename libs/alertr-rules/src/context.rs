//! Read-only view of sensor states used during evaluation

use alertr_model::{SensorDataType, SensorId};
use std::collections::HashMap;

/// State of one sensor as seen by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub state: u8,
    pub data_type: SensorDataType,
}

/// Source of sensor states for rule evaluation
///
/// Implementors must hand out a consistent snapshot: the engine may read the
/// same sensor several times during one evaluation.
pub trait RuleContext {
    fn sensor(&self, sensor_id: SensorId) -> Option<SensorReading>;
}

impl RuleContext for HashMap<SensorId, SensorReading> {
    fn sensor(&self, sensor_id: SensorId) -> Option<SensorReading> {
        self.get(&sensor_id).copied()
    }
}
