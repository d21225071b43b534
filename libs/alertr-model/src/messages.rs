//! Inbound and outbound messages of the hub
//!
//! Inbound messages arrive already authenticated and decoded from the session
//! layer. Outbound [`AlertTriggerMessage`]s go to the delivery layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::sensor_data::{SensorData, SensorDataType};
use crate::types::*;

// ============================================================================
// Inbound
// ============================================================================

/// Full status report; reconciled into the entity store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusUpdate {
    pub server_time: i64,
    pub options: Vec<SystemOption>,
    pub profiles: Vec<Profile>,
    pub nodes: Vec<Node>,
    pub sensors: Vec<Sensor>,
    pub alerts: Vec<Alert>,
    pub managers: Vec<Manager>,
    pub alert_levels: Vec<AlertLevel>,
}

/// Sensor alert reported by a sensor client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAlertMsg {
    pub server_time: i64,
    pub sensor_id: SensorId,
    pub state: u8,
    #[serde(default)]
    pub data_type: SensorDataType,
    #[serde(default)]
    pub data: SensorData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_data: Option<Value>,
    /// Also apply `state` to the stored sensor
    #[serde(default)]
    pub change_state: bool,
    /// `data` is the sensor's latest value and should be stored
    #[serde(default)]
    pub has_latest_data: bool,
    #[serde(default = "default_true")]
    pub rules_activated: bool,
    /// Levels as known to the client; the stored sensor's levels are authoritative
    #[serde(default)]
    pub alert_levels: Vec<AlertLevelId>,
}

fn default_true() -> bool {
    true
}

/// State change without alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeMsg {
    pub server_time: i64,
    pub sensor_id: SensorId,
    pub state: u8,
    #[serde(default)]
    pub data_type: SensorDataType,
    #[serde(default)]
    pub data: SensorData,
}

/// Option update, optionally applied after `delay` seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChangeMsg {
    #[serde(rename = "type")]
    pub option_type: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

// ============================================================================
// Sensor alert event
// ============================================================================

/// Queued sensor alert, evaluated once its delay has elapsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAlert {
    pub sensor_id: SensorId,
    pub node_id: NodeId,
    pub description: String,
    pub state: u8,
    pub alert_levels: BTreeSet<AlertLevelId>,
    /// Unix timestamp the event was received
    pub time_received: i64,
    /// Seconds
    pub alert_delay: u64,
    pub has_optional_data: bool,
    #[serde(default)]
    pub optional_data: Option<Value>,
    pub change_state: bool,
    pub has_latest_data: bool,
    pub data_type: SensorDataType,
    pub data: SensorData,
    pub rules_activated: bool,
}

impl SensorAlert {
    /// Unix timestamp at which the event becomes due for evaluation
    pub fn due_at(&self) -> i64 {
        self.time_received
            .saturating_add(i64::try_from(self.alert_delay).unwrap_or(i64::MAX))
    }

    /// Attach optional data, keeping `has_optional_data` consistent
    pub fn with_optional_data(mut self, optional_data: Option<Value>) -> Self {
        self.has_optional_data = optional_data.is_some();
        self.optional_data = optional_data;
        self
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Notification for one alert client entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTriggerMessage {
    pub alert_id: AlertId,
    pub remote_alert_id: u32,
    pub node_id: NodeId,
    pub sensor_id: SensorId,
    pub state: u8,
    pub description: String,
    pub time_received: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_data: Option<Value>,
    /// Levels of this alert that triggered for the event
    pub triggered_alert_levels: Vec<AlertLevelId>,
    pub data_type: SensorDataType,
    pub data: SensorData,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensor_alert_msg_defaults() {
        let msg: SensorAlertMsg = serde_json::from_value(json!({
            "serverTime": 100,
            "sensorId": 3,
            "state": 1
        }))
        .unwrap();
        assert!(msg.rules_activated);
        assert!(!msg.change_state);
        assert_eq!(msg.data, SensorData::None);
    }

    #[test]
    fn test_due_at() {
        let alert = SensorAlert {
            sensor_id: 1,
            node_id: 1,
            description: "s".into(),
            state: 1,
            alert_levels: BTreeSet::new(),
            time_received: 100,
            alert_delay: 5,
            has_optional_data: false,
            optional_data: None,
            change_state: false,
            has_latest_data: false,
            data_type: SensorDataType::None,
            data: SensorData::None,
            rules_activated: true,
        };
        assert_eq!(alert.due_at(), 105);
        let alert = alert.with_optional_data(Some(json!({"message": "x"})));
        assert!(alert.has_optional_data);
    }
}
