//! Entity type definitions
//!
//! Field names follow the wire format of status updates (camelCase).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::rule::RuleNode;
use crate::sensor_data::{SensorData, SensorDataType};

pub type NodeId = u32;
pub type SensorId = u32;
pub type AlertId = u32;
pub type ManagerId = u32;
pub type ProfileId = u32;
pub type AlertLevelId = u32;

/// Option that switches the whole alert system on (non-zero) or off (0)
pub const OPTION_ALERT_SYSTEM_ACTIVE: &str = "alertSystemActive";
/// Option holding the id of the active profile
pub const OPTION_PROFILE: &str = "profile";

// ============================================================================
// Options & Profiles
// ============================================================================

/// Global system option, e.g. `alertSystemActive`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemOption {
    #[serde(rename = "type")]
    pub option_type: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub profile_id: ProfileId,
    pub name: String,
}

// ============================================================================
// Nodes and owned entities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Sensor,
    Alert,
    Manager,
    Server,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sensor => "sensor",
            Self::Alert => "alert",
            Self::Manager => "manager",
            Self::Server => "server",
        };
        f.write_str(name)
    }
}

/// Connected client (or the server itself)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: NodeId,
    pub hostname: String,
    pub node_type: NodeType,
    pub instance: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub version: f64,
    #[serde(default)]
    pub rev: u32,
    pub username: String,
    /// Persistent nodes are expected to stay connected; losing them raises an alert
    #[serde(default)]
    pub persistent: bool,
}

/// Error state reported for a sensor; code 0 means OK
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorErrorState {
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

impl SensorErrorState {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub node_id: NodeId,
    pub sensor_id: SensorId,
    pub remote_sensor_id: u32,
    /// Seconds an alert of this sensor is held back before evaluation
    #[serde(default)]
    pub alert_delay: u64,
    #[serde(default)]
    pub alert_levels: BTreeSet<AlertLevelId>,
    pub description: String,
    /// Unix timestamp of the last state change
    #[serde(default)]
    pub last_state_updated: i64,
    #[serde(default)]
    pub state: u8,
    #[serde(default)]
    pub data_type: SensorDataType,
    #[serde(default)]
    pub data: SensorData,
    #[serde(default)]
    pub error_state: SensorErrorState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub node_id: NodeId,
    pub alert_id: AlertId,
    pub remote_alert_id: u32,
    #[serde(default)]
    pub alert_levels: BTreeSet<AlertLevelId>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manager {
    pub node_id: NodeId,
    pub manager_id: ManagerId,
    pub description: String,
}

// ============================================================================
// Alert Levels
// ============================================================================

/// Central routing unit between sensors and alert clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLevel {
    pub level: AlertLevelId,
    pub name: String,
    #[serde(default)]
    pub profiles: BTreeSet<ProfileId>,
    #[serde(default)]
    pub trigger_always: bool,
    #[serde(default)]
    pub trigger_alert_triggered: bool,
    #[serde(default)]
    pub trigger_alert_normal: bool,
    #[serde(default)]
    pub rules_activated: bool,
    /// Present exactly when `rules_activated` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_root: Option<RuleNode>,
    #[serde(default, rename = "instrumentation_active")]
    pub instrumentation_active: bool,
    #[serde(default, rename = "instrumentation_cmd")]
    pub instrumentation_cmd: Option<String>,
    /// Seconds
    #[serde(default, rename = "instrumentation_timeout")]
    pub instrumentation_timeout: u64,
}

impl AlertLevel {
    /// Level with every optional behaviour switched off
    pub fn new(level: AlertLevelId, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            profiles: BTreeSet::new(),
            trigger_always: false,
            trigger_alert_triggered: false,
            trigger_alert_normal: false,
            rules_activated: false,
            rule_root: None,
            instrumentation_active: false,
            instrumentation_cmd: None,
            instrumentation_timeout: 0,
        }
    }
}
