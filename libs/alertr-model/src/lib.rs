//! Alertr model library
//!
//! Plain data types shared by the hub and its collaborators:
//! - entities reconciled from status updates ([`Node`], [`Sensor`], [`AlertLevel`], ...)
//! - sensor data values and their declared types
//! - the alert level rule tree ([`RuleNode`])
//! - inbound and outbound messages

pub mod entity;
pub mod messages;
pub mod rule;
pub mod sensor_data;
pub mod types;

pub use entity::{Entity, EntityKey, EntityKind};
pub use messages::{
    AlertTriggerMessage, OptionChangeMsg, SensorAlert, SensorAlertMsg, StateChangeMsg,
    StatusUpdate,
};
pub use rule::{RuleNode, Timezone};
pub use sensor_data::{SensorData, SensorDataType};
pub use types::*;
