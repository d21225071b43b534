//! Alert level rule tree
//!
//! A closed set of node variants. Trees are validated once when an alert level
//! is loaded and evaluated by `alertr-rules`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::sensor_data::SensorDataType;
use crate::types::SensorId;

/// Clock used by calendar rule elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    #[default]
    Local,
    Utc,
}

/// Rule node - one element of an alert level's boolean rule tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleNode {
    /// True if the sensor is currently in `expected_state`
    #[serde(rename_all = "camelCase")]
    Sensor {
        sensor_id: SensorId,
        expected_state: u8,
        /// Data type the rule was written against; checked when present
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_type: Option<SensorDataType>,
    },

    And { children: Vec<RuleNode> },

    Or { children: Vec<RuleNode> },

    Not { child: Box<RuleNode> },

    /// True on the listed weekdays (0 = Monday .. 6 = Sunday)
    Weekday {
        days: BTreeSet<u8>,
        #[serde(default)]
        tz: Timezone,
    },

    /// True on the listed days of the month (1..=31)
    MonthDay {
        days: BTreeSet<u8>,
        #[serde(default)]
        tz: Timezone,
    },
}

impl RuleNode {
    pub fn sensor(sensor_id: SensorId, expected_state: u8) -> Self {
        Self::Sensor {
            sensor_id,
            expected_state,
            data_type: None,
        }
    }

    pub fn and(children: Vec<RuleNode>) -> Self {
        Self::And { children }
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        Self::Or { children }
    }

    pub fn not(child: RuleNode) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

}
