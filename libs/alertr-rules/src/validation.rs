//! Load-time structural checks for rule trees

use alertr_model::RuleNode;

use crate::error::{Result, RuleError};

/// Check a rule tree once when its alert level is loaded
///
/// Rejects empty `And`/`Or` nodes, sensor states other than 0/1 and calendar
/// days out of range. Sensor existence is not checked here; it may change
/// between evaluations and is reported by [`crate::evaluate`].
pub fn validate_rule_tree(node: &RuleNode) -> Result<()> {
    match node {
        RuleNode::Sensor {
            sensor_id,
            expected_state,
            ..
        } => {
            if *expected_state > 1 {
                return Err(RuleError::InvalidRule(format!(
                    "sensor {} expects state {}, only 0 and 1 exist",
                    sensor_id, expected_state
                )));
            }
            Ok(())
        },
        RuleNode::And { children } | RuleNode::Or { children } => {
            if children.is_empty() {
                return Err(RuleError::InvalidRule(
                    "boolean element without children".to_string(),
                ));
            }
            children.iter().try_for_each(validate_rule_tree)
        },
        RuleNode::Not { child } => validate_rule_tree(child),
        RuleNode::Weekday { days, .. } => {
            if days.is_empty() {
                return Err(RuleError::InvalidRule("weekday without days".to_string()));
            }
            match days.iter().find(|d| **d > 6) {
                Some(day) => Err(RuleError::InvalidRule(format!(
                    "weekday {} out of range 0..=6",
                    day
                ))),
                None => Ok(()),
            }
        },
        RuleNode::MonthDay { days, .. } => {
            if days.is_empty() {
                return Err(RuleError::InvalidRule("monthday without days".to_string()));
            }
            match days.iter().find(|d| **d == 0 || **d > 31) {
                Some(day) => Err(RuleError::InvalidRule(format!(
                    "month day {} out of range 1..=31",
                    day
                ))),
                None => Ok(()),
            }
        },
    }
}
