//! Immutable view of the reconciled system state

use alertr_model::*;
use alertr_rules::{RuleContext, SensorReading};
use std::collections::BTreeMap;

/// Complete copy of the entity store at one point in time
///
/// Readers always work on a snapshot, never on the live store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub server_time: i64,
    pub options: BTreeMap<String, SystemOption>,
    pub profiles: BTreeMap<ProfileId, Profile>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub sensors: BTreeMap<SensorId, Sensor>,
    pub alerts: BTreeMap<AlertId, Alert>,
    pub managers: BTreeMap<ManagerId, Manager>,
    pub alert_levels: BTreeMap<AlertLevelId, AlertLevel>,
}

impl StoreSnapshot {
    pub fn option_value(&self, option_type: &str) -> Option<f64> {
        self.options.get(option_type).map(|o| o.value)
    }

    /// False only if `alertSystemActive` exists and is 0
    pub fn alert_system_active(&self) -> bool {
        self.option_value(OPTION_ALERT_SYSTEM_ACTIVE)
            .map_or(true, |v| v != 0.0)
    }

    /// Id of the active profile, if the `profile` option is set
    pub fn active_profile(&self) -> Option<ProfileId> {
        self.option_value(OPTION_PROFILE)
            .filter(|v| *v >= 0.0)
            .map(|v| v as ProfileId)
    }

    /// Alerts bound to `level`
    pub fn alerts_for_level(&self, level: AlertLevelId) -> impl Iterator<Item = &Alert> {
        self.alerts
            .values()
            .filter(move |a| a.alert_levels.contains(&level))
    }

    pub fn entity(&self, key: &EntityKey) -> Option<Entity> {
        match key {
            EntityKey::Option(name) => self.options.get(name).cloned().map(Entity::Option),
            EntityKey::Profile(id) => self.profiles.get(id).cloned().map(Entity::Profile),
            EntityKey::Node(id) => self.nodes.get(id).cloned().map(Entity::Node),
            EntityKey::Sensor(id) => self.sensors.get(id).cloned().map(Entity::Sensor),
            EntityKey::Alert(id) => self.alerts.get(id).cloned().map(Entity::Alert),
            EntityKey::Manager(id) => self.managers.get(id).cloned().map(Entity::Manager),
            EntityKey::AlertLevel(id) => self.alert_levels.get(id).cloned().map(Entity::AlertLevel),
        }
    }

}

impl RuleContext for StoreSnapshot {
    fn sensor(&self, sensor_id: SensorId) -> Option<SensorReading> {
        self.sensors.get(&sensor_id).map(|s| SensorReading {
            state: s.state,
            data_type: s.data_type,
        })
    }
}
