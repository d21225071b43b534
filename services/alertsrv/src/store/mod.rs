//! Entity Store - canonical reconciled system state
//!
//! All mutations are serialized behind one lock. Readers get copies
//! ([`StoreSnapshot`] or single cloned entities), never references into the
//! live state.

mod reconcile;
mod snapshot;

pub use reconcile::{compute_diff, diff_snapshots, remove_node_cascade, Diff, Reconciliation};
pub use snapshot::StoreSnapshot;

use alertr_model::*;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AlertSrvError, ConfigInconsistencyError, Result};

/// Outcome of a single-sensor state change
#[derive(Debug, Clone, PartialEq)]
pub enum StateChangeOutcome {
    /// State applied; carries the state before the change
    Applied { previous_state: u8 },
    /// Timestamp older than the stored one; nothing changed
    Stale { stored_timestamp: i64 },
}

/// `profile` option values around one reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileChange {
    pub previous: f64,
    pub current: f64,
}

/// In-memory entity store
#[derive(Debug, Default)]
pub struct EntityStore {
    state: RwLock<StoreSnapshot>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Reconcile a full status update
    ///
    /// Either the whole update is applied or, on error, nothing is.
    pub fn reconcile(
        &self,
        update: &StatusUpdate,
    ) -> std::result::Result<Diff, ConfigInconsistencyError> {
        self.reconcile_with_profile(update).map(|(diff, _)| diff)
    }

    /// [`reconcile`](Self::reconcile), also reporting a change of the
    /// `profile` option made by this update
    ///
    /// Both values are read under the same write lock as the swap, so a
    /// concurrent option change cannot be mistaken for part of this update.
    pub fn reconcile_with_profile(
        &self,
        update: &StatusUpdate,
    ) -> std::result::Result<(Diff, Option<ProfileChange>), ConfigInconsistencyError> {
        let mut state = self.state.write();
        match compute_diff(&state, update) {
            Ok(reconciliation) => {
                let previous = state.option_value(OPTION_PROFILE);
                *state = reconciliation.next;
                let current = state.option_value(OPTION_PROFILE);
                drop(state);

                let diff = reconciliation.diff;
                if diff.is_empty() {
                    debug!("Status update reconciled without changes");
                } else {
                    info!(
                        "Status update reconciled: {} added, {} updated, {} removed",
                        diff.added.len(),
                        diff.updated.len(),
                        diff.removed.len()
                    );
                }
                let profile_change = match (previous, current) {
                    (Some(previous), Some(current)) if previous != current => {
                        Some(ProfileChange { previous, current })
                    },
                    _ => None,
                };
                Ok((diff, profile_change))
            },
            Err(e) => {
                warn!("Status update rejected: {}", e);
                Err(e)
            },
        }
    }

    /// Apply a sensor state change if `timestamp` is not older than the stored one
    ///
    /// Replaying a change with the same or an older timestamp is a no-op.
    pub fn apply_state_change(
        &self,
        sensor_id: SensorId,
        state: u8,
        timestamp: i64,
        data: Option<SensorData>,
    ) -> Result<StateChangeOutcome> {
        let mut guard = self.state.write();
        let sensor = guard
            .sensors
            .get_mut(&sensor_id)
            .ok_or(AlertSrvError::UnknownSensor(sensor_id))?;

        if timestamp < sensor.last_state_updated {
            debug!(
                "Discarding stale state for sensor {} ({} < {})",
                sensor_id, timestamp, sensor.last_state_updated
            );
            return Ok(StateChangeOutcome::Stale {
                stored_timestamp: sensor.last_state_updated,
            });
        }
        if let Some(data) = &data {
            if !data.fits(sensor.data_type) {
                return Err(AlertSrvError::invalid_data(format!(
                    "sensor {} expects {} data, got {}",
                    sensor_id,
                    sensor.data_type,
                    data.data_type()
                )));
            }
        }

        let previous_state = sensor.state;
        sensor.state = state;
        sensor.last_state_updated = timestamp;
        if let Some(data) = data {
            sensor.data = data;
        }
        Ok(StateChangeOutcome::Applied { previous_state })
    }

    /// Set (or create) an option; returns the previous value
    pub fn set_option(&self, option_type: &str, value: f64) -> Option<f64> {
        let mut guard = self.state.write();
        let previous = guard.options.get(option_type).map(|o| o.value);
        guard.options.insert(
            option_type.to_string(),
            SystemOption {
                option_type: option_type.to_string(),
                value,
            },
        );
        previous
    }

    /// Set a node's connected flag; returns the previous flag
    pub fn set_node_connected(&self, node_id: NodeId, connected: bool) -> Result<bool> {
        let mut guard = self.state.write();
        let node = guard
            .nodes
            .get_mut(&node_id)
            .ok_or(AlertSrvError::UnknownNode(node_id))?;
        Ok(std::mem::replace(&mut node.connected, connected))
    }

    /// Replace a sensor's error state; returns the previous one
    pub fn set_sensor_error_state(
        &self,
        sensor_id: SensorId,
        error_state: SensorErrorState,
    ) -> Result<SensorErrorState> {
        let mut guard = self.state.write();
        let sensor = guard
            .sensors
            .get_mut(&sensor_id)
            .ok_or(AlertSrvError::UnknownSensor(sensor_id))?;
        Ok(std::mem::replace(&mut sensor.error_state, error_state))
    }

    /// Delete a node and everything it owns
    pub fn remove_node(&self, node_id: NodeId) -> Vec<EntityKey> {
        let mut guard = self.state.write();
        remove_node_cascade(&mut guard, node_id)
    }

    // ========================================================================
    // Read accessors (copies)
    // ========================================================================

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.read().clone()
    }

    pub fn sensor(&self, sensor_id: SensorId) -> Option<Sensor> {
        self.state.read().sensors.get(&sensor_id).cloned()
    }

    pub fn node(&self, node_id: NodeId) -> Option<Node> {
        self.state.read().nodes.get(&node_id).cloned()
    }

    pub fn alert_level(&self, level: AlertLevelId) -> Option<AlertLevel> {
        self.state.read().alert_levels.get(&level).cloned()
    }

    pub fn option_value(&self, option_type: &str) -> Option<f64> {
        self.state.read().option_value(option_type)
    }

    pub fn profile(&self, profile_id: ProfileId) -> Option<Profile> {
        self.state.read().profiles.get(&profile_id).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn sensors(&self) -> Vec<Sensor> {
        self.state.read().sensors.values().cloned().collect()
    }

    pub fn alert_levels(&self) -> Vec<AlertLevel> {
        self.state.read().alert_levels.values().cloned().collect()
    }

    pub fn alerts_for_level(&self, level: AlertLevelId) -> Vec<Alert> {
        self.state
            .read()
            .alerts_for_level(level)
            .cloned()
            .collect()
    }

    pub fn entity(&self, key: &EntityKey) -> Option<Entity> {
        self.state.read().entity(key)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn update() -> StatusUpdate {
        StatusUpdate {
            server_time: 1000,
            nodes: vec![Node {
                node_id: 1,
                hostname: "pi".into(),
                node_type: NodeType::Sensor,
                instance: "sensorClientRaspberryPi".into(),
                connected: true,
                version: 0.9,
                rev: 1,
                username: "pi".into(),
                persistent: true,
            }],
            sensors: vec![Sensor {
                node_id: 1,
                sensor_id: 10,
                remote_sensor_id: 0,
                alert_delay: 0,
                alert_levels: BTreeSet::new(),
                description: "Window".into(),
                last_state_updated: 500,
                state: 0,
                data_type: SensorDataType::Int,
                data: SensorData::Int(0),
                error_state: SensorErrorState::ok(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_state_change_monotonic() {
        let store = EntityStore::new();
        store.reconcile(&update()).unwrap();

        let outcome = store
            .apply_state_change(10, 1, 600, Some(SensorData::Int(4)))
            .unwrap();
        assert_eq!(outcome, StateChangeOutcome::Applied { previous_state: 0 });

        let outcome = store.apply_state_change(10, 0, 550, None).unwrap();
        assert_eq!(
            outcome,
            StateChangeOutcome::Stale {
                stored_timestamp: 600
            }
        );
        let sensor = store.sensor(10).unwrap();
        assert_eq!(sensor.state, 1);
        assert_eq!(sensor.last_state_updated, 600);
        assert_eq!(sensor.data, SensorData::Int(4));
    }

    #[test]
    fn test_state_change_replay_is_idempotent() {
        let store = EntityStore::new();
        store.reconcile(&update()).unwrap();
        store.apply_state_change(10, 1, 600, None).unwrap();
        let before = store.snapshot();
        store.apply_state_change(10, 1, 600, None).unwrap();
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_state_change_rejects_wrong_data_type() {
        let store = EntityStore::new();
        store.reconcile(&update()).unwrap();
        let err = store
            .apply_state_change(10, 1, 600, Some(SensorData::Float(1.5)))
            .unwrap_err();
        assert!(matches!(err, AlertSrvError::InvalidData(_)));
        assert_eq!(store.sensor(10).unwrap().state, 0);
    }

    #[test]
    fn test_unknown_sensor() {
        let store = EntityStore::new();
        assert!(matches!(
            store.apply_state_change(99, 1, 1, None),
            Err(AlertSrvError::UnknownSensor(99))
        ));
    }

    #[test]
    fn test_connected_flag_survives_reconcile() {
        let store = EntityStore::new();
        store.reconcile(&update()).unwrap();
        assert!(store.set_node_connected(1, false).unwrap());
        let diff = store.reconcile(&update()).unwrap();
        assert!(diff.is_empty());
        assert!(!store.node(1).unwrap().connected);
    }

    #[test]
    fn test_remove_node_cascades() {
        let store = EntityStore::new();
        store.reconcile(&update()).unwrap();
        let removed = store.remove_node(1);
        assert_eq!(removed, vec![EntityKey::Sensor(10), EntityKey::Node(1)]);
        assert!(store.sensor(10).is_none());
        assert!(store.remove_node(1).is_empty());
    }

    #[test]
    fn test_set_option_returns_previous() {
        let store = EntityStore::new();
        assert_eq!(store.set_option(OPTION_PROFILE, 1.0), None);
        assert_eq!(store.set_option(OPTION_PROFILE, 2.0), Some(1.0));
        assert_eq!(store.option_value(OPTION_PROFILE), Some(2.0));
    }

    #[test]
    fn test_reconcile_reports_profile_change() {
        let store = EntityStore::new();
        let mut update = update();
        update.options.push(SystemOption {
            option_type: OPTION_PROFILE.into(),
            value: 0.0,
        });
        // First sight of the option is not a change
        let (_, change) = store.reconcile_with_profile(&update).unwrap();
        assert_eq!(change, None);

        update.options[0].value = 1.0;
        let (diff, change) = store.reconcile_with_profile(&update).unwrap();
        assert_eq!(diff.updated, vec![EntityKey::Option(OPTION_PROFILE.into())]);
        assert_eq!(
            change,
            Some(ProfileChange {
                previous: 0.0,
                current: 1.0
            })
        );

        let (_, change) = store.reconcile_with_profile(&update).unwrap();
        assert_eq!(change, None);
    }
}
