//! Internal (server-owned) sensors
//!
//! Self-monitoring conditions are reported as ordinary sensor alerts of
//! sensors that belong to the server node, so alert levels bound to them go
//! through the same rules, instrumentation and dispatch as any client sensor.
//! Each kind is optional; an unconfigured kind is silently skipped.

use alertr_model::{AlertLevel, SensorAlert, SensorId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::InstrumentationError;
use crate::executer::{Enqueued, SensorAlertQueue};
use crate::store::{EntityStore, StateChangeOutcome};

/// Self-monitoring condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalSensorKind {
    NodeTimeout,
    SensorTimeout,
    InstrumentationError,
    SensorErrorState,
    ProfileChange,
}

impl InternalSensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeTimeout => "node_timeout",
            Self::SensorTimeout => "sensor_timeout",
            Self::InstrumentationError => "instrumentation_error",
            Self::SensorErrorState => "sensor_error_state",
            Self::ProfileChange => "profile_change",
        }
    }
}

impl std::fmt::Display for InternalSensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor ids of the internal sensors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalSensorIds {
    pub node_timeout: Option<SensorId>,
    pub sensor_timeout: Option<SensorId>,
    pub instrumentation_error: Option<SensorId>,
    pub sensor_error_state: Option<SensorId>,
    pub profile_change: Option<SensorId>,
}

impl InternalSensorIds {
    pub fn get(&self, kind: InternalSensorKind) -> Option<SensorId> {
        match kind {
            InternalSensorKind::NodeTimeout => self.node_timeout,
            InternalSensorKind::SensorTimeout => self.sensor_timeout,
            InternalSensorKind::InstrumentationError => self.instrumentation_error,
            InternalSensorKind::SensorErrorState => self.sensor_error_state,
            InternalSensorKind::ProfileChange => self.profile_change,
        }
    }

    /// Configured ids with their kind
    pub fn configured(&self) -> Vec<(InternalSensorKind, SensorId)> {
        [
            InternalSensorKind::NodeTimeout,
            InternalSensorKind::SensorTimeout,
            InternalSensorKind::InstrumentationError,
            InternalSensorKind::SensorErrorState,
            InternalSensorKind::ProfileChange,
        ]
        .into_iter()
        .filter_map(|kind| self.get(kind).map(|id| (kind, id)))
        .collect()
    }

    pub fn contains(&self, sensor_id: SensorId) -> bool {
        self.configured().iter().any(|(_, id)| *id == sensor_id)
    }
}

/// Raises sensor alerts for internal sensors
#[derive(Debug)]
pub struct InternalSensors {
    ids: InternalSensorIds,
    store: Arc<EntityStore>,
    queue: Arc<SensorAlertQueue>,
}

impl InternalSensors {
    pub fn new(ids: InternalSensorIds, store: Arc<EntityStore>, queue: Arc<SensorAlertQueue>) -> Self {
        Self { ids, store, queue }
    }

    pub fn ids(&self) -> &InternalSensorIds {
        &self.ids
    }

    /// Queue a sensor alert for the internal sensor of `kind`
    ///
    /// With `change_state` the stored sensor state is set first. Returns
    /// `None` if the kind is not configured or its sensor is not in the store.
    pub fn raise(
        &self,
        kind: InternalSensorKind,
        state: u8,
        optional_data: Option<Value>,
        change_state: bool,
        now: i64,
    ) -> Option<Enqueued> {
        let sensor_id = self.ids.get(kind)?;
        let Some(sensor) = self.store.sensor(sensor_id) else {
            warn!(
                "Internal sensor {} ({}) is not part of the system configuration",
                kind, sensor_id
            );
            return None;
        };

        if change_state {
            match self.store.apply_state_change(sensor_id, state, now, None) {
                Ok(StateChangeOutcome::Applied { .. }) => {},
                Ok(StateChangeOutcome::Stale { stored_timestamp }) => debug!(
                    "Internal sensor {} state older than stored ({})",
                    kind, stored_timestamp
                ),
                Err(e) => warn!("Unable to change state of internal sensor {}: {}", kind, e),
            }
        }

        let alert = SensorAlert {
            sensor_id,
            node_id: sensor.node_id,
            description: sensor.description,
            state,
            alert_levels: sensor.alert_levels,
            time_received: now,
            alert_delay: sensor.alert_delay,
            has_optional_data: false,
            optional_data: None,
            change_state,
            has_latest_data: false,
            data_type: sensor.data_type,
            data: sensor.data,
            // Instrumentation diagnostics must not run into instrumentation again
            rules_activated: kind != InternalSensorKind::InstrumentationError,
        }
        .with_optional_data(optional_data);

        debug!("Raising internal sensor {} with state {}", kind, state);
        Some(self.queue.push(alert, now))
    }

    /// Diagnostic for a failed instrumentation run of `level`
    pub fn raise_instrumentation_error(
        &self,
        level: &AlertLevel,
        error: &InstrumentationError,
        now: i64,
    ) -> Option<Enqueued> {
        let mut data = json!({
            "message": error.to_string(),
            "alert_level": level.level,
            "instrumentation_cmd": level.instrumentation_cmd.clone().unwrap_or_default(),
            "instrumentation_timeout": level.instrumentation_timeout,
            "reason": error.kind(),
        });
        if let (Some(code), Value::Object(map)) = (error.exit_code(), &mut data) {
            map.insert("exit_code".to_string(), json!(code));
        }
        self.raise(InternalSensorKind::InstrumentationError, 1, Some(data), false, now)
    }

    pub fn raise_profile_change(&self, profile_id: u32, name: &str, now: i64) -> Option<Enqueued> {
        self.raise(
            InternalSensorKind::ProfileChange,
            1,
            Some(json!({ "profile_id": profile_id, "name": name })),
            false,
            now,
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use alertr_model::*;
    use std::collections::BTreeSet;

    fn store() -> Arc<EntityStore> {
        let store = EntityStore::new();
        let server = Node {
            node_id: 0,
            hostname: "hub".into(),
            node_type: NodeType::Server,
            instance: "server".into(),
            connected: true,
            version: 0.9,
            rev: 0,
            username: String::new(),
            persistent: true,
        };
        let sensor = Sensor {
            node_id: 0,
            sensor_id: 100,
            remote_sensor_id: 0,
            alert_delay: 0,
            alert_levels: BTreeSet::from([9]),
            description: "Instrumentation errors".into(),
            last_state_updated: 0,
            state: 0,
            data_type: SensorDataType::None,
            data: SensorData::None,
            error_state: SensorErrorState::ok(),
        };
        store
            .reconcile(&StatusUpdate {
                nodes: vec![server],
                sensors: vec![sensor],
                alert_levels: vec![AlertLevel::new(9, "Diagnostics")],
                ..Default::default()
            })
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_instrumentation_diagnostic() {
        let queue = Arc::new(SensorAlertQueue::new());
        let internal = InternalSensors::new(
            InternalSensorIds {
                instrumentation_error: Some(100),
                ..Default::default()
            },
            store(),
            queue.clone(),
        );

        let mut level = AlertLevel::new(3, "Instrumented");
        level.instrumentation_cmd = Some("/usr/local/bin/check".into());
        level.instrumentation_timeout = 2;

        let enqueued =
            internal.raise_instrumentation_error(&level, &InstrumentationError::ExitCode(3), 50);
        assert_eq!(enqueued, Some(Enqueued::Ready));

        let alert = queue.pop_due(50).pop().unwrap();
        assert!(!alert.rules_activated);
        assert_eq!(alert.alert_levels, BTreeSet::from([9]));
        let data = alert.optional_data.unwrap();
        assert_eq!(data["alert_level"], 3);
        assert_eq!(data["reason"], "exit_code");
        assert_eq!(data["exit_code"], 3);
        assert_eq!(data["instrumentation_timeout"], 2);
    }

    #[test]
    fn test_unconfigured_kind_is_skipped() {
        let queue = Arc::new(SensorAlertQueue::new());
        let internal = InternalSensors::new(InternalSensorIds::default(), store(), queue.clone());
        assert!(internal.raise_profile_change(1, "Away", 10).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_change_state_applies_to_store() {
        let store = store();
        let queue = Arc::new(SensorAlertQueue::new());
        let internal = InternalSensors::new(
            InternalSensorIds {
                node_timeout: Some(100),
                ..Default::default()
            },
            store.clone(),
            queue,
        );
        internal.raise(InternalSensorKind::NodeTimeout, 1, None, true, 20);
        let sensor = store.sensor(100).unwrap();
        assert_eq!(sensor.state, 1);
        assert_eq!(sensor.last_state_updated, 20);
    }
}
