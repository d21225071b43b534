//! Shared fixtures for the alertsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use alertr_model::*;
use alertsrv::config::AlertSrvConfig;
use alertsrv::delivery::ChannelDelivery;
use alertsrv::storage::{HistoryRetention, MemoryStorage, StorageBackend};
use alertsrv::AlertHub;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const SERVER_NODE: NodeId = 0;
pub const SENSOR_NODE: NodeId = 1;
pub const ALERT_NODE: NodeId = 2;

pub const INSTRUMENTATION_SENSOR: SensorId = 100;
pub const NODE_TIMEOUT_SENSOR: SensorId = 101;
pub const SENSOR_TIMEOUT_SENSOR: SensorId = 102;
pub const ERROR_STATE_SENSOR: SensorId = 103;
pub const PROFILE_SENSOR: SensorId = 104;

/// Level every internal sensor reports to
pub const DIAGNOSTIC_LEVEL: AlertLevelId = 9;
/// Alert bound to [`DIAGNOSTIC_LEVEL`]
pub const DIAGNOSTIC_ALERT: AlertId = 90;

pub fn at(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

// ============================================================================
// Entities
// ============================================================================

pub fn node(node_id: NodeId, node_type: NodeType, persistent: bool) -> Node {
    Node {
        node_id,
        hostname: format!("host-{}", node_id),
        node_type,
        instance: format!("{}Client", node_type),
        connected: true,
        version: 0.9,
        rev: 1,
        username: format!("user{}", node_id),
        persistent,
    }
}

pub fn sensor(node_id: NodeId, sensor_id: SensorId, levels: &[AlertLevelId], delay: u64) -> Sensor {
    Sensor {
        node_id,
        sensor_id,
        remote_sensor_id: sensor_id,
        alert_delay: delay,
        alert_levels: levels.iter().copied().collect(),
        description: format!("sensor {}", sensor_id),
        last_state_updated: 0,
        state: 0,
        data_type: SensorDataType::None,
        data: SensorData::None,
        error_state: SensorErrorState::ok(),
    }
}

pub fn alert(alert_id: AlertId, levels: &[AlertLevelId]) -> Alert {
    Alert {
        node_id: ALERT_NODE,
        alert_id,
        remote_alert_id: alert_id,
        alert_levels: levels.iter().copied().collect(),
        description: format!("alert {}", alert_id),
    }
}

/// Level triggering on state 1 only
pub fn level(id: AlertLevelId) -> AlertLevel {
    let mut level = AlertLevel::new(id, format!("level {}", id));
    level.trigger_alert_triggered = true;
    level
}

/// Server, one persistent sensor node, one alert node and the internal sensors
pub fn base_update() -> StatusUpdate {
    let internal = [
        INSTRUMENTATION_SENSOR,
        NODE_TIMEOUT_SENSOR,
        SENSOR_TIMEOUT_SENSOR,
        ERROR_STATE_SENSOR,
        PROFILE_SENSOR,
    ];
    let mut sensors: Vec<Sensor> = internal
        .iter()
        .map(|id| sensor(SERVER_NODE, *id, &[DIAGNOSTIC_LEVEL], 0))
        .collect();
    sensors.push(sensor(SENSOR_NODE, 10, &[1], 0));

    let mut diagnostic = level(DIAGNOSTIC_LEVEL);
    diagnostic.trigger_alert_normal = true;
    diagnostic.profiles = levels(&[0, 1]);

    StatusUpdate {
        server_time: 1000,
        options: vec![],
        profiles: vec![
            Profile {
                profile_id: 0,
                name: "Home".into(),
            },
            Profile {
                profile_id: 1,
                name: "Away".into(),
            },
        ],
        nodes: vec![
            node(SERVER_NODE, NodeType::Server, true),
            node(SENSOR_NODE, NodeType::Sensor, true),
            node(ALERT_NODE, NodeType::Alert, true),
        ],
        sensors,
        alerts: vec![alert(20, &[1]), alert(DIAGNOSTIC_ALERT, &[DIAGNOSTIC_LEVEL])],
        managers: vec![],
        alert_levels: vec![level(1), diagnostic],
    }
}

pub fn sensor_alert_msg(sensor_id: SensorId, state: u8, server_time: i64) -> SensorAlertMsg {
    SensorAlertMsg {
        server_time,
        sensor_id,
        state,
        data_type: SensorDataType::None,
        data: SensorData::None,
        optional_data: None,
        change_state: true,
        has_latest_data: false,
        rules_activated: true,
        alert_levels: vec![],
    }
}

// ============================================================================
// Hub
// ============================================================================

pub fn test_config() -> AlertSrvConfig {
    let mut config = AlertSrvConfig::default();
    config.internal_sensors.instrumentation_error = Some(INSTRUMENTATION_SENSOR);
    config.internal_sensors.node_timeout = Some(NODE_TIMEOUT_SENSOR);
    config.internal_sensors.sensor_timeout = Some(SENSOR_TIMEOUT_SENSOR);
    config.internal_sensors.sensor_error_state = Some(ERROR_STATE_SENSOR);
    config.internal_sensors.profile_change = Some(PROFILE_SENSOR);
    config
}

pub struct TestHub {
    pub hub: AlertHub,
    pub storage: Arc<MemoryStorage>,
    pub outbound: mpsc::Receiver<AlertTriggerMessage>,
    pub cancel: CancellationToken,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &AlertSrvConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new(HistoryRetention::default()));
        let backend: StorageBackend = storage.clone();
        let (delivery, outbound) = ChannelDelivery::channel(256);
        let cancel = CancellationToken::new();
        let hub = AlertHub::new(config, backend, Arc::new(delivery), cancel.clone());
        Self {
            hub,
            storage,
            outbound,
            cancel,
        }
    }

    /// Hub with `update` already reconciled
    pub async fn with_update(update: &StatusUpdate) -> Self {
        let test = Self::new();
        test.hub
            .handle_status_update(SENSOR_NODE, update)
            .await
            .unwrap();
        test
    }

    /// Everything delivered so far
    pub fn delivered(&mut self) -> Vec<AlertTriggerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Executable shell script in `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn levels(ids: &[AlertLevelId]) -> BTreeSet<AlertLevelId> {
    ids.iter().copied().collect()
}
