//! Connection Watchdog
//!
//! Tracks when every node was last heard from and sweeps periodically:
//! - nodes silent for longer than the connection timeout are marked
//!   disconnected; persistent ones raise the node timeout internal sensor
//! - persistent nodes on the grace list (start-up, explicit disconnect) time
//!   out once their grace period passes without a message
//! - sensors whose last state update is too old raise the sensor timeout
//!   internal sensor
//! - reminders are raised while anything stays timed out
//!
//! The watchdog only detects and reports; reconnecting is up to the clients.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alertr_model::{Node, NodeId, NodeType, SensorId};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::internal_sensors::{InternalSensorKind, InternalSensors};
use crate::store::EntityStore;

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Nodes marked disconnected
    pub disconnected: Vec<NodeId>,
    /// Nodes that raised a node timeout alert
    pub timed_out_nodes: Vec<NodeId>,
    pub timed_out_sensors: Vec<SensorId>,
    pub recovered_sensors: Vec<SensorId>,
    pub reminders: usize,
}

#[derive(Debug, Default)]
struct WatchdogState {
    /// Grace deadline per node not heard from yet
    pre_timeout: BTreeMap<NodeId, i64>,
    timed_out_nodes: BTreeSet<NodeId>,
    timed_out_sensors: BTreeSet<SensorId>,
    last_node_reminder: i64,
    last_sensor_reminder: i64,
}

#[derive(Debug)]
pub struct ConnectionWatchdog {
    config: WatchdogConfig,
    store: Arc<EntityStore>,
    internal: Arc<InternalSensors>,
    last_seen: DashMap<NodeId, i64>,
    state: Mutex<WatchdogState>,
}

impl ConnectionWatchdog {
    pub fn new(config: WatchdogConfig, store: Arc<EntityStore>, internal: Arc<InternalSensors>) -> Self {
        Self {
            config,
            store,
            internal,
            last_seen: DashMap::new(),
            state: Mutex::new(WatchdogState::default()),
        }
    }

    pub fn last_seen(&self, node_id: NodeId) -> Option<i64> {
        self.last_seen.get(&node_id).map(|seen| *seen)
    }

    pub fn timed_out_nodes(&self) -> Vec<NodeId> {
        self.state.lock().timed_out_nodes.iter().copied().collect()
    }

    pub fn timed_out_sensors(&self) -> Vec<SensorId> {
        self.state.lock().timed_out_sensors.iter().copied().collect()
    }

    /// Put every persistent client node on the grace list
    pub fn initialize(&self, now: i64) {
        let deadline = now.saturating_add(secs(self.config.grace_period_secs));
        let mut state = self.state.lock();
        for node in self.store.nodes() {
            if watched(&node) && !self.last_seen.contains_key(&node.node_id) {
                state.pre_timeout.insert(node.node_id, deadline);
            }
        }
        info!(
            "Connection watchdog waiting {}s for {} persistent nodes",
            self.config.grace_period_secs,
            state.pre_timeout.len()
        );
    }

    /// A message from `node_id` arrived
    pub fn touch(&self, node_id: NodeId, now: i64) {
        self.last_seen.insert(node_id, now);

        let recovered = {
            let mut state = self.state.lock();
            state.pre_timeout.remove(&node_id);
            state.timed_out_nodes.remove(&node_id).then(|| state.timed_out_nodes.len())
        };

        match self.store.set_node_connected(node_id, true) {
            Ok(false) => debug!("Node {} connected", node_id),
            Ok(true) => {},
            Err(_) => debug!("Message from node {} not in the store yet", node_id),
        }

        if let Some(remaining) = recovered {
            info!("Node {} reconnected after timeout", node_id);
            let node = self.store.node(node_id);
            let mut data = node.as_ref().map(node_data).unwrap_or_else(|| json!({ "node_id": node_id }));
            data["reason"] = json!("reconnected");
            self.raise_back(InternalSensorKind::NodeTimeout, remaining, data, now);
        }
    }

    /// The session of `node_id` ended
    pub fn node_disconnected(&self, node_id: NodeId, now: i64) {
        self.last_seen.remove(&node_id);
        if let Err(e) = self.store.set_node_connected(node_id, false) {
            debug!("Disconnect of node {}: {}", node_id, e);
            return;
        }
        info!("Node {} disconnected", node_id);
        if self.store.node(node_id).is_some_and(|n| watched(&n)) {
            let deadline = now.saturating_add(secs(self.config.grace_period_secs));
            self.state.lock().pre_timeout.insert(node_id, deadline);
        }
    }

    /// One liveness pass at `now`
    pub fn sweep(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_connections(now, &mut report);
        self.sweep_grace_list(now, &mut report);
        if self.config.sensor_timeout_secs > 0 {
            self.sweep_sensors(now, &mut report);
        }
        self.remind(now, &mut report);
        report
    }

    fn sweep_connections(&self, now: i64, report: &mut SweepReport) {
        let timeout = secs(self.config.connection_timeout_secs);
        let stale: Vec<NodeId> = self
            .last_seen
            .iter()
            .filter(|entry| now.saturating_sub(*entry.value()) > timeout)
            .map(|entry| *entry.key())
            .collect();

        for node_id in stale {
            // A touch since the scan above keeps the node connected
            let removed = self
                .last_seen
                .remove_if(&node_id, |_, seen| now.saturating_sub(*seen) > timeout);
            if removed.is_none() {
                continue;
            }
            let Some(node) = self.store.node(node_id) else {
                continue;
            };
            if let Err(e) = self.store.set_node_connected(node_id, false) {
                warn!("Unable to mark node {} disconnected: {}", node_id, e);
            }
            warn!(
                "Node {} ({}) not heard from for more than {}s",
                node_id, node.hostname, timeout
            );
            report.disconnected.push(node_id);
            if watched(&node) {
                self.node_timed_out(&node, now, report);
            }
        }
    }

    fn sweep_grace_list(&self, now: i64, report: &mut SweepReport) {
        let expired: Vec<NodeId> = {
            let mut state = self.state.lock();
            let expired: Vec<NodeId> = state
                .pre_timeout
                .iter()
                .filter(|(_, deadline)| now >= **deadline)
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                state.pre_timeout.remove(id);
            }
            expired
        };

        for node_id in expired {
            if self.last_seen.contains_key(&node_id) {
                continue;
            }
            match self.store.node(node_id) {
                Some(node) if watched(&node) => {
                    warn!(
                        "Node {} ({}) did not connect within the grace period",
                        node_id, node.hostname
                    );
                    self.node_timed_out(&node, now, report);
                },
                _ => {},
            }
        }
    }

    fn node_timed_out(&self, node: &Node, now: i64, report: &mut SweepReport) {
        let newly = {
            let mut state = self.state.lock();
            let newly = state.timed_out_nodes.insert(node.node_id);
            if newly {
                state.last_node_reminder = now;
            }
            newly
        };
        if !newly {
            return;
        }
        report.timed_out_nodes.push(node.node_id);
        let mut data = node_data(node);
        data["reason"] = json!("timeout");
        self.internal
            .raise(InternalSensorKind::NodeTimeout, 1, Some(data), true, now);
    }

    fn sweep_sensors(&self, now: i64, report: &mut SweepReport) {
        let timeout = secs(self.config.sensor_timeout_secs);
        let snapshot = self.store.snapshot();

        let overdue: BTreeSet<SensorId> = snapshot
            .sensors
            .values()
            .filter(|s| {
                snapshot
                    .nodes
                    .get(&s.node_id)
                    .is_some_and(|n| n.node_type != NodeType::Server)
            })
            .filter(|s| now.saturating_sub(s.last_state_updated) > timeout)
            .map(|s| s.sensor_id)
            .collect();

        let (newly, recovered, remaining) = {
            let mut state = self.state.lock();
            let newly: Vec<SensorId> = overdue
                .difference(&state.timed_out_sensors)
                .copied()
                .collect();
            let recovered: Vec<SensorId> = state
                .timed_out_sensors
                .difference(&overdue)
                .copied()
                .collect();
            state.timed_out_sensors = overdue;
            if !newly.is_empty() {
                state.last_sensor_reminder = now;
            }
            (newly, recovered, state.timed_out_sensors.len())
        };

        for sensor_id in &newly {
            let Some(sensor) = snapshot.sensors.get(sensor_id) else {
                continue;
            };
            warn!(
                "Sensor {} ({}) has not updated its state since {}",
                sensor_id, sensor.description, sensor.last_state_updated
            );
            let data = json!({
                "sensor_id": sensor.sensor_id,
                "node_id": sensor.node_id,
                "description": sensor.description,
                "last_state_updated": sensor.last_state_updated,
                "reason": "timeout",
            });
            self.internal
                .raise(InternalSensorKind::SensorTimeout, 1, Some(data), true, now);
        }

        for (i, sensor_id) in recovered.iter().enumerate() {
            info!("Sensor {} no longer timed out", sensor_id);
            let description = snapshot
                .sensors
                .get(sensor_id)
                .map(|s| s.description.clone())
                .unwrap_or_default();
            let data = json!({
                "sensor_id": sensor_id,
                "description": description,
                "reason": "recovered",
            });
            // Only the last recovery of a sweep may bring the state back to normal
            let still_out = remaining + (recovered.len() - i - 1);
            self.raise_back(InternalSensorKind::SensorTimeout, still_out, data, now);
        }

        report.timed_out_sensors.extend(newly);
        report.recovered_sensors.extend(recovered);
    }

    fn remind(&self, now: i64, report: &mut SweepReport) {
        let interval = secs(self.config.reminder_interval_secs);
        if interval == 0 {
            return;
        }

        let (nodes, sensors) = {
            let mut state = self.state.lock();
            let nodes = (!state.timed_out_nodes.is_empty()
                && now.saturating_sub(state.last_node_reminder) >= interval)
                .then(|| {
                    state.last_node_reminder = now;
                    state.timed_out_nodes.iter().copied().collect::<Vec<_>>()
                });
            let sensors = (!state.timed_out_sensors.is_empty()
                && now.saturating_sub(state.last_sensor_reminder) >= interval)
                .then(|| {
                    state.last_sensor_reminder = now;
                    state.timed_out_sensors.iter().copied().collect::<Vec<_>>()
                });
            (nodes, sensors)
        };

        if let Some(nodes) = nodes {
            debug!("Reminding about timed out nodes {:?}", nodes);
            let data = json!({ "reason": "reminder", "nodes": nodes });
            self.internal
                .raise(InternalSensorKind::NodeTimeout, 1, Some(data), false, now);
            report.reminders += 1;
        }
        if let Some(sensors) = sensors {
            debug!("Reminding about timed out sensors {:?}", sensors);
            let data = json!({ "reason": "reminder", "sensors": sensors });
            self.internal
                .raise(InternalSensorKind::SensorTimeout, 1, Some(data), false, now);
            report.reminders += 1;
        }
    }

    /// State 0 once nothing is timed out any more, else a state 1 notice
    fn raise_back(&self, kind: InternalSensorKind, remaining: usize, data: serde_json::Value, now: i64) {
        if remaining == 0 {
            self.internal.raise(kind, 0, Some(data), true, now);
        } else {
            self.internal.raise(kind, 1, Some(data), false, now);
        }
    }

    /// Sweep every `sweep_interval_secs` until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Connection watchdog started (timeout {}s, sweep every {}s)",
            self.config.connection_timeout_secs, self.config.sweep_interval_secs
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.sweep(Utc::now().timestamp());
                    if report != SweepReport::default() {
                        debug!("Watchdog sweep: {:?}", report);
                    }
                },
            }
        }
        info!("Connection watchdog stopped");
    }
}

/// Persistent client nodes are expected to stay connected
fn watched(node: &Node) -> bool {
    node.persistent && node.node_type != NodeType::Server
}

fn node_data(node: &Node) -> serde_json::Value {
    json!({
        "node_id": node.node_id,
        "hostname": node.hostname,
        "node_type": node.node_type,
        "instance": node.instance,
        "username": node.username,
    })
}

fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
