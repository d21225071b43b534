//! Alert hub facade
//!
//! Entry point for the session layer. Every inbound message refreshes the
//! watchdog for its node, then goes to the entity store or the executer.
//! Store changes are mirrored to the storage collaborator; storage failures
//! are logged and never change the outcome of a message.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alertr_model::*;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AlertSrvConfig;
use crate::delivery::AlertDelivery;
use crate::error::{AlertSrvError, Result};
use crate::executer::{Enqueued, SensorAlertExecuter, SensorAlertQueue};
use crate::internal_sensors::{InternalSensorKind, InternalSensors};
use crate::storage::StorageBackend;
use crate::store::{Diff, EntityStore, StateChangeOutcome};
use crate::watchdog::ConnectionWatchdog;

/// What happened to an option change
#[derive(Debug, Clone, PartialEq)]
pub enum OptionChange {
    Applied { previous: Option<f64> },
    Scheduled { delay_secs: u64 },
}

pub struct AlertHub {
    store: Arc<EntityStore>,
    storage: StorageBackend,
    internal: Arc<InternalSensors>,
    executer: SensorAlertExecuter,
    watchdog: Arc<ConnectionWatchdog>,
    /// Non-internal sensors currently reporting an error state
    errored_sensors: Mutex<BTreeSet<SensorId>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for AlertHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertHub")
            .field("executer", &self.executer)
            .field("storage", &self.storage.name())
            .finish()
    }
}

impl AlertHub {
    pub fn new(
        config: &AlertSrvConfig,
        storage: StorageBackend,
        delivery: Arc<dyn AlertDelivery>,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::new(EntityStore::new());
        let queue = Arc::new(SensorAlertQueue::new());
        let internal = Arc::new(InternalSensors::new(
            config.internal_sensors.clone(),
            Arc::clone(&store),
            Arc::clone(&queue),
        ));
        let executer = SensorAlertExecuter::new(
            Arc::clone(&store),
            queue,
            Arc::clone(&storage),
            delivery,
            Arc::clone(&internal),
            config.executer.tick(),
        );
        let watchdog = Arc::new(ConnectionWatchdog::new(
            config.watchdog.clone(),
            Arc::clone(&store),
            Arc::clone(&internal),
        ));

        Self {
            store,
            storage,
            internal,
            executer,
            watchdog,
            errored_sensors: Mutex::new(BTreeSet::new()),
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn executer(&self) -> &SensorAlertExecuter {
        &self.executer
    }

    pub fn watchdog(&self) -> &Arc<ConnectionWatchdog> {
        &self.watchdog
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Rebuild the entity store from the entities kept in storage
    ///
    /// Runs before [`start`](Self::start) so the watchdog knows the persistent
    /// nodes it has to wait for. No session exists yet, so every node except
    /// the server comes back disconnected.
    pub async fn load_from_storage(&self) -> Result<usize> {
        let mut update = StatusUpdate::default();
        let mut count = 0;
        for kind in EntityKind::ALL {
            let entities = self.storage.get_all_of_kind(kind).await?;
            count += entities.len();
            for entity in entities {
                match entity {
                    Entity::Option(o) => update.options.push(o),
                    Entity::Profile(p) => update.profiles.push(p),
                    Entity::Node(mut n) => {
                        n.connected = n.node_type == NodeType::Server;
                        update.nodes.push(n);
                    },
                    Entity::Sensor(s) => update.sensors.push(s),
                    Entity::Alert(a) => update.alerts.push(a),
                    Entity::Manager(m) => update.managers.push(m),
                    Entity::AlertLevel(l) => update.alert_levels.push(l),
                }
            }
        }
        update.server_time = update
            .sensors
            .iter()
            .map(|s| s.last_state_updated)
            .max()
            .unwrap_or_default();

        self.store.reconcile(&update)?;
        info!(
            "Loaded {} entities from {} storage ({} nodes)",
            count,
            self.storage.name(),
            update.nodes.len()
        );
        Ok(count)
    }

    /// Seed the sensors known to be in error state from storage
    pub async fn seed_error_states(&self) -> Result<usize> {
        let stored = self.storage.sensors_in_error_state().await?;
        let mut errored = self.errored_sensors.lock();
        errored.extend(stored.iter().map(|(id, _)| *id));
        info!("{} sensors in error state at start", errored.len());
        Ok(errored.len())
    }

    /// Spawn the executer and the watchdog
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.watchdog.initialize(Utc::now().timestamp());
        vec![
            tokio::spawn(self.executer.clone().run(self.cancel.clone())),
            tokio::spawn(Arc::clone(&self.watchdog).run(self.cancel.clone())),
        ]
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    /// Reconcile a full status update sent by `node_id`
    pub async fn handle_status_update(&self, node_id: NodeId, update: &StatusUpdate) -> Result<Diff> {
        let now = Utc::now().timestamp();
        self.watchdog.touch(node_id, now);

        let (diff, profile_change) = self.store.reconcile_with_profile(update)?;
        self.mirror(&diff).await;
        self.watchdog.touch(node_id, now);

        self.check_error_states(now);

        if let Some(change) = profile_change {
            self.raise_profile_change(change.current, now);
        }
        Ok(diff)
    }

    /// Queue a sensor alert reported by `node_id`
    pub async fn handle_sensor_alert(&self, node_id: NodeId, msg: &SensorAlertMsg) -> Result<Enqueued> {
        self.handle_sensor_alert_at(node_id, msg, Utc::now().timestamp())
            .await
    }

    /// [`handle_sensor_alert`](Self::handle_sensor_alert) received at `now`
    pub async fn handle_sensor_alert_at(
        &self,
        node_id: NodeId,
        msg: &SensorAlertMsg,
        now: i64,
    ) -> Result<Enqueued> {
        self.watchdog.touch(node_id, now);
        let sensor = self.owned_sensor(node_id, msg.sensor_id)?;
        let data = coerce_data(&sensor, msg.data_type, &msg.data)?;

        if msg.change_state {
            let latest = msg.has_latest_data.then(|| data.clone());
            let outcome = self
                .store
                .apply_state_change(sensor.sensor_id, msg.state, msg.server_time, latest)?;
            if matches!(outcome, StateChangeOutcome::Applied { .. }) {
                self.mirror_key(&EntityKey::Sensor(sensor.sensor_id)).await;
            }
        }

        let alert = SensorAlert {
            sensor_id: sensor.sensor_id,
            node_id: sensor.node_id,
            description: sensor.description,
            state: msg.state,
            alert_levels: sensor.alert_levels,
            time_received: now,
            alert_delay: sensor.alert_delay,
            has_optional_data: false,
            optional_data: None,
            change_state: msg.change_state,
            has_latest_data: msg.has_latest_data,
            data_type: sensor.data_type,
            data,
            rules_activated: msg.rules_activated,
        }
        .with_optional_data(msg.optional_data.clone());

        let enqueued = self.executer.queue().push(alert, now);
        debug!(
            "Sensor alert of sensor {} (state {}) queued: {:?}",
            msg.sensor_id, msg.state, enqueued
        );
        Ok(enqueued)
    }

    /// Apply a state change without alerting
    pub async fn handle_state_change(
        &self,
        node_id: NodeId,
        msg: &StateChangeMsg,
    ) -> Result<StateChangeOutcome> {
        self.watchdog.touch(node_id, Utc::now().timestamp());
        let sensor = self.owned_sensor(node_id, msg.sensor_id)?;
        let data = coerce_data(&sensor, msg.data_type, &msg.data)?;

        let outcome =
            self.store
                .apply_state_change(sensor.sensor_id, msg.state, msg.server_time, Some(data))?;
        if matches!(outcome, StateChangeOutcome::Applied { .. }) {
            self.mirror_key(&EntityKey::Sensor(sensor.sensor_id)).await;
        }
        Ok(outcome)
    }

    /// Set an option now or after `msg.delay` seconds
    pub async fn handle_option_change(&self, node_id: NodeId, msg: &OptionChangeMsg) -> OptionChange {
        self.watchdog.touch(node_id, Utc::now().timestamp());

        match msg.delay.filter(|d| *d > 0) {
            None => {
                let previous = apply_option(
                    &self.store,
                    &self.storage,
                    &self.internal,
                    &msg.option_type,
                    msg.value,
                )
                .await;
                OptionChange::Applied { previous }
            },
            Some(delay_secs) => {
                info!(
                    "Option {} = {} scheduled in {}s",
                    msg.option_type, msg.value, delay_secs
                );
                let store = Arc::clone(&self.store);
                let storage = Arc::clone(&self.storage);
                let internal = Arc::clone(&self.internal);
                let cancel = self.cancel.clone();
                let option_type = msg.option_type.clone();
                let value = msg.value;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Delayed change of option {} dropped on shutdown", option_type);
                        },
                        _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {
                            apply_option(&store, &storage, &internal, &option_type, value).await;
                        },
                    }
                });
                OptionChange::Scheduled { delay_secs }
            },
        }
    }

    /// The session of `node_id` ended
    pub fn node_disconnected(&self, node_id: NodeId) {
        self.watchdog
            .node_disconnected(node_id, Utc::now().timestamp());
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn owned_sensor(&self, node_id: NodeId, sensor_id: SensorId) -> Result<Sensor> {
        let sensor = self
            .store
            .sensor(sensor_id)
            .ok_or(AlertSrvError::UnknownSensor(sensor_id))?;
        if sensor.node_id != node_id {
            return Err(AlertSrvError::invalid_data(format!(
                "sensor {} does not belong to node {}",
                sensor_id, node_id
            )));
        }
        Ok(sensor)
    }

    async fn mirror(&self, diff: &Diff) {
        for key in diff.upserts() {
            self.mirror_key(key).await;
        }
        for key in &diff.removed {
            if let Err(e) = self.storage.delete(key).await {
                warn!("Unable to delete {} from storage: {}", key, e);
            }
        }
    }

    async fn mirror_key(&self, key: &EntityKey) {
        mirror_entity(&self.store, &self.storage, key).await;
    }

    fn check_error_states(&self, now: i64) {
        let internal_ids = self.internal.ids();
        let current: BTreeSet<SensorId> = self
            .store
            .sensors()
            .into_iter()
            .filter(|s| !s.error_state.is_ok() && !internal_ids.contains(s.sensor_id))
            .map(|s| s.sensor_id)
            .collect();

        let (newly, cleared) = {
            let mut errored = self.errored_sensors.lock();
            let newly: Vec<SensorId> = current.difference(&errored).copied().collect();
            let cleared: Vec<SensorId> = errored.difference(&current).copied().collect();
            *errored = current;
            (newly, cleared)
        };

        for sensor_id in newly {
            let Some(sensor) = self.store.sensor(sensor_id) else {
                continue;
            };
            warn!(
                "Sensor {} ({}) in error state {}: {}",
                sensor_id, sensor.description, sensor.error_state.code, sensor.error_state.message
            );
            let data = json!({
                "sensor_id": sensor_id,
                "description": sensor.description,
                "error_state": sensor.error_state,
            });
            self.internal
                .raise(InternalSensorKind::SensorErrorState, 1, Some(data), true, now);
        }

        if !cleared.is_empty() {
            info!("Sensors {:?} left error state", cleared);
            let remaining = self.errored_sensors.lock().len();
            let data = json!({ "cleared": cleared, "remaining": remaining });
            if remaining == 0 {
                self.internal
                    .raise(InternalSensorKind::SensorErrorState, 0, Some(data), true, now);
            } else {
                self.internal
                    .raise(InternalSensorKind::SensorErrorState, 1, Some(data), false, now);
            }
        }
    }

    fn raise_profile_change(&self, value: f64, now: i64) {
        raise_profile_change(&self.store, &self.internal, value, now);
    }
}

async fn apply_option(
    store: &EntityStore,
    storage: &StorageBackend,
    internal: &InternalSensors,
    option_type: &str,
    value: f64,
) -> Option<f64> {
    let previous = store.set_option(option_type, value);
    info!("Option {} set to {} (was {:?})", option_type, value, previous);
    mirror_entity(store, storage, &EntityKey::Option(option_type.to_string())).await;

    if option_type == OPTION_PROFILE && previous != Some(value) {
        raise_profile_change(store, internal, value, Utc::now().timestamp());
    }
    previous
}

fn raise_profile_change(store: &EntityStore, internal: &InternalSensors, value: f64, now: i64) {
    let profile_id = value as ProfileId;
    let name = store
        .profile(profile_id)
        .map(|p| p.name)
        .unwrap_or_default();
    info!("Active profile changed to {} ({})", profile_id, name);
    internal.raise_profile_change(profile_id, &name, now);
}

async fn mirror_entity(store: &EntityStore, storage: &StorageBackend, key: &EntityKey) {
    let Some(entity) = store.entity(key) else {
        return;
    };
    if let Err(e) = storage.add_or_update(&entity).await {
        warn!("Unable to store {}: {}", key, e);
    }
}

/// Check reported data against the stored sensor; ints are accepted for float sensors
fn coerce_data(sensor: &Sensor, data_type: SensorDataType, data: &SensorData) -> Result<SensorData> {
    if data_type != sensor.data_type {
        return Err(AlertSrvError::invalid_data(format!(
            "sensor {} has data type {}, message carries {}",
            sensor.sensor_id, sensor.data_type, data_type
        )));
    }
    match (sensor.data_type, data) {
        (SensorDataType::Float, SensorData::Int(v)) => Ok(SensorData::Float(*v as f64)),
        (expected, data) if data.fits(expected) => Ok(data.clone()),
        (expected, data) => Err(AlertSrvError::invalid_data(format!(
            "sensor {} expects {} data, got {}",
            sensor.sensor_id,
            expected,
            data.data_type()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn sensor(data_type: SensorDataType) -> Sensor {
        Sensor {
            node_id: 1,
            sensor_id: 2,
            remote_sensor_id: 0,
            alert_delay: 0,
            alert_levels: BTreeSet::new(),
            description: "Temperature".into(),
            last_state_updated: 0,
            state: 0,
            data_type,
            data: SensorData::None,
            error_state: SensorErrorState::ok(),
        }
    }

    #[test]
    fn test_coerce_int_for_float() {
        let data = coerce_data(
            &sensor(SensorDataType::Float),
            SensorDataType::Float,
            &SensorData::Int(21),
        )
        .unwrap();
        assert_eq!(data, SensorData::Float(21.0));
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        assert!(coerce_data(
            &sensor(SensorDataType::Int),
            SensorDataType::Float,
            &SensorData::Float(1.0)
        )
        .is_err());
        assert!(coerce_data(
            &sensor(SensorDataType::Int),
            SensorDataType::Int,
            &SensorData::None
        )
        .is_err());
    }
}
