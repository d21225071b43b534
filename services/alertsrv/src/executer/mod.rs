//! Sensor Alert Executer
//!
//! Orchestrates the sensor alert pipeline:
//! 1. events wait in the [`SensorAlertQueue`] until their delay has elapsed
//! 2. every alert level of the event is decided independently (system and
//!    profile gates, transition filter, rule tree, instrumentation)
//! 3. one [`AlertTriggerMessage`] is delivered per Alert bound to a triggered level
//!
//! Every due event runs in its own task, so a failing or panicking event never
//! affects any other.

mod queue;

pub use queue::{Enqueued, SensorAlertQueue};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alertr_model::{AlertLevel, AlertLevelId, AlertTriggerMessage, SensorAlert, SensorId};
use alertr_rules::evaluate;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::delivery::AlertDelivery;
use crate::error::InstrumentationError;
use crate::instrumentation::{InstrumentationRunner, InstrumentationVerdict};
use crate::internal_sensors::InternalSensors;
use crate::storage::StorageBackend;
use crate::store::{EntityStore, StoreSnapshot};

/// Default upper bound between two queue checks
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Why an alert level did not trigger for an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    /// `alertSystemActive` is 0
    SystemInactive,
    /// Active profile not in the level's profiles
    ProfileInactive,
    /// State does not match `triggerAlertTriggered` / `triggerAlertNormal`
    TransitionFiltered,
    /// Rule tree evaluated to false
    RulesNotMatched,
    /// Rule tree could not be evaluated
    RuleError(String),
    /// Instrumentation answered `{}`
    InstrumentationSuppressed,
    /// Instrumentation failed; carries the failure kind
    InstrumentationFailed(&'static str),
}

/// Result of processing one due event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertOutcome {
    pub sensor_id: SensorId,
    pub triggered_levels: Vec<AlertLevelId>,
    pub suppressed: Vec<(AlertLevelId, SuppressReason)>,
    pub messages: Vec<AlertTriggerMessage>,
}

impl AlertOutcome {
    pub fn suppression(&self, level: AlertLevelId) -> Option<&SuppressReason> {
        self.suppressed
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, reason)| reason)
    }
}

struct ExecuterInner {
    store: Arc<EntityStore>,
    queue: Arc<SensorAlertQueue>,
    storage: StorageBackend,
    delivery: Arc<dyn AlertDelivery>,
    internal: Arc<InternalSensors>,
    instrumentation: InstrumentationRunner,
    tick: Duration,
}

/// Cheap to clone; clones share the queue and collaborators
#[derive(Clone)]
pub struct SensorAlertExecuter {
    inner: Arc<ExecuterInner>,
}

impl std::fmt::Debug for SensorAlertExecuter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorAlertExecuter")
            .field("pending", &self.inner.queue.len())
            .field("storage", &self.inner.storage.name())
            .field("tick", &self.inner.tick)
            .finish()
    }
}

impl SensorAlertExecuter {
    pub fn new(
        store: Arc<EntityStore>,
        queue: Arc<SensorAlertQueue>,
        storage: StorageBackend,
        delivery: Arc<dyn AlertDelivery>,
        internal: Arc<InternalSensors>,
        tick: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ExecuterInner {
                store,
                queue,
                storage,
                delivery,
                internal,
                instrumentation: InstrumentationRunner::new(),
                tick: if tick.is_zero() { DEFAULT_TICK } else { tick },
            }),
        }
    }

    pub fn queue(&self) -> &Arc<SensorAlertQueue> {
        &self.inner.queue
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Run until `cancel` fires
    ///
    /// Wakes on enqueue, on the next due time and at least every tick.
    /// In-flight events are aborted on shutdown, which kills their
    /// instrumentation processes.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Sensor alert executer started (tick {:?})", self.inner.tick);
        let mut tasks: JoinSet<AlertOutcome> = JoinSet::new();

        loop {
            let now = Utc::now();
            self.spawn_due(&mut tasks, now, &cancel);
            let wait = self.wait_duration(now);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.queue.notified() => {},
                _ = tokio::time::sleep(wait) => {},
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Sensor alert processing task failed: {}", e);
                    }
                },
            }
        }

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!(
            "Sensor alert executer stopped ({} events pending)",
            self.inner.queue.len()
        );
    }

    /// Process every event due at `now` and wait for all of them
    pub async fn process_due(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<AlertOutcome> {
        let mut tasks = JoinSet::new();
        self.spawn_due(&mut tasks, now, cancel);

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Sensor alert processing task failed: {}", e),
            }
        }
        outcomes
    }

    fn spawn_due(
        &self,
        tasks: &mut JoinSet<AlertOutcome>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) {
        for alert in self.inner.queue.pop_due(now.timestamp()) {
            let executer = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { executer.process_alert(alert, now, &cancel).await });
        }
    }

    fn wait_duration(&self, now: DateTime<Utc>) -> Duration {
        let tick = self.inner.tick;
        match self.inner.queue.next_due() {
            Some(due) => {
                let millis = due
                    .saturating_mul(1000)
                    .saturating_sub(now.timestamp_millis())
                    .max(0);
                Duration::from_millis(millis as u64).min(tick)
            },
            None => tick,
        }
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Decide and dispatch one due event
    pub async fn process_alert(
        &self,
        alert: SensorAlert,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AlertOutcome {
        if let Err(e) = self.inner.storage.persist_sensor_alert(&alert).await {
            warn!(
                "Unable to persist sensor alert of sensor {}: {}",
                alert.sensor_id, e
            );
        }

        let snapshot = self.inner.store.snapshot();
        let mut outcome = AlertOutcome {
            sensor_id: alert.sensor_id,
            ..Default::default()
        };
        let mut triggered: Vec<(AlertLevelId, SensorAlert)> = Vec::new();

        for level_id in &alert.alert_levels {
            let Some(level) = snapshot.alert_levels.get(level_id) else {
                debug!(
                    "Alert level {} of sensor {} no longer exists",
                    level_id, alert.sensor_id
                );
                continue;
            };
            match self.decide_level(level, &alert, &snapshot, now, cancel).await {
                Ok(decided) => {
                    debug!(
                        "Alert level {} triggered for sensor {} (state {})",
                        level.level, alert.sensor_id, decided.state
                    );
                    outcome.triggered_levels.push(level.level);
                    triggered.push((level.level, decided));
                },
                Err(reason) => {
                    debug!(
                        "Alert level {} suppressed for sensor {}: {:?}",
                        level.level, alert.sensor_id, reason
                    );
                    outcome.suppressed.push((level.level, reason));
                },
            }
        }

        outcome.messages = build_messages(&snapshot, &triggered);
        if !outcome.messages.is_empty() {
            info!(
                "Sensor alert of sensor {} triggered levels {:?}, notifying {} alerts",
                alert.sensor_id,
                outcome.triggered_levels,
                outcome.messages.len()
            );
            self.dispatch(&outcome.messages).await;
        }
        outcome
    }

    async fn decide_level(
        &self,
        level: &AlertLevel,
        alert: &SensorAlert,
        snapshot: &StoreSnapshot,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SensorAlert, SuppressReason> {
        if !level.trigger_always {
            if !snapshot.alert_system_active() {
                return Err(SuppressReason::SystemInactive);
            }
            if let Some(profile) = snapshot.active_profile() {
                if !level.profiles.contains(&profile) {
                    return Err(SuppressReason::ProfileInactive);
                }
            }
            if !transition_matches(level, alert.state) {
                return Err(SuppressReason::TransitionFiltered);
            }
        }

        if !alert.rules_activated {
            return Ok(alert.clone());
        }

        if level.rules_activated {
            let root = level
                .rule_root
                .as_ref()
                .ok_or_else(|| SuppressReason::RuleError("no rule configured".to_string()))?;
            match evaluate(root, snapshot, now) {
                Ok(true) => {},
                Ok(false) => return Err(SuppressReason::RulesNotMatched),
                Err(e) => {
                    warn!(
                        "Rule of alert level {} not evaluable for sensor {}: {}",
                        level.level, alert.sensor_id, e
                    );
                    return Err(SuppressReason::RuleError(e.to_string()));
                },
            }
        }

        if !level.instrumentation_active {
            return Ok(alert.clone());
        }

        match self.inner.instrumentation.run(level, alert, cancel).await {
            Ok(InstrumentationVerdict::Allow(modified)) => {
                // A changed state has to pass the transition filter again
                if !level.trigger_always && !transition_matches(level, modified.state) {
                    return Err(SuppressReason::TransitionFiltered);
                }
                Ok(modified)
            },
            Ok(InstrumentationVerdict::Suppress) => Err(SuppressReason::InstrumentationSuppressed),
            Err(InstrumentationError::Cancelled) => {
                Err(SuppressReason::InstrumentationFailed(InstrumentationError::Cancelled.kind()))
            },
            Err(e) => {
                self.inner
                    .internal
                    .raise_instrumentation_error(level, &e, now.timestamp());
                Err(SuppressReason::InstrumentationFailed(e.kind()))
            },
        }
    }

    async fn dispatch(&self, messages: &[AlertTriggerMessage]) {
        let deliveries = messages.iter().cloned().map(|message| {
            let delivery = Arc::clone(&self.inner.delivery);
            async move {
                let alert_id = message.alert_id;
                (alert_id, delivery.deliver(message).await)
            }
        });
        for (alert_id, result) in join_all(deliveries).await {
            if let Err(e) = result {
                warn!("Delivery to alert {} failed: {}", alert_id, e);
            }
        }
    }
}

fn transition_matches(level: &AlertLevel, state: u8) -> bool {
    (state == 1 && level.trigger_alert_triggered) || (state == 0 && level.trigger_alert_normal)
}

/// One message per bound Alert; the first triggered level of an Alert decides its payload
fn build_messages(
    snapshot: &StoreSnapshot,
    triggered: &[(AlertLevelId, SensorAlert)],
) -> Vec<AlertTriggerMessage> {
    let triggered_ids: BTreeSet<AlertLevelId> = triggered.iter().map(|(l, _)| *l).collect();
    let mut notified = HashSet::new();
    let mut messages = Vec::new();

    for (level, event) in triggered {
        for alert in snapshot.alerts_for_level(*level) {
            if !notified.insert(alert.alert_id) {
                continue;
            }
            messages.push(AlertTriggerMessage {
                alert_id: alert.alert_id,
                remote_alert_id: alert.remote_alert_id,
                node_id: alert.node_id,
                sensor_id: event.sensor_id,
                state: event.state,
                description: event.description.clone(),
                time_received: event.time_received,
                optional_data: event.optional_data.clone(),
                triggered_alert_levels: alert
                    .alert_levels
                    .intersection(&triggered_ids)
                    .copied()
                    .collect(),
                data_type: event.data_type,
                data: event.data.clone(),
            });
        }
    }
    messages
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::delivery::ChannelDelivery;
    use crate::error::StorageError;
    use alertr_model::*;
    use tracing_test::traced_test;

    fn level(id: AlertLevelId) -> AlertLevel {
        let mut level = AlertLevel::new(id, format!("level {}", id));
        level.trigger_alert_triggered = true;
        level
    }

    fn event(levels: &[AlertLevelId], state: u8) -> SensorAlert {
        SensorAlert {
            sensor_id: 1,
            node_id: 1,
            description: "Hall".into(),
            state,
            alert_levels: levels.iter().copied().collect(),
            time_received: 0,
            alert_delay: 0,
            has_optional_data: false,
            optional_data: None,
            change_state: false,
            has_latest_data: false,
            data_type: SensorDataType::None,
            data: SensorData::None,
            rules_activated: true,
        }
    }

    #[test]
    fn test_transition_filter() {
        let mut l = level(1);
        assert!(transition_matches(&l, 1));
        assert!(!transition_matches(&l, 0));
        l.trigger_alert_normal = true;
        assert!(transition_matches(&l, 0));
    }

    #[test]
    fn test_alert_bound_to_two_levels_gets_one_message() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.alerts.insert(
            4,
            Alert {
                node_id: 2,
                alert_id: 4,
                remote_alert_id: 1,
                alert_levels: BTreeSet::from([1, 2, 3]),
                description: "Siren".into(),
            },
        );
        snapshot.alerts.insert(
            5,
            Alert {
                node_id: 2,
                alert_id: 5,
                remote_alert_id: 2,
                alert_levels: BTreeSet::from([2]),
                description: "Push".into(),
            },
        );

        let messages = build_messages(&snapshot, &[(1, event(&[1, 2], 1)), (2, event(&[1, 2], 1))]);
        assert_eq!(messages.len(), 2);
        let siren = messages.iter().find(|m| m.alert_id == 4).unwrap();
        assert_eq!(siren.triggered_alert_levels, vec![1, 2]);
        let push = messages.iter().find(|m| m.alert_id == 5).unwrap();
        assert_eq!(push.triggered_alert_levels, vec![2]);
    }

    struct FailingStorage;

    #[async_trait::async_trait]
    impl crate::storage::Storage for FailingStorage {
        async fn add_or_update(&self, _: &Entity) -> crate::storage::StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        async fn delete(&self, _: &EntityKey) -> crate::storage::StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        async fn get_all_of_kind(&self, _: EntityKind) -> crate::storage::StorageResult<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn persist_sensor_alert(&self, _: &SensorAlert) -> crate::storage::StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        async fn recent_sensor_alerts(&self, _: usize) -> crate::storage::StorageResult<Vec<SensorAlert>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_storage_failure_does_not_block_dispatch() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.alert_levels.insert(1, level(1));
        snapshot.alerts.insert(
            4,
            Alert {
                node_id: 2,
                alert_id: 4,
                remote_alert_id: 1,
                alert_levels: BTreeSet::from([1]),
                description: "Siren".into(),
            },
        );
        let store = Arc::new(EntityStore::from_snapshot(snapshot));
        let queue = Arc::new(SensorAlertQueue::new());
        let internal = Arc::new(InternalSensors::new(
            Default::default(),
            store.clone(),
            queue.clone(),
        ));
        let (delivery, mut outbound) = ChannelDelivery::channel(8);
        let executer = SensorAlertExecuter::new(
            store,
            queue,
            Arc::new(FailingStorage),
            Arc::new(delivery),
            internal,
            DEFAULT_TICK,
        );

        let outcome = executer
            .process_alert(event(&[1], 1), Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.triggered_levels, vec![1]);
        assert_eq!(outbound.try_recv().unwrap().alert_id, 4);
        assert!(logs_contain("Unable to persist sensor alert"));
    }
}
