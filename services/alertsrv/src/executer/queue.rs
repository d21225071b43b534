//! Sensor alert delay queue
//!
//! Priority queue keyed by `timeReceived + alertDelay`. A newer event for a
//! sensor whose previous event is still delayed replaces that event's payload
//! and keeps its due time; the replaced event is never evaluated.

use alertr_model::{SensorAlert, SensorId};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::Notify;
use tracing::debug;

/// Where an event ended up on enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Due immediately
    Ready,
    /// Held back until `due_at`
    Delayed { due_at: i64 },
    /// Replaced a still delayed event of the same sensor, due at `due_at`
    Superseded { due_at: i64 },
}

#[derive(Debug)]
struct Pending {
    due_at: i64,
    alert: SensorAlert,
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Reverse<(i64, u64)>>,
    entries: HashMap<u64, Pending>,
    delayed_by_sensor: HashMap<SensorId, u64>,
    next_seq: u64,
}

/// Pending sensor alerts waiting for their delay to elapse
#[derive(Debug, Default)]
pub struct SensorAlertQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl SensorAlertQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event and wake the executer
    pub fn push(&self, alert: SensorAlert, now: i64) -> Enqueued {
        let due_at = alert.due_at();
        let delayed = alert.alert_delay > 0;
        let sensor_id = alert.sensor_id;

        let outcome = {
            let mut inner = self.inner.lock();
            let pending = inner.delayed_by_sensor.get(&sensor_id).copied();
            match pending.filter(|_| delayed) {
                Some(seq) if inner.entries.contains_key(&seq) => {
                    let entry = inner.entries.get_mut(&seq);
                    let entry_due = entry.as_ref().map_or(due_at, |p| p.due_at);
                    if let Some(pending) = entry {
                        // Payload is replaced, due time stays with the first event
                        pending.alert = alert;
                    }
                    debug!(
                        "Sensor alert for sensor {} supersedes pending event (due {})",
                        sensor_id, entry_due
                    );
                    Enqueued::Superseded { due_at: entry_due }
                },
                _ => {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.heap.push(Reverse((due_at, seq)));
                    inner.entries.insert(seq, Pending { due_at, alert });
                    if delayed {
                        inner.delayed_by_sensor.insert(sensor_id, seq);
                    }
                    if due_at <= now {
                        Enqueued::Ready
                    } else {
                        Enqueued::Delayed { due_at }
                    }
                },
            }
        };

        self.notify.notify_one();
        outcome
    }

    /// Remove and return every event due at `now`, oldest first
    pub fn pop_due(&self, now: i64) -> Vec<SensorAlert> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        while let Some(Reverse((due_at, seq))) = inner.heap.peek().copied() {
            if due_at > now {
                break;
            }
            inner.heap.pop();
            if let Some(Pending { alert, .. }) = inner.entries.remove(&seq) {
                if inner.delayed_by_sensor.get(&alert.sensor_id) == Some(&seq) {
                    inner.delayed_by_sensor.remove(&alert.sensor_id);
                }
                due.push(alert);
            }
        }
        due
    }

    /// Due time of the earliest pending event
    pub fn next_due(&self) -> Option<i64> {
        self.inner.lock().heap.peek().map(|Reverse((due, _))| *due)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next [`push`](Self::push) (or immediately if one happened
    /// since the last wait)
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use alertr_model::{SensorData, SensorDataType};
    use std::collections::BTreeSet;

    fn alert(sensor_id: SensorId, state: u8, time_received: i64, delay: u64) -> SensorAlert {
        SensorAlert {
            sensor_id,
            node_id: 1,
            description: format!("sensor {}", sensor_id),
            state,
            alert_levels: BTreeSet::from([1]),
            time_received,
            alert_delay: delay,
            has_optional_data: false,
            optional_data: None,
            change_state: true,
            has_latest_data: false,
            data_type: SensorDataType::None,
            data: SensorData::None,
            rules_activated: true,
        }
    }

    #[test]
    fn test_zero_delay_is_ready() {
        let queue = SensorAlertQueue::new();
        assert_eq!(queue.push(alert(1, 1, 100, 0), 100), Enqueued::Ready);
        assert_eq!(queue.pop_due(100).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delayed_event_waits() {
        let queue = SensorAlertQueue::new();
        assert_eq!(
            queue.push(alert(1, 1, 0, 5), 0),
            Enqueued::Delayed { due_at: 5 }
        );
        assert!(queue.pop_due(4).is_empty());
        assert_eq!(queue.next_due(), Some(5));
        assert_eq!(queue.pop_due(5).len(), 1);
    }

    #[test]
    fn test_newer_event_supersedes_delayed_one() {
        let queue = SensorAlertQueue::new();
        queue.push(alert(2, 1, 0, 5), 0);
        assert_eq!(
            queue.push(alert(2, 0, 2, 5), 2),
            Enqueued::Superseded { due_at: 5 }
        );
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(4).is_empty());

        let due = queue.pop_due(5);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].state, 0);
        assert_eq!(due[0].time_received, 2);

        // Next event starts a new delay window
        assert_eq!(
            queue.push(alert(2, 1, 6, 5), 6),
            Enqueued::Delayed { due_at: 11 }
        );
    }

    #[test]
    fn test_distinct_sensors_independent() {
        let queue = SensorAlertQueue::new();
        queue.push(alert(1, 1, 0, 3), 0);
        queue.push(alert(2, 1, 0, 1), 0);
        let due = queue.pop_due(1);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].sensor_id, 2);
        assert_eq!(queue.pop_due(3)[0].sensor_id, 1);
    }

    #[test]
    fn test_undelayed_events_are_not_superseded() {
        let queue = SensorAlertQueue::new();
        queue.push(alert(1, 1, 10, 0), 10);
        queue.push(alert(1, 0, 10, 0), 10);
        let states: Vec<u8> = queue.pop_due(10).iter().map(|a| a.state).collect();
        assert_eq!(states, vec![1, 0]);
    }
}
