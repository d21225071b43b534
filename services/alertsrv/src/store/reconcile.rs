//! Status update reconciliation
//!
//! Reconciliation is a pure function from the current snapshot and a full
//! status update to the next snapshot plus an explicit diff. Every check runs
//! before anything is built, so a rejected update has no effect at all.

use alertr_model::*;
use alertr_rules::validate_rule_tree;
use std::collections::{BTreeMap, BTreeSet};

use super::snapshot::StoreSnapshot;
use crate::error::ConfigInconsistencyError;

type Result<T> = std::result::Result<T, ConfigInconsistencyError>;

/// Entities added, changed or removed by one mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Parents before children
    pub added: Vec<EntityKey>,
    /// Entities present before and after whose content changed
    pub updated: Vec<EntityKey>,
    /// Children before parents
    pub removed: Vec<EntityKey>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Keys that were added or updated, in insertion-safe order
    pub fn upserts(&self) -> impl Iterator<Item = &EntityKey> {
        self.added.iter().chain(self.updated.iter())
    }
}

/// Result of a successful reconciliation
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub next: StoreSnapshot,
    pub diff: Diff,
}

/// Reconcile a full status update against the current snapshot
///
/// Incoming entities replace stored ones with the same key, entities missing
/// from the update are removed. Runtime fields owned by the hub are carried
/// over: `Node.connected`, and sensor state that is newer than the reported one.
pub fn compute_diff(current: &StoreSnapshot, update: &StatusUpdate) -> Result<Reconciliation> {
    // Index every category; a repeated key rejects the whole update
    let options = index(&update.options, EntityKind::Option, |o| o.option_type.clone())?;
    let profiles = index(&update.profiles, EntityKind::Profile, |p| p.profile_id)?;
    let nodes = index(&update.nodes, EntityKind::Node, |n| n.node_id)?;
    let sensors = index(&update.sensors, EntityKind::Sensor, |s| s.sensor_id)?;
    let alerts = index(&update.alerts, EntityKind::Alert, |a| a.alert_id)?;
    let managers = index(&update.managers, EntityKind::Manager, |m| m.manager_id)?;
    let alert_levels = index(&update.alert_levels, EntityKind::AlertLevel, |l| l.level)?;

    for level in alert_levels.values() {
        validate_alert_level(level)?;
    }

    for sensor in sensors.values() {
        check_owner(
            EntityKind::Sensor,
            sensor.sensor_id,
            sensor.node_id,
            &nodes,
            &[NodeType::Sensor, NodeType::Server],
        )?;
        check_levels(
            EntityKind::Sensor,
            sensor.sensor_id,
            &sensor.alert_levels,
            &alert_levels,
        )?;
    }
    for alert in alerts.values() {
        check_owner(
            EntityKind::Alert,
            alert.alert_id,
            alert.node_id,
            &nodes,
            &[NodeType::Alert],
        )?;
        check_levels(
            EntityKind::Alert,
            alert.alert_id,
            &alert.alert_levels,
            &alert_levels,
        )?;
    }
    for manager in managers.values() {
        check_owner(
            EntityKind::Manager,
            manager.manager_id,
            manager.node_id,
            &nodes,
            &[NodeType::Manager],
        )?;
    }

    // Validation passed; build the next snapshot
    let nodes = nodes
        .into_iter()
        .map(|(id, mut node)| {
            if let Some(stored) = current.nodes.get(&id) {
                node.connected = stored.connected;
            }
            (id, node)
        })
        .collect();
    let sensors = sensors
        .into_iter()
        .map(|(id, sensor)| (id, merge_sensor(current.sensors.get(&id), sensor)))
        .collect();

    let next = StoreSnapshot {
        server_time: update.server_time,
        options,
        profiles,
        nodes,
        sensors,
        alerts,
        managers,
        alert_levels,
    };
    let diff = diff_snapshots(current, &next);

    Ok(Reconciliation { next, diff })
}

/// Diff between two snapshots
pub fn diff_snapshots(before: &StoreSnapshot, after: &StoreSnapshot) -> Diff {
    let mut diff = Diff::default();
    diff_map(&before.options, &after.options, EntityKey::Option, &mut diff);
    diff_map(&before.profiles, &after.profiles, EntityKey::Profile, &mut diff);
    diff_map(
        &before.alert_levels,
        &after.alert_levels,
        EntityKey::AlertLevel,
        &mut diff,
    );
    diff_map(&before.nodes, &after.nodes, EntityKey::Node, &mut diff);
    diff_map(&before.sensors, &after.sensors, EntityKey::Sensor, &mut diff);
    diff_map(&before.alerts, &after.alerts, EntityKey::Alert, &mut diff);
    diff_map(&before.managers, &after.managers, EntityKey::Manager, &mut diff);
    diff.removed.sort_by_key(|key| removal_rank(key.kind()));
    diff
}

/// Remove a node together with everything it owns
pub fn remove_node_cascade(snapshot: &mut StoreSnapshot, node_id: NodeId) -> Vec<EntityKey> {
    let mut removed = Vec::new();
    if snapshot.nodes.remove(&node_id).is_none() {
        return removed;
    }
    snapshot.sensors.retain(|id, s| {
        let keep = s.node_id != node_id;
        if !keep {
            removed.push(EntityKey::Sensor(*id));
        }
        keep
    });
    snapshot.alerts.retain(|id, a| {
        let keep = a.node_id != node_id;
        if !keep {
            removed.push(EntityKey::Alert(*id));
        }
        keep
    });
    snapshot.managers.retain(|id, m| {
        let keep = m.node_id != node_id;
        if !keep {
            removed.push(EntityKey::Manager(*id));
        }
        keep
    });
    removed.push(EntityKey::Node(node_id));
    removed
}

// ============================================================================
// Helpers
// ============================================================================

fn index<T, K, F>(items: &[T], kind: EntityKind, key: F) -> Result<BTreeMap<K, T>>
where
    T: Clone,
    K: Ord + ToString,
    F: Fn(&T) -> K,
{
    let mut map = BTreeMap::new();
    for item in items {
        let k = key(item);
        if map.contains_key(&k) {
            return Err(ConfigInconsistencyError::DuplicateId {
                kind,
                id: k.to_string(),
            });
        }
        map.insert(k, item.clone());
    }
    Ok(map)
}

fn validate_alert_level(level: &AlertLevel) -> Result<()> {
    if level.rules_activated {
        let root = level
            .rule_root
            .as_ref()
            .ok_or(ConfigInconsistencyError::MissingRuleRoot { level: level.level })?;
        validate_rule_tree(root).map_err(|e| ConfigInconsistencyError::InvalidRule {
            level: level.level,
            reason: e.to_string(),
        })?;
    }
    let has_cmd = level
        .instrumentation_cmd
        .as_deref()
        .is_some_and(|cmd| !cmd.trim().is_empty());
    if level.instrumentation_active && !has_cmd {
        return Err(ConfigInconsistencyError::MissingInstrumentationCmd { level: level.level });
    }
    Ok(())
}

fn check_owner(
    kind: EntityKind,
    id: u32,
    node_id: NodeId,
    nodes: &BTreeMap<NodeId, Node>,
    allowed: &[NodeType],
) -> Result<()> {
    let node = nodes
        .get(&node_id)
        .ok_or(ConfigInconsistencyError::DanglingNode { kind, id, node_id })?;
    if !allowed.contains(&node.node_type) {
        return Err(ConfigInconsistencyError::WrongNodeType {
            kind,
            id,
            node_id,
            node_type: node.node_type,
        });
    }
    Ok(())
}

fn check_levels(
    kind: EntityKind,
    id: u32,
    levels: &BTreeSet<AlertLevelId>,
    configured: &BTreeMap<AlertLevelId, AlertLevel>,
) -> Result<()> {
    match levels.iter().find(|l| !configured.contains_key(l)) {
        Some(level) => Err(ConfigInconsistencyError::DanglingAlertLevel {
            kind,
            id,
            level: *level,
        }),
        None => Ok(()),
    }
}

/// Keep the stored state if the reported one is older
fn merge_sensor(stored: Option<&Sensor>, mut incoming: Sensor) -> Sensor {
    if let Some(stored) = stored {
        if incoming.last_state_updated < stored.last_state_updated {
            incoming.state = stored.state;
            incoming.last_state_updated = stored.last_state_updated;
            if stored.data_type == incoming.data_type {
                incoming.data = stored.data.clone();
            }
        }
    }
    incoming
}

fn diff_map<K, V>(
    before: &BTreeMap<K, V>,
    after: &BTreeMap<K, V>,
    wrap: impl Fn(K) -> EntityKey,
    diff: &mut Diff,
) where
    K: Ord + Clone,
    V: PartialEq,
{
    for (key, value) in after {
        match before.get(key) {
            None => diff.added.push(wrap(key.clone())),
            Some(old) if old != value => diff.updated.push(wrap(key.clone())),
            Some(_) => {},
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            diff.removed.push(wrap(key.clone()));
        }
    }
}

fn removal_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Sensor | EntityKind::Alert | EntityKind::Manager => 0,
        EntityKind::Node => 1,
        EntityKind::AlertLevel => 2,
        EntityKind::Profile => 3,
        EntityKind::Option => 4,
    }
}
