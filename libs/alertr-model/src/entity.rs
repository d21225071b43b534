//! Kind-erased entity handles used by storage collaborators and diffs

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Option,
    Profile,
    Node,
    Sensor,
    Alert,
    Manager,
    AlertLevel,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Option,
        EntityKind::Profile,
        EntityKind::Node,
        EntityKind::Sensor,
        EntityKind::Alert,
        EntityKind::Manager,
        EntityKind::AlertLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Option => "option",
            Self::Profile => "profile",
            Self::Node => "node",
            Self::Sensor => "sensor",
            Self::Alert => "alert",
            Self::Manager => "manager",
            Self::AlertLevel => "alertLevel",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of an entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum EntityKey {
    Option(String),
    Profile(ProfileId),
    Node(NodeId),
    Sensor(SensorId),
    Alert(AlertId),
    Manager(ManagerId),
    AlertLevel(AlertLevelId),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Option(_) => EntityKind::Option,
            Self::Profile(_) => EntityKind::Profile,
            Self::Node(_) => EntityKind::Node,
            Self::Sensor(_) => EntityKind::Sensor,
            Self::Alert(_) => EntityKind::Alert,
            Self::Manager(_) => EntityKind::Manager,
            Self::AlertLevel(_) => EntityKind::AlertLevel,
        }
    }

    /// Key rendered as text, as stored by collaborators
    pub fn id_string(&self) -> String {
        match self {
            Self::Option(name) => name.clone(),
            Self::Profile(id)
            | Self::Node(id)
            | Self::Sensor(id)
            | Self::Alert(id)
            | Self::Manager(id)
            | Self::AlertLevel(id) => id.to_string(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id_string())
    }
}

/// Any stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "camelCase")]
pub enum Entity {
    Option(SystemOption),
    Profile(Profile),
    Node(Node),
    Sensor(Sensor),
    Alert(Alert),
    Manager(Manager),
    AlertLevel(AlertLevel),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Option(o) => EntityKey::Option(o.option_type.clone()),
            Self::Profile(p) => EntityKey::Profile(p.profile_id),
            Self::Node(n) => EntityKey::Node(n.node_id),
            Self::Sensor(s) => EntityKey::Sensor(s.sensor_id),
            Self::Alert(a) => EntityKey::Alert(a.alert_id),
            Self::Manager(m) => EntityKey::Manager(m.manager_id),
            Self::AlertLevel(l) => EntityKey::AlertLevel(l.level),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }
}
