//! Storage collaborator
//!
//! The hub mirrors every reconciled entity change and every sensor alert it
//! processes into a [`Storage`] backend. Storage is never on the decision
//! path: failures are logged by the caller and processing continues.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use alertr_model::{Entity, EntityKey, EntityKind, SensorAlert, SensorErrorState, SensorId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Shared storage handle
pub type StorageBackend = Arc<dyn Storage>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace one entity
    async fn add_or_update(&self, entity: &Entity) -> StorageResult<()>;

    /// Delete one entity; deleting a missing entity is not an error
    async fn delete(&self, key: &EntityKey) -> StorageResult<()>;

    async fn get_all_of_kind(&self, kind: EntityKind) -> StorageResult<Vec<Entity>>;

    /// Append a processed sensor alert to the history
    async fn persist_sensor_alert(&self, alert: &SensorAlert) -> StorageResult<()>;

    /// Stored sensors whose error state is not OK
    async fn sensors_in_error_state(&self) -> StorageResult<Vec<(SensorId, SensorErrorState)>> {
        let sensors = self.get_all_of_kind(EntityKind::Sensor).await?;
        Ok(sensors
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Sensor(s) if !s.error_state.is_ok() => Some((s.sensor_id, s.error_state)),
                _ => None,
            })
            .collect())
    }

    /// Most recent sensor alerts, newest first
    async fn recent_sensor_alerts(&self, limit: usize) -> StorageResult<Vec<SensorAlert>>;

    fn name(&self) -> &str;
}

/// Sensor alert history bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRetention {
    /// Maximum number of stored sensor alerts; 0 keeps none
    pub limit: usize,
    /// Sensor alerts older than this (relative to the newest) are pruned; 0 disables
    pub max_age_secs: u64,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self {
            limit: 1000,
            max_age_secs: 7 * 24 * 3600,
        }
    }
}

impl HistoryRetention {
    /// Oldest `timeReceived` still kept when the newest entry is `newest`
    pub fn cutoff(&self, newest: i64) -> Option<i64> {
        (self.max_age_secs > 0)
            .then(|| newest.saturating_sub(i64::try_from(self.max_age_secs).unwrap_or(i64::MAX)))
    }
}
