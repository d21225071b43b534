//! In-process storage backend

use alertr_model::{Entity, EntityKey, EntityKind, SensorAlert};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};

use super::{HistoryRetention, Storage, StorageResult};

#[derive(Debug, Default)]
struct MemoryInner {
    entities: BTreeMap<EntityKey, Entity>,
    history: VecDeque<SensorAlert>,
}

/// Keeps everything in memory; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryInner>,
    retention: HistoryRetention,
}

impl MemoryStorage {
    pub fn new(retention: HistoryRetention) -> Self {
        Self {
            inner: RwLock::default(),
            retention,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.inner.read().entities.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add_or_update(&self, entity: &Entity) -> StorageResult<()> {
        self.inner
            .write()
            .entities
            .insert(entity.key(), entity.clone());
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> StorageResult<()> {
        self.inner.write().entities.remove(key);
        Ok(())
    }

    async fn get_all_of_kind(&self, kind: EntityKind) -> StorageResult<Vec<Entity>> {
        Ok(self
            .inner
            .read()
            .entities
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect())
    }

    async fn persist_sensor_alert(&self, alert: &SensorAlert) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.history.push_back(alert.clone());

        let newest = inner
            .history
            .iter()
            .map(|a| a.time_received)
            .max()
            .unwrap_or(alert.time_received);
        if let Some(cutoff) = self.retention.cutoff(newest) {
            inner.history.retain(|a| a.time_received >= cutoff);
        }
        while inner.history.len() > self.retention.limit {
            inner.history.pop_front();
        }
        Ok(())
    }

    async fn recent_sensor_alerts(&self, limit: usize) -> StorageResult<Vec<SensorAlert>> {
        Ok(self
            .inner
            .read()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
