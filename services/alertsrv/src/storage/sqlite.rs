//! SQLite storage backend
//!
//! Entities are stored as JSON documents keyed by `(kind, id)`. Sensor alerts
//! go to an append-only history table that is pruned on every insert.

use alertr_model::{Entity, EntityKey, EntityKind, SensorAlert};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{HistoryRetention, Storage, StorageResult};
use crate::error::StorageError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        kind TEXT NOT NULL,
        id TEXT NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY (kind, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sensor_alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_id INTEGER NOT NULL,
        time_received INTEGER NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sensor_alerts_time ON sensor_alerts(time_received)",
];

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    retention: HistoryRetention,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `url` and ensure the schema
    ///
    /// In-memory URLs get a single long-lived connection, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect(url: &str, retention: HistoryRetention) -> StorageResult<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let storage = Self::from_pool(pool, retention).await?;
        info!("SQLite storage ready: {}", url);
        Ok(storage)
    }

    /// Use an existing pool; the schema is created if needed
    pub async fn from_pool(pool: SqlitePool, retention: HistoryRetention) -> StorageResult<Self> {
        let storage = Self { pool, retention };
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn prune_history(&self, newest: i64) -> StorageResult<()> {
        if let Some(cutoff) = self.retention.cutoff(newest) {
            sqlx::query("DELETE FROM sensor_alerts WHERE time_received < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        }

        let limit = i64::try_from(self.retention.limit).unwrap_or(i64::MAX);
        let pruned = sqlx::query(
            r#"
            DELETE FROM sensor_alerts
            WHERE id NOT IN (SELECT id FROM sensor_alerts ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await?;
        if pruned.rows_affected() > 0 {
            debug!("Pruned {} sensor alerts", pruned.rows_affected());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn add_or_update(&self, entity: &Entity) -> StorageResult<()> {
        let key = entity.key();
        let payload = serde_json::to_string(entity)?;
        sqlx::query(
            r#"
            INSERT INTO entities (kind, id, payload) VALUES (?, ?, ?)
            ON CONFLICT(kind, id) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(key.kind().as_str())
        .bind(key.id_string())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> StorageResult<()> {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(key.kind().as_str())
            .bind(key.id_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_of_kind(&self, kind: EntityKind) -> StorageResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT payload FROM entities WHERE kind = ? ORDER BY id")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            let entity: Entity = serde_json::from_str(&payload)?;
            if entity.kind() != kind {
                return Err(StorageError::Serialization(format!(
                    "row of kind {} holds a {}",
                    kind,
                    entity.kind()
                )));
            }
            entities.push(entity);
        }
        Ok(entities)
    }

    async fn persist_sensor_alert(&self, alert: &SensorAlert) -> StorageResult<()> {
        let payload = serde_json::to_string(alert)?;
        sqlx::query("INSERT INTO sensor_alerts (sensor_id, time_received, payload) VALUES (?, ?, ?)")
            .bind(i64::from(alert.sensor_id))
            .bind(alert.time_received)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        let newest: Option<i64> = sqlx::query_scalar("SELECT MAX(time_received) FROM sensor_alerts")
            .fetch_one(&self.pool)
            .await?;
        self.prune_history(newest.unwrap_or(alert.time_received)).await
    }

    async fn recent_sensor_alerts(&self, limit: usize) -> StorageResult<Vec<SensorAlert>> {
        let rows = sqlx::query("SELECT payload FROM sensor_alerts ORDER BY id DESC LIMIT ?")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> StorageResult<SensorAlert> {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
