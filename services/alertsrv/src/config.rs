//! alertsrv configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `ALERTSRV_` environment variables (`__` separates nested keys, e.g.
//! `ALERTSRV_WATCHDOG__CONNECTION_TIMEOUT_SECS=60`).

use common::LoggingSettings;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{AlertSrvError, Result};
use crate::internal_sensors::InternalSensorIds;
use crate::storage::HistoryRetention;

pub const DEFAULT_CONFIG_PATH: &str = "config/alertsrv.yaml";
pub const ENV_PREFIX: &str = "ALERTSRV_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "alertsrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuterConfig {
    /// Upper bound between two checks of the delay queue
    pub tick_ms: u64,
}

impl Default for ExecuterConfig {
    fn default() -> Self {
        Self { tick_ms: 500 }
    }
}

impl ExecuterConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub sweep_interval_secs: u64,
    /// Silence after which a node counts as disconnected
    pub connection_timeout_secs: u64,
    /// Age of `lastStateUpdated` after which a sensor times out; 0 disables
    pub sensor_timeout_secs: u64,
    /// Time a persistent node gets to (re)connect after start or disconnect
    pub grace_period_secs: u64,
    /// Interval of reminder alerts while something is timed out; 0 disables
    pub reminder_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            connection_timeout_secs: 90,
            sensor_timeout_secs: 0,
            grace_period_secs: 60,
            reminder_interval_secs: 3600,
        }
    }
}

impl WatchdogConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// e.g. `sqlite://data/alertsrv.db` or `sqlite::memory:`
    pub sqlite_url: Option<String>,
    pub history_limit: usize,
    pub history_max_age_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let retention = HistoryRetention::default();
        Self {
            backend: StorageBackendKind::Memory,
            sqlite_url: None,
            history_limit: retention.limit,
            history_max_age_secs: retention.max_age_secs,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> HistoryRetention {
        HistoryRetention {
            limit: self.history_limit,
            max_age_secs: self.history_max_age_secs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSrvConfig {
    pub service: ServiceConfig,
    pub logging: LoggingSettings,
    pub executer: ExecuterConfig,
    pub watchdog: WatchdogConfig,
    pub internal_sensors: InternalSensorIds,
    pub storage: StorageConfig,
}

impl AlertSrvConfig {
    /// Load from `path` (or the default location) and the environment
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::figment(path).extract().map_err(AlertSrvError::from)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AlertSrvConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.executer.tick_ms == 0 {
            return Err(AlertSrvError::config("executer.tick_ms must be greater than 0"));
        }
        if self.watchdog.sweep_interval_secs == 0 {
            return Err(AlertSrvError::config(
                "watchdog.sweep_interval_secs must be greater than 0",
            ));
        }
        if self.watchdog.connection_timeout_secs == 0 {
            return Err(AlertSrvError::config(
                "watchdog.connection_timeout_secs must be greater than 0",
            ));
        }
        if self.storage.backend == StorageBackendKind::Sqlite
            && self
                .storage
                .sqlite_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(AlertSrvError::config(
                "storage.sqlite_url is required for the sqlite backend",
            ));
        }

        let mut seen = HashSet::new();
        for (kind, id) in self.internal_sensors.configured() {
            if !seen.insert(id) {
                return Err(AlertSrvError::config(format!(
                    "internal_sensors.{} reuses sensor id {}",
                    kind, id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AlertSrvConfig::default();
        config.validate().unwrap();
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert_eq!(config.executer.tick(), Duration::from_millis(500));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "watchdog:\n  connection_timeout_secs: 30\ninternal_sensors:\n  node_timeout: 1000\nstorage:\n  backend: sqlite\n  sqlite_url: \"sqlite::memory:\""
        )
        .unwrap();

        let config: AlertSrvConfig = AlertSrvConfig::figment(file.path()).extract().unwrap();
        assert_eq!(config.watchdog.connection_timeout_secs, 30);
        assert_eq!(config.watchdog.sweep_interval_secs, 5);
        assert_eq!(config.internal_sensors.node_timeout, Some(1000));
        assert_eq!(config.storage.backend, StorageBackendKind::Sqlite);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config: AlertSrvConfig = AlertSrvConfig::figment(Path::new("/nonexistent/alertsrv.yaml"))
            .extract()
            .unwrap();
        assert_eq!(config.service.name, "alertsrv");
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = AlertSrvConfig::default();
        config.watchdog.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AlertSrvConfig::default();
        config.storage.backend = StorageBackendKind::Sqlite;
        assert!(config.validate().is_err());

        let mut config = AlertSrvConfig::default();
        config.internal_sensors.node_timeout = Some(7);
        config.internal_sensors.sensor_timeout = Some(7);
        assert!(matches!(config.validate(), Err(AlertSrvError::Config(_))));
    }
}
