//! Alertr alerting hub
//!
//! Reconciles the state reported by sensor, alert and manager clients,
//! decides per alert level whether a sensor alert escalates and hands the
//! resulting messages to the delivery layer.
//!
//! - [`store`]: reconciled entity state
//! - [`executer`]: delay queue and per-level decision pipeline
//! - [`instrumentation`]: external commands gating an alert level
//! - [`watchdog`]: node and sensor liveness
//! - [`hub`]: facade for the session layer

pub mod config;
pub mod delivery;
pub mod error;
pub mod executer;
pub mod hub;
pub mod instrumentation;
pub mod internal_sensors;
pub mod storage;
pub mod store;
pub mod watchdog;

pub use config::AlertSrvConfig;
pub use error::{AlertSrvError, Result};
pub use hub::AlertHub;
