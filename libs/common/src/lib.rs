//! Alertr basic library
//!
//! Provides functions shared by all services:
//! - logging initialization and runtime log level control
//! - startup banner and development environment loading
//! - graceful shutdown signal handling

pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use logging::{LogConfig, LoggingSettings};
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use anyhow;
pub use tokio;
pub use tokio_util::sync::CancellationToken;
