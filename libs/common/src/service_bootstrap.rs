//! Unified service bootstrap utilities
//!
//! Startup banner, logging initialization and development environment setup
//! shared by every Alertr service binary.

use crate::logging::{self, LogConfig, LoggingSettings};
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "alertsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
  █████╗ ██╗     ███████╗██████╗ ████████╗██████╗
 ██╔══██╗██║     ██╔════╝██╔══██╗╚══██╔══╝██╔══██╗
 ███████║██║     █████╗  ██████╔╝   ██║   ██████╔╝
 ██╔══██║██║     ██╔══╝  ██╔══██╗   ██║   ██╔══██╗
 ██║  ██║███████╗███████╗██║  ██║   ██║   ██║  ██║
 ╚═╝  ╚═╝╚══════╝╚══════╝╚═╝  ╚═╝   ╚═╝   ╚═╝  ╚═╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. ALERTR_LOG_DIR environment variable
/// 2. `settings.dir` from the service configuration
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    settings: Option<&LoggingSettings>,
    ansi: bool,
) -> anyhow::Result<()> {
    logging::init_log_root(settings.map(|s| s.dir.as_str()));

    let log_dir = logging::get_log_root().join(&service.name);
    let defaults = LoggingSettings::default();
    let settings = settings.unwrap_or(&defaults);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir,
        filter: settings.level.clone(),
        enable_json: settings.json,
        ansi,
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

/// Load environment variables in development mode
///
/// In debug builds, reads .env file and sets environment variables that are not set yet.
/// In release builds, this is a no-op.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping comments and blank lines
fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("alertsrv", "0.1.0", "Alerting hub");
        assert_eq!(service.name, "alertsrv");
        assert_eq!(service.version, "0.1.0");
        assert_eq!(service.description, "Alerting hub");
    }

    #[test]
    fn test_parse_env_lines() {
        let content = "# comment\n\nALERTSRV_STORAGE__BACKEND = sqlite\nBROKEN\nA=b=c\n";
        let parsed = parse_env_lines(content);
        assert_eq!(
            parsed,
            vec![("ALERTSRV_STORAGE__BACKEND", "sqlite"), ("A", "b=c")]
        );
    }
}
