//! alertsrv - Alertr alerting hub

use std::path::PathBuf;
use std::sync::Arc;

use alertsrv::config::{AlertSrvConfig, StorageBackendKind};
use alertsrv::delivery::ChannelDelivery;
use alertsrv::storage::{MemoryStorage, SqliteStorage, StorageBackend};
use alertsrv::AlertHub;
use clap::Parser;
use common::service_bootstrap::{self, ServiceInfo};
use errors::{AlertrError, AlertrResult};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "alertsrv - Alertr alerting hub")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, value_name = "FILE", env = "ALERTSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Disable colored console output and the banner
    #[arg(long)]
    no_color: bool,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> AlertrResult<()> {
    let args = Args::parse();
    service_bootstrap::load_development_env();

    let mut config = AlertSrvConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    if args.validate {
        config.validate()?;
        let rendered =
            serde_yaml::to_string(&config).map_err(|e| AlertrError::Serialization(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    let service = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_DESCRIPTION"),
    );
    service_bootstrap::init_logging(&service, Some(&config.logging), !args.no_color)?;
    if !args.no_color {
        service_bootstrap::print_startup_banner(&service);
    }
    config.validate()?;

    let storage = build_storage(&config).await?;
    let cancel = common::shutdown::shutdown_token();

    let (delivery, mut outbound) = ChannelDelivery::channel(1024);
    let drain = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            info!(
                "Alert {} (node {}): sensor {} state {} levels {:?} - {}",
                message.alert_id,
                message.node_id,
                message.sensor_id,
                message.state,
                message.triggered_alert_levels,
                message.description
            );
        }
    });

    let hub = AlertHub::new(&config, storage, Arc::new(delivery), cancel.clone());
    if let Err(e) = hub.load_from_storage().await {
        error!("Unable to load entities from storage: {}", e);
    }
    if let Err(e) = hub.seed_error_states().await {
        error!("Unable to load sensors in error state: {}", e);
    }

    let workers = hub.start();
    info!("{} started", service.name);

    cancel.cancelled().await;
    info!("Shutting down {}", service.name);
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker ended abnormally: {}", e);
        }
    }
    drop(hub);
    if let Err(e) = drain.await {
        error!("Delivery sink ended abnormally: {}", e);
    }

    info!("{} stopped", service.name);
    Ok(())
}

async fn build_storage(config: &AlertSrvConfig) -> AlertrResult<StorageBackend> {
    let retention = config.storage.retention();
    let storage: StorageBackend = match config.storage.backend {
        StorageBackendKind::Memory => Arc::new(MemoryStorage::new(retention)),
        StorageBackendKind::Sqlite => {
            let url = config
                .storage
                .sqlite_url
                .as_deref()
                .ok_or_else(|| AlertrError::MissingConfig("storage.sqlite_url".to_string()))?;
            let sqlite = SqliteStorage::connect(url, retention)
                .await
                .map_err(|e| AlertrError::StartupFailed(e.to_string()))?;
            Arc::new(sqlite)
        },
    };
    info!("Using {} storage", storage.name());
    Ok(storage)
}
