//! SLS Heartbeat Exporter
//!
//! Serves `/metrics` for Prometheus. Every scrape queries the log service
//! for each configured machine group and reports which expected machines
//! are heartbeating.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::{
    directory::{DirectoryClientFactory, SlsClientFactory},
    health::{components, HealthRegistry},
    StructuredLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prometheus exporter for log collector heartbeats
#[derive(Parser)]
#[command(name = "sls-heartbeat-exporter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the exporter configuration file
    #[arg(
        long,
        env = "SLS_EXPORTER_CONFIG",
        default_value = "./sls_heartbeat_exporter.yml"
    )]
    config: PathBuf,
}

/// Log service clients for a loaded configuration
fn sls_factory(config: &config::ExporterConfig) -> Result<Arc<dyn DirectoryClientFactory>> {
    let factory = SlsClientFactory::new(config.credentials(), config.client_config())
        .context("failed to build log service client")?;
    Ok(Arc::new(factory))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let config = config::ExporterConfig::load(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
    let listen_addr = config.listen_addr()?;
    let targets = config.targets();
    info!(
        config = %cli.config.display(),
        regions = targets.regions().count(),
        max_concurrency = config.global.max_concurrency,
        "Exporter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONFIG).await;
    health_registry.register(components::RECONCILER).await;

    let build_factory: api::FactoryBuilder = Box::new(sls_factory);
    let initial_plan = api::ScrapePlan::from_config(&config, &build_factory)?;

    let logger = StructuredLogger::new(&config.global.instance);
    logger.log_startup(
        EXPORTER_VERSION,
        &listen_addr,
        targets.regions().count(),
        targets.targets().count(),
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        logger.clone(),
        cli.config.clone(),
        initial_plan,
        build_factory,
    ));

    health_registry.set_ready(true).await;

    let shutdown_logger = logger.clone();
    api::serve(&listen_addr, app_state, async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown_logger.log_shutdown("SIGINT received"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    })
    .await?;

    info!("Shutting down");
    Ok(())
}
