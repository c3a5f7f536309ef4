//! Idle Scanner - idle cloud resource detection daemon
//!
//! Serves scan requests for the configured tenants over HTTP, caching
//! verdict snapshots between scans.

use anyhow::{Context, Result};
use scanner_lib::{
    gateway::{InventoryFactory, InventoryFile},
    health::{components, HealthRegistry},
    observability::{ScanMetrics, StructuredLogger},
    ScanOrchestrator,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SCANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting idle-scanner");

    let config = config::ScannerConfig::load()?;
    info!(
        instance = %config.instance_name,
        tenants = config.tenants.len(),
        cache_dir = ?config.cache_dir,
        "Scanner configured"
    );

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    // Register metrics before the first scrape
    ScanMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);

    let cache = config.build_cache()?;

    let inventory = match &config.inventory_path {
        Some(path) => InventoryFile::load(path).context("Failed to load cloud inventory")?,
        None => {
            warn!("No inventory_path configured; every tenant will report no regions");
            health_registry
                .set_degraded(components::BACKEND, "no inventory configured")
                .await;
            InventoryFile::default()
        }
    };

    if config.tenants.is_empty() {
        warn!("No tenants configured; all scan requests will be rejected");
    }

    let orchestrator = ScanOrchestrator::new(
        Arc::new(InventoryFactory::new(inventory)),
        config.tenants.clone(),
        cache,
        config.scan_config(),
    )
    .with_logger(logger.clone());
    logger.log_startup(SCANNER_VERSION, orchestrator.tenant_ids().len());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::new(orchestrator),
        config.default_window_days,
    ));

    // Mark scanner as ready after initialization
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        served = &mut api_handle => {
            let reason = match served {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {e:#}"),
                Err(e) => format!("API server task aborted: {e}"),
            };
            error!(reason = %reason, "API server exited");
            logger.log_shutdown(&reason);
        }
    }

    info!("Shutting down");
    Ok(())
}
