//! housed: House network daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use house_core::config::HouseConfig;
use house_core::Role;
use house_services::{resolve_identifier, FileCache};
use housed::{HouseDevice, HouseNetwork};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = HouseConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HouseConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HouseConfig::default()
    });

    let device = match config.device.role {
        Role::Hub => HouseDevice::hub(&config.outbox),
        Role::Extension => {
            let cache = FileCache::open(&config.device.cache_path)
                .context("failed to open identity cache")?;
            let identifier = resolve_identifier(&cache, config.device.identifier)
                .context("failed to resolve house identifier")?;
            HouseDevice::extension(identifier, config.device.categories.clone(), &config.outbox)
        }
    };
    tracing::info!(
        identifier = device.identifier,
        role = %device.role,
        "housed starting"
    );

    let network = HouseNetwork::open(Arc::new(device), config)
        .await
        .context("failed to open house network")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    network.close().await;
    Ok(())
}
