use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use device_gateway::{Gateway, GatewayConfig, LocalMetadata, MemoryEventStore};
use device_registry::load_catalog_dir;
use msg_transport::MockBus;

#[derive(Parser)]
#[command(name = "gatewayd")]
#[command(about = "Device gateway daemon")]
struct Args {
    /// Gateway config YAML; defaults apply when the file is missing
    #[arg(long, default_value = "configs/gateway.yaml")]
    config: String,

    /// Catalog directory with profiles/, devices/ and value-descriptors.yaml
    #[arg(long, default_value = "configs/catalog")]
    catalog: String,

    /// Override the heartbeat interval in seconds
    #[arg(long)]
    heartbeat_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();
    let mut config = GatewayConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    if let Some(secs) = args.heartbeat_secs {
        config.heartbeat_secs = secs;
    }
    let catalog = load_catalog_dir(&args.catalog)?;
    let devices: Vec<_> = catalog.devices.values().cloned().collect();
    info!(
        profiles = catalog.profiles.len(),
        devices = devices.len(),
        "catalog loaded"
    );

    // No broker binding yet: the in-process bus stands in for the device network.
    let bus = Arc::new(MockBus::new("mock0"));
    let store = Arc::new(MemoryEventStore::new());
    let gateway = Gateway::start(
        config.clone(),
        bus,
        Arc::new(LocalMetadata::new(catalog)),
        store.clone(),
    )
    .await?;

    for device in devices {
        let name = device.name.clone();
        if let Err(e) = gateway.add_device(device).await {
            warn!(device = %name, error = %e, "device not added");
        }
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(config.heartbeat_secs.max(1)));
    loop {
        tokio::select! {
            _ = heartbeat.tick() => gateway.heartbeat(),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for name in gateway.devices().names() {
        if let Err(e) = gateway.remove_device(&name).await {
            warn!(device = %name, error = %e, "device not removed cleanly");
        }
    }
    info!(events = store.events().len(), "gateway daemon shutting down");
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
