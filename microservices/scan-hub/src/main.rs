//! Scan Hub Microservice

use scan_hub::{HubConfig, ScanHubService};
use scanlink_core::{MicroserviceRuntime, Result, ScanLinkError};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    scanlink_telemetry::init("scan-hub").map_err(|e| ScanLinkError::Config(e.to_string()))?;

    info!("Starting Scan Hub microservice");

    let config = HubConfig::from_env()?;
    let service = Arc::new(ScanHubService::new(config)?);
    MicroserviceRuntime::run(service).await
}
