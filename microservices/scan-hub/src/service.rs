//! Scan hub service lifecycle

use scanlink_core::{
    DependencyStatus, HealthStatus, ReadinessStatus, Result, ScanLinkService,
};
use scanlink_store::{MemoryScanStore, PgScanStore, ScanStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::{HubConfig, StoreBackend};
use crate::hub::BroadcastHub;

pub struct ScanHubService {
    config: HubConfig,
    store: Arc<dyn ScanStore>,
    hub: Arc<BroadcastHub>,
    shutdown: CancellationToken,
    start_time: std::time::Instant,
}

impl ScanHubService {
    pub fn new(config: HubConfig) -> Result<Self> {
        let store: Arc<dyn ScanStore> = match config.store_backend {
            StoreBackend::Memory => Arc::new(MemoryScanStore::new()),
            StoreBackend::Postgres => Arc::new(PgScanStore::connect(&config.pool)?),
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: HubConfig, store: Arc<dyn ScanStore>) -> Self {
        let hub = BroadcastHub::init(config.hub.clone());
        Self {
            config,
            store,
            hub,
            shutdown: CancellationToken::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub fn router(&self) -> axum::Router {
        api::create_router(AppState::new(self.store.clone(), self.hub.clone()))
    }
}

#[async_trait::async_trait]
impl ScanLinkService for ScanHubService {
    fn service_id(&self) -> &'static str {
        "scan-hub"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let started = std::time::Instant::now();
        let available = self.store.is_healthy().await;
        ReadinessStatus {
            ready: available && !self.hub.is_shut_down(),
            dependencies: vec![DependencyStatus {
                name: "store".to_string(),
                available,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }],
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!(subscribers = self.hub.subscriber_count(), "Shutting down scan hub");
        // Closing the hub ends every channel and stream, which lets the
        // server's graceful shutdown complete.
        self.hub.shutdown();
        self.shutdown.cancel();
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(http = %self.config.http_bind, store = ?self.config.store_backend, "Starting scan hub server");

        let listener = tokio::net::TcpListener::bind(&self.config.http_bind).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await?;

        Ok(())
    }
}
