//! API module - REST, WebSocket channel, SSE stream

pub mod rest;
pub mod stream;
pub mod websocket;

use axum::{routing::get, Router};
use scanlink_core::ScanId;
use scanlink_store::ScanStore;
use serde::Deserialize;
use std::sync::Arc;

use crate::hub::BroadcastHub;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ScanStore>,
    pub hub: Arc<BroadcastHub>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn ScanStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            store,
            hub,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Subscribe parameters shared by both transports
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeQuery {
    pub last_known_id: Option<ScanId>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::ready_check))

        // Store endpoints
        .route("/scan/v1/scans", axum::routing::post(rest::insert_scan))
        .route("/scan/v1/scans/latest", get(rest::latest_scan))
        .route("/scan/v1/scans/since/{id}", get(rest::scan_since))
        .route("/scan/v1/scans/after/{id}", get(rest::scans_after))

        // Hub endpoints
        .route("/scan/v1/subscribers", get(rest::list_subscribers))
        .route("/scan/v1/ws", get(websocket::ws_handler))
        .route("/scan/v1/stream", get(stream::sse_handler))
        .with_state(state)
}
