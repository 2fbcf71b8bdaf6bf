//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use scanlink_core::{
    DependencyStatus, HealthStatus, ReadinessStatus, ScanId, ScanLinkError, ScanPublisher, ScanRecord,
};
use scanlink_store::{StoreError, DEFAULT_AFTER_LIMIT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::hub::SubscriberSnapshot;

/// Generic API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    pub fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.into()),
        })
    }
}

/// Handler error carrying the service error taxonomy
#[derive(Debug)]
pub struct ApiError(pub ScanLinkError);

impl From<ScanLinkError> for ApiError {
    fn from(err: ScanLinkError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiResponse::<()>::error(format!("{}: {}", self.0.error_code(), self.0));
        (status, body).into_response()
    }
}

// Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        healthy: true,
        service_id: "scan-hub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let started = std::time::Instant::now();
    let store_ok = state.store.is_healthy().await;
    let ready = store_ok && !state.hub.is_shut_down();

    let status = ReadinessStatus {
        ready,
        dependencies: vec![DependencyStatus {
            name: "store".to_string(),
            available: store_ok,
            latency_ms: Some(started.elapsed().as_millis() as u64),
        }],
    };
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertScanRequest {
    pub payload: String,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Persist a scan and push it to every persistent channel right away.
pub async fn insert_scan(
    State(state): State<AppState>,
    Json(req): Json<InsertScanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScanRecord>>), ApiError> {
    let captured_at = req.captured_at.unwrap_or_else(Utc::now);
    let record = state.store.insert(&req.payload, captured_at).await.map_err(|e| {
        warn!(reason = e.reason(), "Scan insert failed: {}", e);
        e
    })?;

    let delivered = state.hub.publish(&record);
    info!(record_id = record.id, delivered, "Scan persisted");

    Ok((StatusCode::CREATED, ApiResponse::success(record)))
}

pub async fn latest_scan(State(state): State<AppState>) -> Result<Json<ApiResponse<Option<ScanRecord>>>, ApiError> {
    let record = state.store.latest().await?;
    Ok(ApiResponse::success(record))
}

pub async fn scan_since(
    State(state): State<AppState>,
    Path(id): Path<ScanId>,
) -> Result<Json<ApiResponse<Option<ScanRecord>>>, ApiError> {
    let record = state.store.since(id).await?;
    Ok(ApiResponse::success(record))
}

#[derive(Debug, Deserialize)]
pub struct AfterQuery {
    pub limit: Option<usize>,
}

pub async fn scans_after(
    State(state): State<AppState>,
    Path(id): Path<ScanId>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<ApiResponse<Vec<ScanRecord>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_AFTER_LIMIT).clamp(1, DEFAULT_AFTER_LIMIT);
    let records = state.store.after(id, limit).await?;
    Ok(ApiResponse::success(records))
}

pub async fn list_subscribers(State(state): State<AppState>) -> Json<ApiResponse<Vec<SubscriberSnapshot>>> {
    ApiResponse::success(state.hub.snapshot())
}
