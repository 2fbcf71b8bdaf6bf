//! Store adapter backed by the hub's REST surface
//!
//! Lets a scanner or a polling display use the hub's store without a
//! database connection of its own. Inserts through this adapter are
//! published to live channels by the hub itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use scanlink_core::{is_valid_payload, ScanId, ScanRecord};
use scanlink_store::{Result, ScanStore, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertBody<'a> {
    payload: &'a str,
    captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HttpScanStore {
    base_url: String,
    client: Client,
}

impl HttpScanStore {
    /// `base_url` is the hub root, e.g. `http://localhost:8080`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/scan/v1{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.client.get(self.url(path)).send().await.map_err(read_error)?;
        decode(response, StoreError::ReadFailed).await
    }
}

fn read_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() || e.is_timeout() {
        StoreError::StoreUnavailable(e.to_string())
    } else {
        StoreError::ReadFailed(e.to_string())
    }
}

fn write_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() {
        StoreError::StoreUnavailable(e.to_string())
    } else {
        StoreError::WriteFailed(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    otherwise: fn(String) -> StoreError,
) -> Result<Option<T>> {
    let status = response.status();
    let envelope: Option<Envelope<T>> = response.json().await.ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.error.clone())
        .unwrap_or_else(|| status.to_string());

    match status {
        s if s.is_success() => match envelope {
            Some(envelope) => Ok(envelope.data),
            None => Err(otherwise(format!("unreadable response body ({})", status))),
        },
        StatusCode::SERVICE_UNAVAILABLE => Err(StoreError::StoreUnavailable(message)),
        StatusCode::BAD_REQUEST => Err(StoreError::InvalidPayload),
        _ => Err(otherwise(message)),
    }
}

#[async_trait]
impl ScanStore for HttpScanStore {
    #[instrument(skip(self, payload), fields(hub = %self.base_url))]
    async fn insert(&self, payload: &str, captured_at: DateTime<Utc>) -> Result<ScanRecord> {
        if !is_valid_payload(payload) {
            return Err(StoreError::InvalidPayload);
        }

        let response = self
            .client
            .post(self.url("/scans"))
            .json(&InsertBody { payload, captured_at })
            .send()
            .await
            .map_err(write_error)?;

        let record: Option<ScanRecord> = decode(response, StoreError::WriteFailed).await?;
        let record = record.ok_or_else(|| StoreError::WriteFailed("hub returned no record".to_string()))?;
        debug!(record_id = record.id, "Scan inserted via hub");
        Ok(record)
    }

    async fn latest(&self) -> Result<Option<ScanRecord>> {
        self.get("/scans/latest").await
    }

    async fn since(&self, id: ScanId) -> Result<Option<ScanRecord>> {
        self.get(&format!("/scans/since/{}", id)).await
    }

    async fn after(&self, id: ScanId, limit: usize) -> Result<Vec<ScanRecord>> {
        let records: Option<Vec<ScanRecord>> = self.get(&format!("/scans/after/{}?limit={}", id, limit)).await?;
        Ok(records.unwrap_or_default())
    }

    async fn is_healthy(&self) -> bool {
        match self.client.get(format!("{}/ready", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = HttpScanStore::new("http://hub.local:8080/").unwrap();
        assert_eq!(store.base_url(), "http://hub.local:8080");
        assert_eq!(store.url("/scans/latest"), "http://hub.local:8080/scan/v1/scans/latest");
    }

    #[tokio::test]
    async fn test_blank_payload_rejected_locally() {
        let store = HttpScanStore::new("http://127.0.0.1:1").unwrap();
        assert_eq!(store.insert("  ", Utc::now()).await, Err(StoreError::InvalidPayload));
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_unavailable() {
        let store = HttpScanStore::new("http://127.0.0.1:1").unwrap();
        let err = store.latest().await.unwrap_err();
        assert_eq!(err.reason(), "store-unavailable");
        assert!(!store.is_healthy().await);
    }
}
