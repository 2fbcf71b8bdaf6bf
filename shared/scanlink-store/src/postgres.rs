//! PostgreSQL-backed store
//!
//! Expects a `scan_records` table with a `BIGSERIAL` id, a `TEXT` payload and
//! two `TIMESTAMPTZ` columns; `persisted_at` defaults to `now()` so the store
//! clock stamps every row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanlink_core::{is_valid_payload, ScanId, ScanRecord};
use tokio_postgres::Row;
use tracing::instrument;

use crate::{PgPool, PoolConfig, Result, ScanStore, StoreError};

const COLUMNS: &str = "id, payload, captured_at, persisted_at";

pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn connect(config: &PoolConfig) -> Result<Self> {
        Ok(Self::new(PgPool::new(config)?))
    }
}

fn record_from_row(row: &Row) -> std::result::Result<ScanRecord, tokio_postgres::Error> {
    Ok(ScanRecord {
        id: row.try_get("id")?,
        payload: row.try_get("payload")?,
        captured_at: row.try_get("captured_at")?,
        persisted_at: row.try_get("persisted_at")?,
    })
}

fn read_failed(err: tokio_postgres::Error) -> StoreError {
    StoreError::ReadFailed(err.to_string())
}

#[async_trait]
impl ScanStore for PgScanStore {
    #[instrument(skip(self, payload))]
    async fn insert(&self, payload: &str, captured_at: DateTime<Utc>) -> Result<ScanRecord> {
        if !is_valid_payload(payload) {
            return Err(StoreError::InvalidPayload);
        }

        let client = self.pool.get().await?;
        // Single statement: the row is either fully committed or absent.
        let sql = format!(
            "INSERT INTO scan_records (payload, captured_at) VALUES ($1, $2) RETURNING {}",
            COLUMNS
        );
        let row = client
            .query_one(sql.as_str(), &[&payload, &captured_at])
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        record_from_row(&row).map_err(|e| StoreError::WriteFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn latest(&self) -> Result<Option<ScanRecord>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM scan_records ORDER BY id DESC LIMIT 1", COLUMNS);
        let row = client.query_opt(sql.as_str(), &[]).await.map_err(read_failed)?;
        row.as_ref().map(record_from_row).transpose().map_err(read_failed)
    }

    #[instrument(skip(self))]
    async fn since(&self, id: ScanId) -> Result<Option<ScanRecord>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM scan_records WHERE id > $1 ORDER BY id DESC LIMIT 1",
            COLUMNS
        );
        let row = client.query_opt(sql.as_str(), &[&id]).await.map_err(read_failed)?;
        row.as_ref().map(record_from_row).transpose().map_err(read_failed)
    }

    #[instrument(skip(self))]
    async fn after(&self, id: ScanId, limit: usize) -> Result<Vec<ScanRecord>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM scan_records WHERE id > $1 ORDER BY id ASC LIMIT $2",
            COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client.query(sql.as_str(), &[&id, &limit]).await.map_err(read_failed)?;
        rows.iter()
            .map(record_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_failed)
    }

    async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}
