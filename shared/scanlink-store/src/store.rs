//! Append-only store contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanlink_core::{ScanId, ScanRecord};

use crate::Result;

/// Page size used for catch-up reads when the caller has no preference
pub const DEFAULT_AFTER_LIMIT: usize = 500;

/// Narrow contract over record persistence.
///
/// Implementations assign ids that strictly increase for the lifetime of the
/// store, never delete, and never expose a record whose insert failed.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Persist a new record. Fails with `StoreUnavailable` when no connection can
    /// be obtained and `WriteFailed` for any other persistence error.
    async fn insert(&self, payload: &str, captured_at: DateTime<Utc>) -> Result<ScanRecord>;

    /// The record with the highest id, if any
    async fn latest(&self) -> Result<Option<ScanRecord>>;

    /// The highest-id record with `record.id > id`, or `None` when caught up
    async fn since(&self, id: ScanId) -> Result<Option<ScanRecord>>;

    /// Up to `limit` records with `record.id > id`, ascending by id
    async fn after(&self, id: ScanId, limit: usize) -> Result<Vec<ScanRecord>>;

    /// Cheap liveness probe for readiness checks
    async fn is_healthy(&self) -> bool {
        true
    }
}
