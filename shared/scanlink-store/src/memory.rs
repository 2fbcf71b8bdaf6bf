//! In-process store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scanlink_core::{is_valid_payload, ScanId, ScanRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::{Result, ScanStore, StoreError};

/// Vec-backed store. Records are kept in id order, so lookups are a binary
/// search or a look at the tail.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    records: RwLock<Vec<ScanRecord>>,
    offline: AtomicBool,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the backing connection: every operation reports
    /// `StoreUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::StoreUnavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn insert(&self, payload: &str, captured_at: DateTime<Utc>) -> Result<ScanRecord> {
        self.ensure_online()?;
        if !is_valid_payload(payload) {
            return Err(StoreError::InvalidPayload);
        }

        let mut records = self.records.write();
        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        let record = ScanRecord {
            id,
            payload: payload.to_string(),
            captured_at,
            persisted_at: Utc::now(),
        };
        records.push(record.clone());
        debug!(id, "Stored scan record");
        Ok(record)
    }

    async fn latest(&self) -> Result<Option<ScanRecord>> {
        self.ensure_online()?;
        Ok(self.records.read().last().cloned())
    }

    async fn since(&self, id: ScanId) -> Result<Option<ScanRecord>> {
        self.ensure_online()?;
        Ok(self.records.read().last().filter(|r| r.id > id).cloned())
    }

    async fn after(&self, id: ScanId, limit: usize) -> Result<Vec<ScanRecord>> {
        self.ensure_online()?;
        let records = self.records.read();
        let start = records.partition_point(|r| r.id <= id);
        Ok(records[start..].iter().take(limit).cloned().collect())
    }

    async fn is_healthy(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
