//! Subscriber connections held by the hub registry

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scanlink_core::{ConnectionStatus, ScanId, ScanRecord, TransportKind};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::BroadcastHub;

/// Registry entry. The transport task owns the matching `Subscription`.
pub(crate) struct SubscriberConnection {
    pub id: Uuid,
    pub transport_kind: TransportKind,
    pub connected_at: DateTime<Utc>,
    pub last_delivered_id: Arc<AtomicI64>,
    pub status: Arc<RwLock<ConnectionStatus>>,
    /// Only persistent channels receive direct pushes
    pub sender: Option<mpsc::Sender<ScanRecord>>,
    pub cancel: CancellationToken,
}

impl SubscriberConnection {
    pub fn snapshot(&self) -> SubscriberSnapshot {
        SubscriberSnapshot {
            id: self.id,
            transport_kind: self.transport_kind,
            last_delivered_id: self.last_delivered_id.load(Ordering::SeqCst),
            status: *self.status.read(),
            connected_at: self.connected_at,
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSnapshot {
    pub id: Uuid,
    pub transport_kind: TransportKind,
    pub last_delivered_id: ScanId,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
}

/// A transport task's side of a registration.
///
/// Dropping it unsubscribes, so every exit path of the task cleans up.
pub struct Subscription {
    id: Uuid,
    transport_kind: TransportKind,
    records: Option<mpsc::Receiver<ScanRecord>>,
    last_delivered_id: Arc<AtomicI64>,
    status: Arc<RwLock<ConnectionStatus>>,
    cancel: CancellationToken,
    hub: Weak<BroadcastHub>,
}

impl Subscription {
    pub(crate) fn new(
        connection: &SubscriberConnection,
        records: Option<mpsc::Receiver<ScanRecord>>,
        hub: Weak<BroadcastHub>,
    ) -> Self {
        Self {
            id: connection.id,
            transport_kind: connection.transport_kind,
            records,
            last_delivered_id: connection.last_delivered_id.clone(),
            status: connection.status.clone(),
            cancel: connection.cancel.clone(),
            hub,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    pub fn last_delivered_id(&self) -> ScanId {
        self.last_delivered_id.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Claim `record` for delivery. Returns false for anything at or below the
    /// last delivered id, which keeps per-subscriber order non-decreasing.
    pub fn accept(&self, record: &ScanRecord) -> bool {
        self.last_delivered_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (record.id > current).then_some(record.id)
            })
            .is_ok()
    }

    /// Next record pushed by the hub. `None` once the hub has dropped this
    /// subscriber (overflow or shutdown); push streams never receive any.
    pub async fn next_record(&mut self) -> Option<ScanRecord> {
        match self.records.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Owned handle on the same token, for select loops that also poll
    /// `next_record`.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
        *self.status.write() = ConnectionStatus::Closed;
    }
}
