//! Broadcast Hub - fans persisted scans out to subscribed displays
//!
//! The registry is a concurrent map mutated only by `subscribe`,
//! `unsubscribe` and `publish`. Persistent channels get records pushed the
//! moment they are inserted; push streams poll the store on their own timer
//! and only use the registry for bookkeeping and shutdown.

mod connection;

pub use connection::{SubscriberSnapshot, Subscription};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use scanlink_core::{ConnectionStatus, Result, ScanId, ScanLinkError, ScanPublisher, ScanRecord, TransportKind};
use scanlink_telemetry::{Counter, Gauge};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HubSettings;
use connection::SubscriberConnection;

/// Hub counters
#[derive(Debug, Clone)]
pub struct HubMetrics {
    pub subscribers_active: Gauge,
    pub scans_delivered: Counter,
    pub subscribers_dropped: Counter,
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self {
            subscribers_active: Gauge::new("scanlink_hub_subscribers_active"),
            scans_delivered: Counter::new("scanlink_hub_scans_delivered"),
            subscribers_dropped: Counter::new("scanlink_hub_subscribers_dropped"),
        }
    }
}

pub struct BroadcastHub {
    settings: HubSettings,
    registry: DashMap<Uuid, SubscriberConnection>,
    shutdown: CancellationToken,
    metrics: HubMetrics,
}

impl BroadcastHub {
    /// Build the process-wide hub. Called once by the entry point.
    pub fn init(settings: HubSettings) -> Arc<Self> {
        info!(
            heartbeat_secs = settings.heartbeat_interval.as_secs(),
            stream_poll_secs = settings.stream_poll_interval.as_secs(),
            subscriber_buffer = settings.subscriber_buffer,
            "Broadcast hub initialized"
        );
        Arc::new(Self {
            settings,
            registry: DashMap::new(),
            shutdown: CancellationToken::new(),
            metrics: HubMetrics::default(),
        })
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register a subscriber that has already seen everything up to `last_known_id`.
    pub fn subscribe(self: &Arc<Self>, transport_kind: TransportKind, last_known_id: ScanId) -> Result<Subscription> {
        if self.is_shut_down() {
            return Err(ScanLinkError::Unavailable("hub is shutting down".to_string()));
        }

        let (sender, records) = match transport_kind {
            TransportKind::PersistentChannel => {
                let (tx, rx) = mpsc::channel(self.settings.subscriber_buffer);
                (Some(tx), Some(rx))
            }
            TransportKind::PushStream => (None, None),
        };

        let connection = SubscriberConnection {
            id: Uuid::new_v4(),
            transport_kind,
            connected_at: Utc::now(),
            last_delivered_id: Arc::new(AtomicI64::new(last_known_id.max(0))),
            status: Arc::new(RwLock::new(ConnectionStatus::Open)),
            sender,
            cancel: self.shutdown.child_token(),
        };
        let subscription = Subscription::new(&connection, records, Arc::downgrade(self));

        self.registry.insert(connection.id, connection);
        self.metrics.subscribers_active.set(self.registry.len() as u64);

        // Shutdown may have raced the insert; the child token is already cancelled then.
        if self.is_shut_down() {
            self.unsubscribe(subscription.id());
        }

        info!(
            subscriber_id = %subscription.id(),
            transport = %transport_kind,
            last_known_id,
            "Subscriber registered"
        );
        Ok(subscription)
    }

    /// Remove a subscriber and stop its timers. Safe to call more than once.
    pub fn unsubscribe(&self, id: Uuid) {
        if let Some((_, connection)) = self.registry.remove(&id) {
            connection.set_status(ConnectionStatus::Closing);
            connection.cancel.cancel();
            connection.set_status(ConnectionStatus::Closed);
            self.metrics.subscribers_active.set(self.registry.len() as u64);
            debug!(subscriber_id = %id, "Subscriber removed");
        }
    }

    /// Push `record` to every open persistent channel. Subscribers whose
    /// buffer is full or whose task is gone are removed; they recover by
    /// reconnecting with their last known id.
    pub fn deliver(&self, record: &ScanRecord) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for entry in self.registry.iter() {
            let Some(sender) = entry.sender.as_ref() else {
                continue;
            };
            if *entry.status.read() != ConnectionStatus::Open {
                continue;
            }
            match sender.try_send(record.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = %entry.id, record_id = record.id, "Subscriber buffer full, dropping");
                    entry.set_status(ConnectionStatus::Closing);
                    dropped.push(entry.id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(entry.id),
            }
        }

        // Removal happens after iteration; the map shards are still borrowed above.
        for id in &dropped {
            if let Some((_, connection)) = self.registry.remove(id) {
                // Dropping the sender ends the subscriber's record stream after
                // what it already buffered, so the task can report the gap.
                connection.set_status(ConnectionStatus::Closed);
                self.metrics.subscribers_dropped.inc();
            }
        }
        if !dropped.is_empty() {
            self.metrics.subscribers_active.set(self.registry.len() as u64);
        }

        self.metrics.scans_delivered.add(delivered as u64);
        debug!(record_id = record.id, delivered, dropped = dropped.len(), "Scan delivered");
        delivered
    }

    pub fn snapshot(&self) -> Vec<SubscriberSnapshot> {
        let mut subscribers: Vec<_> = self.registry.iter().map(|entry| entry.snapshot()).collect();
        subscribers.sort_by_key(|s| s.connected_at);
        subscribers
    }

    /// Close every connection and stop every per-connection timer.
    /// Idempotent; callable from a signal handler with any number of subscribers.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() && self.registry.is_empty() {
            return;
        }
        self.shutdown.cancel();

        let ids: Vec<Uuid> = self.registry.iter().map(|entry| *entry.key()).collect();
        let closed = ids.len();
        for id in ids {
            self.unsubscribe(id);
        }
        self.metrics.subscribers_active.set(0);

        info!(closed, "Broadcast hub shut down");
    }
}

impl ScanPublisher for BroadcastHub {
    fn publish(&self, record: &ScanRecord) -> usize {
        self.deliver(record)
    }
}
