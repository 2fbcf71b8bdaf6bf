//! Polling feed - reads `latest()` on a fixed interval
//!
//! Used where neither persistent connections nor event streams are
//! available. A [`SignalBoard`] shortens the wait when a scanner in the
//! same process has just persisted something.

use async_trait::async_trait;
use scanlink_core::ScanId;
use scanlink_store::ScanStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use super::feed::{ChangeFeed, FeedEvent, FeedKind, TransportError};
use crate::signal::SignalBoard;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct PollingFeed {
    store: Arc<dyn ScanStore>,
    period: Duration,
    ticker: Option<Interval>,
    signal: Option<watch::Receiver<ScanId>>,
    last_seen: ScanId,
}

impl PollingFeed {
    pub fn new(store: Arc<dyn ScanStore>, period: Duration) -> Self {
        Self {
            store,
            period,
            ticker: None,
            signal: None,
            last_seen: 0,
        }
    }

    pub fn with_signal(mut self, board: &SignalBoard) -> Self {
        self.signal = Some(board.watch());
        self
    }

    async fn wait_for_poll(&mut self) -> Result<(), TransportError> {
        let ticker = self.ticker.as_mut().ok_or(TransportError::NotConnected)?;

        let Some(signal) = self.signal.as_mut() else {
            ticker.tick().await;
            return Ok(());
        };

        tokio::select! {
            _ = ticker.tick() => {}
            changed = signal.changed() => {
                if changed.is_err() {
                    // Board dropped; fall back to the timer alone.
                    self.signal = None;
                } else {
                    debug!("Poll woken by signal board");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for PollingFeed {
    fn kind(&self) -> FeedKind {
        FeedKind::Polling
    }

    async fn connect(&mut self, last_known_id: ScanId) -> Result<(), TransportError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.last_seen = last_known_id;
        if let Some(signal) = self.signal.as_mut() {
            signal.borrow_and_update();
        }
        Ok(())
    }

    /// A tick with nothing new yields `Heartbeat`, which keeps the
    /// receiver's liveness check satisfied.
    async fn next_event(&mut self) -> Result<FeedEvent, TransportError> {
        self.wait_for_poll().await?;

        match self.store.latest().await {
            Ok(Some(record)) if record.id > self.last_seen => {
                self.last_seen = record.id;
                Ok(FeedEvent::Record(record))
            }
            Ok(_) => Ok(FeedEvent::Heartbeat),
            Err(e) => Err(TransportError::Store(e.to_string())),
        }
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}
