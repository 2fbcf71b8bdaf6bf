//! Sync receiver
//!
//! `Disconnected -> Connecting -> Connected -> Error -> (backoff) -> Connecting`
//!
//! After `maximum_attempts` consecutive failures the receiver parks in
//! `Disconnected(ManualRetryRequired)` and makes no further attempts until
//! [`SyncReceiver::reconnect`] is called.

use scanlink_core::{ScanId, ScanRecord};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SyncConfig;
use super::feed::{ChangeFeed, FeedEvent, FeedKind, TransportError};
use crate::codec::{CodeImage, CodeRenderer, RenderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NotStarted,
    Stopped,
    ManualRetryRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    Disconnected(DisconnectReason),
    Connecting { attempt: u32 },
    Connected,
    Error { failures: u32, reason: String },
}

/// What the display currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub record: Option<ScanRecord>,
    pub image: Option<CodeImage>,
    /// Number of times the code image was regenerated
    pub renders: u64,
}

impl DisplayState {
    pub fn last_rendered_id(&self) -> ScanId {
        self.record.as_ref().map_or(0, |r| r.id)
    }
}

struct Shared {
    state: watch::Sender<ReceiverState>,
    display: watch::Sender<DisplayState>,
    failures: AtomicU32,
    reconnect: watch::Sender<u64>,
    renderer: Arc<dyn CodeRenderer>,
    render: RenderOptions,
}

impl Shared {
    fn set_state(&self, state: ReceiverState) {
        self.state.send_replace(state);
    }

    /// Show `record` if it is newer than what is on screen.
    fn apply(&self, record: &ScanRecord) -> bool {
        self.display.send_if_modified(|display| {
            if record.id <= display.last_rendered_id() {
                return false;
            }
            display.image = match self.renderer.render(&record.payload, &self.render) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(record_id = record.id, reason = e.reason(), "Render failed: {}", e);
                    None
                }
            };
            display.record = Some(record.clone());
            display.renders += 1;
            true
        })
    }
}

struct ActiveFeed {
    kind: FeedKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SyncReceiver {
    config: SyncConfig,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveFeed>>,
    root: CancellationToken,
}

impl SyncReceiver {
    pub fn new(config: SyncConfig, renderer: Arc<dyn CodeRenderer>) -> Self {
        let (state, _) = watch::channel(ReceiverState::Disconnected(DisconnectReason::NotStarted));
        let (display, _) = watch::channel(DisplayState::default());
        let (reconnect, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state,
            display,
            failures: AtomicU32::new(0),
            reconnect,
            renderer,
            render: config.render,
        });

        Self {
            config,
            shared,
            active: Mutex::new(None),
            root: CancellationToken::new(),
        }
    }

    /// Start syncing over `feed`. A feed already running is cancelled,
    /// joined and closed before the new one opens.
    pub async fn start(&self, feed: Box<dyn ChangeFeed>) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
            debug!(feed = %previous.kind, "Previous feed closed");
        }

        let kind = feed.kind();
        let cancel = self.root.child_token();
        self.shared.failures.store(0, Ordering::SeqCst);
        let task = tokio::spawn(run(
            self.shared.clone(),
            feed,
            self.config.clone(),
            cancel.clone(),
        ));
        info!(feed = %kind, "Sync receiver started");

        *active = Some(ActiveFeed { kind, cancel, task });
    }

    pub async fn switch_strategy(&self, feed: Box<dyn ChangeFeed>) {
        let from = self.active_kind().await;
        info!(from = ?from, to = %feed.kind(), "Switching sync strategy");
        self.start(feed).await;
    }

    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            previous.cancel.cancel();
            let _ = previous.task.await;
            info!(feed = %previous.kind, "Sync receiver stopped");
        }
        self.shared
            .set_state(ReceiverState::Disconnected(DisconnectReason::Stopped));
    }

    /// Reset the failure count and retry right away, including from
    /// `ManualRetryRequired`.
    pub fn reconnect(&self) {
        self.shared.failures.store(0, Ordering::SeqCst);
        self.shared.reconnect.send_modify(|generation| *generation += 1);
        info!("Manual reconnect requested");
    }

    /// Deliver a record directly. Returns whether the display changed.
    pub fn apply(&self, record: &ScanRecord) -> bool {
        self.shared.apply(record)
    }

    pub fn state(&self) -> ReceiverState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReceiverState> {
        self.shared.state.subscribe()
    }

    pub fn display(&self) -> DisplayState {
        self.shared.display.borrow().clone()
    }

    pub fn subscribe_display(&self) -> watch::Receiver<DisplayState> {
        self.shared.display.subscribe()
    }

    /// Consecutive failures since the last confirmed connection
    pub fn failures(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    pub async fn active_kind(&self) -> Option<FeedKind> {
        self.active.lock().await.as_ref().map(|a| a.kind)
    }
}

impl Drop for SyncReceiver {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run(shared: Arc<Shared>, mut feed: Box<dyn ChangeFeed>, config: SyncConfig, cancel: CancellationToken) {
    let kind = feed.kind();
    let mut reconnect_rx = shared.reconnect.subscribe();

    loop {
        let attempt = shared.failures.load(Ordering::SeqCst) + 1;
        shared.set_state(ReceiverState::Connecting { attempt });
        let last_known_id = shared.display.borrow().last_rendered_id();

        let failure = tokio::select! {
            _ = cancel.cancelled() => break,
            failure = session(feed.as_mut(), last_known_id, &shared, &config) => failure,
        };
        feed.close().await;

        let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(feed = %kind, failures, reason = failure.reason(), "Sync connection failed: {}", failure);
        shared.set_state(ReceiverState::Error {
            failures,
            reason: failure.to_string(),
        });

        // Anything requested before this point has already been honoured.
        reconnect_rx.borrow_and_update();

        if config.backoff.is_exhausted(shared.failures.load(Ordering::SeqCst)) {
            shared.set_state(ReceiverState::Disconnected(DisconnectReason::ManualRetryRequired));
            warn!(feed = %kind, failures, "Giving up until manual reconnect");
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = reconnect_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        let delay = config.backoff.delay_for(failures);
        debug!(feed = %kind, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = reconnect_rx.changed() => {}
        }
    }

    feed.close().await;
}

/// One connection lifetime. Only returns when the connection is gone.
async fn session(
    feed: &mut dyn ChangeFeed,
    last_known_id: ScanId,
    shared: &Shared,
    config: &SyncConfig,
) -> TransportError {
    match timeout(config.connect_timeout, feed.connect(last_known_id)).await {
        Err(_) => return TransportError::Timeout,
        Ok(Err(e)) => return e,
        Ok(Ok(())) => {}
    }
    shared.set_state(ReceiverState::Connected);
    info!(feed = %feed.kind(), last_known_id, "Sync connected");

    let mut confirmed = false;
    loop {
        let event = match timeout(config.idle_timeout, feed.next_event()).await {
            Err(_) => return TransportError::Timeout,
            Ok(Err(e)) => return e,
            Ok(Ok(event)) => event,
        };

        // First traffic proves the connection; only then is the streak broken.
        if !confirmed {
            confirmed = true;
            shared.failures.store(0, Ordering::SeqCst);
        }

        match event {
            FeedEvent::Record(record) => {
                if shared.apply(&record) {
                    debug!(record_id = record.id, "Display updated");
                } else {
                    debug!(record_id = record.id, "Ignored record at or below display");
                }
            }
            FeedEvent::ServerError { code, message } => {
                warn!(code = %code, "Hub reported error: {}", message);
            }
            FeedEvent::Connected | FeedEvent::Heartbeat => {}
        }
    }
}
