//! Decode loop
//!
//! Drives one scan session: acquire the camera, inspect frames on a fixed
//! cadence, and on the first readable code stop scheduling frames, release
//! the camera, validate freshness and persist. Every exit path releases the
//! camera exactly once.
//!
//! State machine:
//! `Idle -> Acquiring -> Streaming -> Decoded | Stopped | Error`
//!
//! Terminal states are at rest: the camera is already released and the loop
//! accepts a new `start()`. They stay observable until that next start.

use parking_lot::Mutex;
use scanlink_core::{is_valid_payload, ScanPublisher, ScanRecord};
use scanlink_store::{ScanStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{CameraDevice, CameraError, CameraLease};
use crate::clock::{Clock, SystemClock};
use crate::codec::Decoder;
use crate::freshness::{self, Freshness, DEFAULT_FRESHNESS_THRESHOLD};
use crate::signal::SignalBoard;

#[derive(Debug, Clone)]
pub struct DecodeConfig {
    pub frame_interval: Duration,
    pub freshness_threshold: Duration,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            freshness_threshold: DEFAULT_FRESHNESS_THRESHOLD,
        }
    }
}

impl DecodeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let frame_interval = std::env::var("FRAME_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.frame_interval);
        let freshness_threshold = std::env::var("FRESHNESS_THRESHOLD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.freshness_threshold);

        Self {
            frame_interval,
            freshness_threshold,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Scan is stale: captured {age:?} ago")]
    StaleScan { age: Duration },

    #[error("Scan could not be persisted: {0}")]
    PersistFailed(#[source] StoreError),
}

impl ScanError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Camera(e) => e.reason(),
            Self::StaleScan { .. } => "stale-scan",
            Self::PersistFailed(_) => "persist-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeState {
    Idle,
    Acquiring,
    Streaming,
    Decoded(ScanRecord),
    Stopped,
    Error(ScanError),
}

impl DecodeState {
    /// No session is running and the camera is not held.
    pub fn is_at_rest(&self) -> bool {
        !matches!(self, Self::Acquiring | Self::Streaming)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Decoded(ScanRecord),
    Stopped,
    Failed(ScanError),
}

/// Handle to one started session
#[derive(Debug)]
pub struct ScanSession {
    outcome: oneshot::Receiver<ScanOutcome>,
    cancel: CancellationToken,
}

impl ScanSession {
    pub async fn outcome(self) -> ScanOutcome {
        self.outcome.await.unwrap_or(ScanOutcome::Stopped)
    }

    /// Stop this session only; a newer session on the same loop is untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    lease: Option<Arc<CameraLease>>,
}

pub struct DecodeLoop {
    camera: Arc<dyn CameraDevice>,
    decoder: Arc<dyn Decoder>,
    store: Arc<dyn ScanStore>,
    publisher: Option<Arc<dyn ScanPublisher>>,
    signal: Option<SignalBoard>,
    clock: Arc<dyn Clock>,
    config: DecodeConfig,
    state: watch::Sender<DecodeState>,
    active: Mutex<Option<ActiveSession>>,
    // Serializes acquisition so two sessions never hold the device at once
    acquiring: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl DecodeLoop {
    pub fn new(camera: Arc<dyn CameraDevice>, decoder: Arc<dyn Decoder>, store: Arc<dyn ScanStore>) -> Self {
        let (state, _) = watch::channel(DecodeState::Idle);
        Self {
            camera,
            decoder,
            store,
            publisher: None,
            signal: None,
            clock: Arc::new(SystemClock),
            config: DecodeConfig::default(),
            state,
            active: Mutex::new(None),
            acquiring: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Announce persisted scans to in-process subscribers
    pub fn with_publisher(mut self, publisher: Arc<dyn ScanPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_signal(mut self, signal: SignalBoard) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: DecodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> DecodeState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<DecodeState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Start a session. Any session already running is torn down first.
    ///
    /// Camera failures are returned directly; everything after acquisition
    /// is reported through the returned session's outcome.
    pub async fn start(self: &Arc<Self>) -> Result<ScanSession, ScanError> {
        let _acquiring = self.acquiring.lock().await;
        self.stop();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *self.active.lock() = Some(ActiveSession {
            generation,
            cancel: cancel.clone(),
            lease: None,
        });
        self.set_state(generation, DecodeState::Acquiring);

        let lease = match CameraLease::acquire(self.camera.as_ref()).await {
            Ok(lease) => Arc::new(lease),
            Err(e) => {
                warn!(reason = e.reason(), "Camera acquisition failed: {}", e);
                self.clear(generation);
                let err = ScanError::Camera(e);
                self.finish(generation, DecodeState::Error(err.clone()));
                return Err(err);
            }
        };

        let (tx, rx) = oneshot::channel();
        let attached = {
            let mut active = self.active.lock();
            match active.as_mut() {
                Some(session) if session.generation == generation && !cancel.is_cancelled() => {
                    session.lease = Some(lease.clone());
                    true
                }
                _ => false,
            }
        };

        if !attached {
            lease.release();
            debug!(generation, "Stopped during acquisition, camera released");
            self.clear(generation);
            self.finish(generation, DecodeState::Stopped);
            let _ = tx.send(ScanOutcome::Stopped);
            return Ok(ScanSession { outcome: rx, cancel });
        }

        self.set_state(generation, DecodeState::Streaming);
        info!(generation, "Camera streaming");

        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = this.run_frames(&lease, &task_cancel).await;
            lease.release();
            this.clear(generation);

            let terminal = match &outcome {
                ScanOutcome::Decoded(record) => DecodeState::Decoded(record.clone()),
                ScanOutcome::Stopped => DecodeState::Stopped,
                ScanOutcome::Failed(e) => DecodeState::Error(e.clone()),
            };
            this.finish(generation, terminal);
            let _ = tx.send(outcome);
        });

        Ok(ScanSession { outcome: rx, cancel })
    }

    /// Stop the active session, releasing the camera. Safe to call at any time.
    pub fn stop(&self) {
        let Some(session) = self.active.lock().take() else {
            return;
        };
        session.cancel.cancel();
        if let Some(lease) = session.lease {
            lease.release();
        }
        info!(generation = session.generation, "Decode session stopped");
    }

    async fn run_frames(&self, lease: &CameraLease, cancel: &CancellationToken) -> ScanOutcome {
        let mut ticker = interval(self.config.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (text, captured_at) = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ScanOutcome::Stopped,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                return ScanOutcome::Stopped;
            }

            let captured_at = self.clock.now();
            let Some(frame) = lease.capture() else {
                continue;
            };
            match self.decoder.decode(&frame) {
                Some(text) if is_valid_payload(&text) => break (text, captured_at),
                _ => continue,
            }
        };

        // No frame may be processed after a successful decode.
        cancel.cancel();
        lease.release();

        let now = self.clock.now();
        if let Freshness::Reject { age } = freshness::validate(captured_at, now, self.config.freshness_threshold) {
            warn!(age_ms = age.as_millis() as u64, "Rejected stale scan");
            return ScanOutcome::Failed(ScanError::StaleScan { age });
        }

        match self.store.insert(&text, captured_at).await {
            Ok(record) => {
                if let Some(publisher) = &self.publisher {
                    publisher.publish(&record);
                }
                if let Some(signal) = &self.signal {
                    signal.announce(record.id);
                }
                info!(record_id = record.id, "Scan persisted");
                ScanOutcome::Decoded(record)
            }
            Err(e) => {
                warn!(reason = e.reason(), "Scan persist failed: {}", e);
                ScanOutcome::Failed(ScanError::PersistFailed(e))
            }
        }
    }

    fn clear(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.generation == generation) {
            *active = None;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: DecodeState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }

    /// Publish the terminal state. It holds until the next `start()`.
    fn finish(&self, generation: u64, terminal: DecodeState) {
        if self.is_current(generation) {
            self.state.send_replace(terminal);
        }
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_reasons() {
        assert_eq!(ScanError::from(CameraError::PermissionDenied).reason(), "permission-denied");
        assert_eq!(
            ScanError::StaleScan {
                age: Duration::from_secs(9)
            }
            .reason(),
            "stale-scan"
        );
        assert_eq!(
            ScanError::PersistFailed(StoreError::WriteFailed("x".into())).reason(),
            "persist-failed"
        );
    }

    #[test]
    fn test_terminal_states_are_at_rest() {
        assert!(DecodeState::Idle.is_at_rest());
        assert!(DecodeState::Stopped.is_at_rest());
        assert!(DecodeState::Error(ScanError::Camera(CameraError::DeviceBusy)).is_at_rest());
        assert!(!DecodeState::Acquiring.is_at_rest());
        assert!(!DecodeState::Streaming.is_at_rest());
    }

    #[test]
    fn test_default_config() {
        let config = DecodeConfig::default();
        assert_eq!(config.freshness_threshold, Duration::from_secs(5));
        assert!(config.frame_interval < Duration::from_millis(100));
    }
}
