#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scanlink_core::{ScanId, ScanPublisher, ScanRecord};
use scanlink_sdk::{
    CameraDevice, CameraError, CameraStream, ChangeFeed, CodeImage, CodeRenderer, Decoder, FeedEvent, FeedKind,
    Frame, ManualClock, RenderError, RenderOptions, TransportError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Camera

#[derive(Default)]
pub struct CameraCounters {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub in_use: AtomicBool,
    pub busy_rejections: AtomicUsize,
}

impl CameraCounters {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

/// Single-consumer camera; a second acquire while held fails with `DeviceBusy`.
pub struct FakeCamera {
    pub counters: Arc<CameraCounters>,
    pub fail_with: Option<CameraError>,
    pub acquire_delay: Duration,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(CameraCounters::default()),
            fail_with: None,
            acquire_delay: Duration::ZERO,
        }
    }

    pub fn failing(error: CameraError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            acquire_delay: delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        if let Some(error) = self.fail_with {
            return Err(error);
        }
        if self.counters.in_use.swap(true, Ordering::SeqCst) {
            self.counters.busy_rejections.fetch_add(1, Ordering::SeqCst);
            return Err(CameraError::DeviceBusy);
        }
        self.counters.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            counters: self.counters.clone(),
            frame: 0,
        }))
    }
}

struct FakeStream {
    counters: Arc<CameraCounters>,
    frame: u32,
}

impl CameraStream for FakeStream {
    fn capture(&mut self) -> Option<Frame> {
        self.frame += 1;
        Some(Frame {
            width: 1,
            height: 1,
            data: self.frame.to_le_bytes().to_vec(),
        })
    }

    fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        self.counters.in_use.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Decoding and rendering

fn frame_number(frame: &Frame) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&frame.data[..4]);
    u32::from_le_bytes(bytes)
}

/// Finds `text` from frame `from_frame` on. Optionally moves a manual clock
/// forward while "decoding", to model a slow decode.
pub struct ScriptedDecoder {
    pub text: String,
    pub from_frame: u32,
    pub slow_by: Option<(Arc<ManualClock>, chrono::Duration)>,
    pub calls: AtomicUsize,
}

impl ScriptedDecoder {
    pub fn new(text: &str, from_frame: u32) -> Self {
        Self {
            text: text.to_string(),
            from_frame,
            slow_by: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn taking(mut self, clock: Arc<ManualClock>, by: chrono::Duration) -> Self {
        self.slow_by = Some((clock, by));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&self, frame: &Frame) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if frame_number(frame) < self.from_frame {
            return None;
        }
        if let Some((clock, by)) = &self.slow_by {
            clock.advance(*by);
        }
        Some(self.text.clone())
    }
}

pub struct NeverDecoder;

impl Decoder for NeverDecoder {
    fn decode(&self, _frame: &Frame) -> Option<String> {
        None
    }
}

pub struct FakeRenderer;

impl CodeRenderer for FakeRenderer {
    fn render(&self, text: &str, options: &RenderOptions) -> Result<CodeImage, RenderError> {
        scanlink_sdk::codec::check_renderable(text)?;
        Ok(CodeImage {
            width: options.size,
            height: options.size,
            pixels: text.as_bytes().to_vec(),
        })
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<ScanRecord>>,
}

impl ScanPublisher for RecordingPublisher {
    fn publish(&self, record: &ScanRecord) -> usize {
        self.published.lock().push(record.clone());
        1
    }
}

// ---------------------------------------------------------------------------
// Change feeds

pub enum Session {
    Refuse,
    /// Yield the events, then either close or go silent
    Serve { events: Vec<FeedEvent>, then_hang: bool },
}

#[derive(Default)]
pub struct FeedTally {
    pub connects: AtomicU32,
    pub closes: AtomicU32,
    pub last_known_ids: Mutex<Vec<ScanId>>,
}

impl FeedTally {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Plays back one `Session` per connect. Once the script runs out every
/// connect is refused.
pub struct ScriptedFeed {
    kind: FeedKind,
    script: VecDeque<Session>,
    pending: VecDeque<FeedEvent>,
    hang: bool,
    connected: bool,
    pub tally: Arc<FeedTally>,
}

impl ScriptedFeed {
    pub fn new(kind: FeedKind, script: Vec<Session>) -> Self {
        Self {
            kind,
            script: script.into(),
            pending: VecDeque::new(),
            hang: false,
            connected: false,
            tally: Arc::new(FeedTally::default()),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(FeedKind::PersistentChannel, Vec::new())
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    fn kind(&self) -> FeedKind {
        self.kind
    }

    async fn connect(&mut self, last_known_id: ScanId) -> Result<(), TransportError> {
        self.tally.connects.fetch_add(1, Ordering::SeqCst);
        self.tally.last_known_ids.lock().push(last_known_id);

        match self.script.pop_front().unwrap_or(Session::Refuse) {
            Session::Refuse => Err(TransportError::Connect("connection refused".to_string())),
            Session::Serve { events, then_hang } => {
                self.pending = events.into();
                self.hang = then_hang;
                self.connected = true;
                Ok(())
            }
        }
    }

    async fn next_event(&mut self) -> Result<FeedEvent, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.connected = false;
        Err(TransportError::Closed)
    }

    async fn close(&mut self) {
        self.connected = false;
        self.tally.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------

pub fn record(id: ScanId, payload: &str) -> ScanRecord {
    let now = chrono::Utc::now();
    ScanRecord {
        id,
        payload: payload.to_string(),
        captured_at: now,
        persisted_at: now,
    }
}

/// Poll `condition` on virtual or real time until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
