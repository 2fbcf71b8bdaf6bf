//! ScanLink SDK
//!
//! Client side of ScanLink: the camera decode loop that turns frames into
//! validated scans, and the sync receiver that keeps a display showing the
//! latest scan over whichever change feed is configured.

pub mod camera;
pub mod clock;
pub mod codec;
pub mod decode_loop;
pub mod freshness;
pub mod http_store;
pub mod signal;
pub mod sync;

pub use camera::{CameraDevice, CameraError, CameraLease, CameraStream, Frame};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodeImage, CodeRenderer, Decoder, ErrorCorrectionLevel, RenderError, RenderOptions};
pub use decode_loop::{DecodeConfig, DecodeLoop, DecodeState, ScanError, ScanOutcome, ScanSession};
pub use freshness::{validate, Freshness, DEFAULT_FRESHNESS_THRESHOLD};
pub use http_store::HttpScanStore;
pub use signal::SignalBoard;
pub use sync::{
    build_feed, BackoffPolicy, ChangeFeed, DisconnectReason, DisplayState, FeedEvent, FeedKind,
    ReceiverState, SyncConfig, SyncReceiver, SyncStrategy, TransportError,
};
