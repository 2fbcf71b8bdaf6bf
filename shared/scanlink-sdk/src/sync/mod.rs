//! Sync receiver - keeps a display on the latest scan
//!
//! Three interchangeable change feeds sit behind [`ChangeFeed`]:
//! a persistent WebSocket channel, an SSE push stream, and plain polling.
//! [`SyncReceiver`] drives whichever one is configured, reconnecting with
//! bounded backoff and applying records idempotently.

mod backoff;
mod channel;
mod config;
mod feed;
mod polling;
mod receiver;
mod stream;

pub use backoff::BackoffPolicy;
pub use channel::ChannelFeed;
pub use config::{build_feed, SyncConfig, SyncStrategy};
pub use feed::{ChangeFeed, FeedEvent, FeedKind, TransportError};
pub use polling::PollingFeed;
pub use receiver::{DisconnectReason, DisplayState, ReceiverState, SyncReceiver};
pub use stream::{SseParser, StreamFeed};
