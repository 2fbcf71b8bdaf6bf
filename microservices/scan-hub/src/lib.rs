//! Scan Hub
//!
//! Server side of ScanLink:
//! - REST access to the append-only scan store
//! - Persistent channel (WebSocket) with direct push on insert
//! - Push stream (SSE) that polls the store per connection
//! - Broadcast hub owning the subscriber registry

pub mod api;
pub mod config;
pub mod hub;
pub mod service;

pub use config::{HubConfig, HubSettings, StoreBackend};
pub use hub::{BroadcastHub, SubscriberSnapshot, Subscription};
pub use service::ScanHubService;
