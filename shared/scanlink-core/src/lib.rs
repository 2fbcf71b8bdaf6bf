//! ScanLink Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - The `ScanRecord` shape every other component shares
//! - The JSON wire envelope used by both hub transports
//! - The publish seam between a successful insert and the broadcast hub
//! - Error handling, configuration and the service runtime

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{Result, ScanLinkError};
pub use service::{DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, ScanLinkService};
