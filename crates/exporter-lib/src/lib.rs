//! Library for the SLS heartbeat exporter
//!
//! This crate provides the core functionality for:
//! - Querying machine group membership from the log service
//! - Reconciling desired vs heartbeating machines on every scrape
//! - Request-scoped Prometheus exposition of heartbeat state
//! - Health checks and structured logging

pub mod directory;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod region;
pub mod sink;

pub use error::{DirectoryError, RegionLabelError, SkipReason};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::StructuredLogger;
pub use reconcile::{PassSummary, Reconciler};
pub use sink::{HeartbeatSink, ScrapeContext};
