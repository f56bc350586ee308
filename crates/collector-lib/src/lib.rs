//! Collector library for cluster resource metrics
//!
//! This crate provides the core functionality for:
//! - Scraping registered sources on their own schedules
//! - Rate calculation over cumulative counters and distributions
//! - Roll-ups from containers to pods, namespaces, nodes and the cluster
//! - Glob based metric and tag filtering
//! - Fan-out export to sinks under a latency budget
//! - Health checks and observability

pub mod error;
pub mod filter;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod processors;
pub mod sinks;
pub mod sources;

pub use error::{CollectorError, Result};
pub use health::{
    ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse, StageHealth,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use pipeline::{CycleOutcome, PipelineBuilder, PipelineConfig, PipelineManager};
