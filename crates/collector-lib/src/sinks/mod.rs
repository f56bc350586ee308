//! Export destinations
//!
//! The [`SinkManager`] hands each finished batch to every configured
//! [`Sink`] under a shared latency budget. [`PointSink`] is the stock sink:
//! it prepares flat metrics for a backend and forwards them through a
//! [`Transport`].

mod manager;
mod point_sink;
mod transport;


pub use manager::{ExportSummary, SinkManager, SinkManagerConfig};
pub use point_sink::{clean_tags, PointSink, PointSinkConfig, MAX_TAGS};
pub use transport::{distribution_line, point_line, LogTransport, Transport};

use crate::models::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// A destination for processed batches
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver a batch; returns once the batch is handed off or rejected
    async fn export(&self, batch: Arc<Batch>);

    /// Release backend resources
    async fn stop(&self);
}
