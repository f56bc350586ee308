//! Metric sources and their scheduling
//!
//! A [`SourceProvider`] groups the [`Source`]s discovered for one kind of
//! target (node summaries, scrape endpoints, the collector itself). The
//! [`SourceManager`] scrapes every provider on its own interval and buffers
//! the results until the pipeline drains them at the next cycle.

mod manager;
mod stats;


pub use manager::{SourceManager, SourceManagerConfig};
pub use stats::{StatsConfig, StatsProvider, StatsSource};

use crate::models::Batch;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A single scrape target
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Collect one batch from the target
    async fn scrape(&self) -> Result<Batch>;
}

/// A named group of sources sharing a schedule
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Current set of sources; called before every scrape round
    fn sources(&self) -> Vec<Arc<dyn Source>>;

    /// How often to scrape; zero means the manager default
    fn collection_interval(&self) -> Duration;

    /// Upper bound for one scrape; zero means the manager default
    fn timeout(&self) -> Duration;
}

/// Receiver for providers created or removed by discovery
pub trait ProviderHandler: Send + Sync {
    fn add_provider(&self, provider: Arc<dyn SourceProvider>);
    fn delete_provider(&self, name: &str);
}
