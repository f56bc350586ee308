//! Batch processors
//!
//! Processors run strictly in order on every cycle's batch. The usual chain:
//! - [`RateCalculator`] and [`DistributionRateCalculator`] turn counters into rates
//! - [`NamespaceBasedEnricher`] attaches namespace identity
//! - [`PodAggregator`] then the [`SumCountAggregator`] variants roll values up
//!   to pods, namespaces, nodes and the cluster
//! - [`CumulativeDistributionConverter`] and [`PointConverter`] produce the
//!   flat form sinks consume

mod distribution;
mod namespace_enricher;
mod pod_aggregator;
mod point_converter;
mod rate_calculator;
mod sum_count;

pub use distribution::{CumulativeDistributionConverter, DistributionRateCalculator};
pub use namespace_enricher::{NamespaceBasedEnricher, NamespaceStore, StaticNamespaceStore};
pub use pod_aggregator::PodAggregator;
pub use point_converter::{PointConverter, PointConverterConfig};
pub use rate_calculator::{RateCalculator, RateTarget, RateUnit};
pub use sum_count::{AggregationSpec, ExtractGroup, SumCountAggregator};

use crate::error::Result;
use crate::models::Batch;
use async_trait::async_trait;

/// One stage of the processing chain
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Transform a batch; an error aborts the rest of the chain for this cycle
    async fn process(&self, batch: Batch) -> Result<Batch>;
}
