//! Core data models for the collection pipeline
//!
//! - [`ResourceKey`] identifies an entity (container, pod, namespace, node, cluster)
//! - [`MetricSet`] holds the values scraped for one entity in one cycle
//! - [`Batch`] is the unit flowing from sources through processors to sinks
//! - [`Point`] and [`Distribution`] are the flat metrics sinks consume

mod metric;
pub mod names;
mod resource;

pub use metric::{Centroid, Distribution, Metric, Point};
pub use resource::{Batch, LabeledValue, MetricKind, MetricSet, Number, ResourceKey, Value};
