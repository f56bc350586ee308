//! Flattens resource sets into points

use super::Processor;
use crate::error::Result;
use crate::filter::{FilterConfig, GlobFilter};
use crate::models::names::{labels, types};
use crate::models::{Batch, Metric, MetricSet, Point};
use crate::observability::CollectorMetrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Container names under this cgroup slice are system subcontainers
const SYS_SUBCONTAINER: &str = "system.slice/";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointConverterConfig {
    pub prefix: String,
    pub cluster_name: String,
    /// Source for every point when the collector runs per node
    pub node_name: Option<String>,
    pub filters: FilterConfig,
}

impl Default for PointConverterConfig {
    fn default() -> Self {
        Self {
            prefix: "kubernetes.".to_string(),
            cluster_name: "k8s-cluster".to_string(),
            node_name: None,
            filters: FilterConfig::default(),
        }
    }
}

/// Last stage of the chain: turns every set into flat points
pub struct PointConverter {
    prefix: String,
    cluster_name: String,
    node_name: Option<String>,
    filter: Option<GlobFilter>,
    metrics: CollectorMetrics,
}

impl PointConverter {
    pub fn new(config: &PointConverterConfig, metrics: CollectorMetrics) -> Result<Self> {
        let cluster_name = match config.cluster_name.trim() {
            "" => "k8s-cluster".to_string(),
            name => name.to_string(),
        };
        Ok(Self {
            prefix: config.prefix.clone(),
            cluster_name,
            node_name: config.node_name.clone().filter(|n| !n.is_empty()),
            filter: GlobFilter::from_config(&config.filters)?,
            metrics,
        })
    }

    fn metric_name(&self, kind: &str, metric: &str) -> String {
        format!("{}{}.{}", self.prefix, kind, metric.replace('/', "."))
    }

    /// Set labels as tags, expanding `labels` into `label.<key>` tags
    fn tags(set: &MetricSet) -> HashMap<String, String> {
        let mut tags = HashMap::with_capacity(set.labels.len());
        for (name, value) in &set.labels {
            if name == labels::LABELS {
                for pair in value.split(',') {
                    if let Some((k, v)) = pair.split_once(':') {
                        tags.insert(format!("label.{k}"), v.to_string());
                    }
                }
            } else {
                tags.insert(name.clone(), value.clone());
            }
        }
        tags
    }

    fn source(&self, kind: &str, tags: &HashMap<String, String>) -> String {
        if let Some(node) = &self.node_name {
            return node.clone();
        }
        let tag = |key: &str| tags.get(key).cloned().unwrap_or_default();
        match kind {
            types::CLUSTER => self.cluster_name.clone(),
            types::NAMESPACE => format!("{}-ns", tag(labels::NAMESPACE_NAME)),
            _ => tag(labels::HOSTNAME),
        }
    }

    /// Returns false when the point was filtered out
    fn keep(&self, point: &mut Point) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        if filter.matches(&point.name, &mut point.tags) {
            return true;
        }
        trace!(name = %point.name, "Dropping metric");
        false
    }

    fn convert(&self, set: &MetricSet, timestamp: i64, out: &mut Vec<Metric>) -> (u64, u64) {
        let tags = Self::tags(set);
        let kind = set.resource_type();
        let source = self.source(kind, &tags);
        let (mut collected, mut filtered) = (0, 0);

        let scalars = set.values.iter().map(|(name, value)| (name, value, None));
        let labeled = set
            .labeled_values
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |lv| (name, &lv.value, Some(&lv.labels))));

        for (name, value, extra) in scalars.chain(labeled) {
            let mut point_tags = extra.cloned().unwrap_or_default();
            point_tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));

            let mut point = Point::new(
                self.metric_name(kind, name),
                value.as_f64(),
                timestamp,
                source.clone(),
            )
            .with_tags(point_tags);

            collected += 1;
            if self.keep(&mut point) {
                out.push(point.into());
            } else {
                filtered += 1;
            }
        }
        (collected, filtered)
    }
}

#[async_trait]
impl Processor for PointConverter {
    fn name(&self) -> &str {
        "point_converter"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        if batch.sets.is_empty() {
            return Ok(batch);
        }
        debug!(total = batch.sets.len(), "Processing metric sets");

        let timestamp = batch.timestamp.timestamp();
        let mut out = Vec::with_capacity(batch.points());
        let (mut collected, mut filtered) = (0, 0);

        for set in batch.sets.values() {
            let subcontainer = set
                .label(labels::CONTAINER_NAME)
                .is_some_and(|c| c.contains(SYS_SUBCONTAINER));
            if subcontainer {
                continue;
            }
            let (c, f) = self.convert(set, timestamp, &mut out);
            collected += c;
            filtered += f;
        }

        self.metrics.add_converter_collected(collected);
        self.metrics.add_converter_filtered(filtered);

        batch.sets.clear();
        batch.metrics.extend(out);
        Ok(batch)
    }
}
