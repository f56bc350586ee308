//! Container to pod roll-up

use super::Processor;
use crate::error::Result;
use crate::models::names::{self, labels, types};
use crate::models::{Batch, MetricKind, MetricSet, ResourceKey};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{error, info};

/// Sums container gauges into their pod
///
/// Values the pod already reports itself are left alone. Pods that only
/// appear through their containers get a synthesized set carrying the
/// containers' identifying labels.
pub struct PodAggregator {
    skipped: HashSet<String>,
}

impl Default for PodAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl PodAggregator {
    pub fn new() -> Self {
        Self {
            skipped: names::POD_AGGREGATION_SKIP
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn pod_set(container: &MetricSet) -> MetricSet {
        let mut pod = MetricSet::new(container.scrape_time);
        pod.collection_start_time = container.collection_start_time;
        pod.labels
            .insert(labels::TYPE.to_string(), types::POD.to_string());
        for key in labels::POD_IDENTITY {
            if let Some(v) = container.labels.get(*key) {
                pod.labels.insert(key.to_string(), v.clone());
            }
        }
        pod
    }
}

#[async_trait]
impl Processor for PodAggregator {
    fn name(&self) -> &str {
        "pod_aggregator"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        // (pod, metric) pairs this aggregator owns; anything else came from the source
        let mut aggregated: HashSet<(ResourceKey, String)> = HashSet::new();
        let mut updates: HashMap<ResourceKey, MetricSet> = HashMap::new();

        let containers = batch
            .sets
            .iter()
            .filter(|(_, set)| set.resource_type() == types::POD_CONTAINER);

        for (key, container) in containers {
            let (Some(pod_name), Some(namespace)) = (
                container.label(labels::POD_NAME),
                container.label(labels::NAMESPACE_NAME),
            ) else {
                error!(key = %key, labels = ?container.labels, "No namespace and/or pod info in container");
                continue;
            };

            let pod_key = ResourceKey::pod(namespace, pod_name);
            let pod = updates.entry(pod_key.clone()).or_insert_with(|| {
                batch.sets.get(&pod_key).cloned().unwrap_or_else(|| {
                    info!(pod = %pod_key, "Pod not found, adding");
                    Self::pod_set(container)
                })
            });

            for (metric, value) in &container.values {
                if self.skipped.contains(metric) || value.kind != MetricKind::Gauge {
                    continue;
                }
                let owned = (pod_key.clone(), metric.clone());
                match pod.values.get_mut(metric) {
                    None => {
                        pod.values.insert(metric.clone(), *value);
                        aggregated.insert(owned);
                    }
                    Some(existing) if aggregated.contains(&owned) => {
                        if let Err(e) = existing.accumulate(metric, value) {
                            error!(pod = %pod_key, error = %e, "Inconsistent type, skipping");
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        batch.sets.extend(updates);
        Ok(batch)
    }
}
