//! Namespace, node and cluster roll-ups
//!
//! Each aggregator walks the batch once per [`AggregationSpec`], summing the
//! configured metrics of matching children into a group set and counting the
//! children. A child that already carries the count metric contributes that
//! count; any other child counts as one.

use super::Processor;
use crate::error::Result;
use crate::models::names::{self, labels, types};
use crate::models::{Batch, MetricSet, Number, ResourceKey, Value};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::warn;

/// Resolves the group a child set rolls into
///
/// Returns the group key and the set to start from when the group is not in
/// the batch yet. `None` skips the child, as does a missing starting set for
/// a group absent from the batch.
pub type ExtractGroup = fn(&ResourceKey, &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)>;

/// One pass of an aggregator
#[derive(Clone)]
pub struct AggregationSpec {
    pub sum_metrics: Vec<String>,
    pub count_metric: Option<String>,
    /// Selects the child sets taking part in this pass
    pub predicate: fn(&MetricSet) -> bool,
    pub group: ExtractGroup,
}

/// Sum-and-count aggregator over one level of the resource hierarchy
pub struct SumCountAggregator {
    name: String,
    specs: Vec<AggregationSpec>,
}

impl SumCountAggregator {
    pub fn new(name: impl Into<String>, specs: Vec<AggregationSpec>) -> Self {
        Self {
            name: name.into(),
            specs,
        }
    }

    /// Pods and running containers into their namespace
    pub fn namespace(sum_metrics: Vec<String>) -> Self {
        Self::new("namespace_aggregator", Self::pod_specs(sum_metrics, namespace_group))
    }

    /// Pods and running containers into their node
    pub fn node(sum_metrics: Vec<String>) -> Self {
        Self::new("node_aggregator", Self::pod_specs(sum_metrics, node_group))
    }

    /// Namespace totals into the cluster
    pub fn cluster(sum_metrics: Vec<String>) -> Self {
        Self::new(
            "cluster_aggregator",
            vec![
                AggregationSpec {
                    sum_metrics,
                    count_metric: Some(names::POD_COUNT.to_string()),
                    predicate: is_namespace,
                    group: cluster_group,
                },
                AggregationSpec {
                    sum_metrics: Vec::new(),
                    count_metric: Some(names::POD_CONTAINER_COUNT.to_string()),
                    predicate: is_namespace,
                    group: cluster_group,
                },
            ],
        )
    }

    fn pod_specs(sum_metrics: Vec<String>, group: ExtractGroup) -> Vec<AggregationSpec> {
        vec![
            AggregationSpec {
                sum_metrics,
                count_metric: Some(names::POD_COUNT.to_string()),
                predicate: is_active_pod,
                group,
            },
            AggregationSpec {
                sum_metrics: Vec::new(),
                count_metric: Some(names::POD_CONTAINER_COUNT.to_string()),
                predicate: is_running_container,
                group,
            },
        ]
    }
}

/// By `namespace_name`, creating the namespace set when missing
fn namespace_group(key: &ResourceKey, child: &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)> {
    let Some(namespace) = child.label(labels::NAMESPACE_NAME) else {
        warn!(key = %key, "No namespace info, skipping");
        return None;
    };
    let fresh = MetricSet::new(child.scrape_time).with_labels([
        (labels::TYPE, types::NAMESPACE),
        (labels::NAMESPACE_NAME, namespace),
        (
            labels::NAMESPACE_ID,
            child.label(labels::NAMESPACE_ID).unwrap_or(""),
        ),
    ]);
    Some((ResourceKey::namespace(namespace), Some(fresh)))
}

/// By `nodename`; children of nodes missing from the batch are skipped
fn node_group(key: &ResourceKey, child: &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)> {
    match child.label(labels::NODENAME) {
        Some(node) if !node.is_empty() => Some((ResourceKey::node(node), None)),
        _ => {
            warn!(key = %key, "No node info, skipping");
            None
        }
    }
}

/// Everything rolls into the single cluster set
fn cluster_group(_: &ResourceKey, child: &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)> {
    let fresh = MetricSet::new(child.scrape_time).with_labels([(labels::TYPE, types::CLUSTER)]);
    Some((ResourceKey::cluster(), Some(fresh)))
}

fn is_namespace(set: &MetricSet) -> bool {
    set.resource_type() == types::NAMESPACE
}

/// Pods that have not finished still hold resources
fn is_active_pod(set: &MetricSet) -> bool {
    if set.resource_type() != types::POD {
        return false;
    }
    let phase = set
        .find_labels(names::POD_PHASE)
        .and_then(|l| l.get(labels::PHASE).cloned())
        .unwrap_or_default();
    phase != "Succeeded" && phase != "Failed"
}

fn is_running_container(set: &MetricSet) -> bool {
    if set.resource_type() != types::POD_CONTAINER {
        return false;
    }
    let state = set
        .find_labels(names::POD_CONTAINER_STATUS)
        .and_then(|l| l.get(labels::STATE).cloned())
        .unwrap_or_default();
    state != "terminated"
}

fn add_count(child: &MetricSet, group: &mut MetricSet, metric: &str) {
    let count = match child.values.get(metric).map(|v| v.number) {
        Some(Number::Int(n)) => n,
        Some(Number::Float(f)) => f as i64,
        None => 1,
    };
    match group.values.get_mut(metric) {
        Some(Value {
            number: Number::Int(n),
            ..
        }) => *n += count,
        _ => {
            group
                .values
                .insert(metric.to_string(), Value::int_gauge(count));
        }
    }
}

fn add_sums(child: &MetricSet, group: &mut MetricSet, metrics: &[String]) -> Result<()> {
    for metric in metrics {
        let Some(value) = child.values.get(metric) else {
            continue;
        };
        match group.values.get_mut(metric) {
            Some(existing) => existing.accumulate(metric, value)?,
            None => {
                group.values.insert(metric.clone(), *value);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Processor for SumCountAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        for spec in &self.specs {
            let mut staged: HashMap<ResourceKey, MetricSet> = HashMap::new();

            for (key, child) in batch.sets.iter().filter(|(_, set)| (spec.predicate)(set)) {
                let Some((group_key, fresh)) = (spec.group)(key, child) else {
                    continue;
                };
                let group = match staged.entry(group_key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => match batch.sets.get(entry.key()).cloned().or(fresh) {
                        Some(set) => entry.insert(set),
                        None => continue,
                    },
                };
                if let Some(count) = &spec.count_metric {
                    add_count(child, group, count);
                }
                add_sums(child, group, &spec.sum_metrics)?;
            }

            batch.sets.extend(staged);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LabeledValue;
    use chrono::Utc;

    fn pod(ns: &str, name: &str, node: &str, cpu: i64) -> MetricSet {
        MetricSet::new(Utc::now())
            .with_labels([
                (labels::TYPE, types::POD),
                (labels::NAMESPACE_NAME, ns),
                (labels::NAMESPACE_ID, "ns-uid"),
                (labels::POD_NAME, name),
                (labels::NODENAME, node),
            ])
            .with_value(names::CPU_REQUEST, Value::int_gauge(cpu))
    }

    fn container(ns: &str, pod: &str, node: &str, state: &str) -> MetricSet {
        let mut set = MetricSet::new(Utc::now()).with_labels([
            (labels::TYPE, types::POD_CONTAINER),
            (labels::NAMESPACE_NAME, ns),
            (labels::POD_NAME, pod),
            (labels::NODENAME, node),
        ]);
        set.push_labeled(
            names::POD_CONTAINER_STATUS,
            LabeledValue {
                labels: HashMap::from([(labels::STATE.to_string(), state.to_string())]),
                value: Value::int_gauge(1),
            },
        );
        set
    }

    fn sums() -> Vec<String> {
        vec![names::CPU_REQUEST.to_string()]
    }

    fn int(set: &MetricSet, metric: &str) -> i64 {
        match set.values[metric].number {
            Number::Int(n) => n,
            other => panic!("expected int, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_namespace_sums_and_counts() {
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns1", "b"), pod("ns1", "b", "n1", 100))
            .with_set(ResourceKey::pod("ns2", "c"), pod("ns2", "c", "n1", 7))
            .with_set(
                ResourceKey::pod_container("ns1", "a", "x"),
                container("ns1", "a", "n1", "running"),
            )
            .with_set(
                ResourceKey::pod_container("ns1", "a", "y"),
                container("ns1", "a", "n1", "terminated"),
            );

        let out = SumCountAggregator::namespace(sums())
            .process(batch)
            .await
            .unwrap();

        let ns1 = &out.sets[&ResourceKey::namespace("ns1")];
        assert_eq!(int(ns1, names::CPU_REQUEST), 110);
        assert_eq!(int(ns1, names::POD_COUNT), 2);
        assert_eq!(int(ns1, names::POD_CONTAINER_COUNT), 1);
        assert_eq!(ns1.label(labels::TYPE), Some(types::NAMESPACE));
        assert_eq!(ns1.label(labels::NAMESPACE_ID), Some("ns-uid"));

        let ns2 = &out.sets[&ResourceKey::namespace("ns2")];
        assert_eq!(int(ns2, names::CPU_REQUEST), 7);
        assert_eq!(int(ns2, names::POD_COUNT), 1);
    }

    #[tokio::test]
    async fn test_finished_pods_are_not_counted() {
        let mut done = pod("ns1", "done", "n1", 50);
        done.push_labeled(
            names::POD_PHASE,
            LabeledValue {
                labels: HashMap::from([(labels::PHASE.to_string(), "Succeeded".to_string())]),
                value: Value::int_gauge(1),
            },
        );
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns1", "done"), done);

        let out = SumCountAggregator::namespace(sums())
            .process(batch)
            .await
            .unwrap();
        let ns1 = &out.sets[&ResourceKey::namespace("ns1")];
        assert_eq!(int(ns1, names::POD_COUNT), 1);
        assert_eq!(int(ns1, names::CPU_REQUEST), 10);
    }

    #[tokio::test]
    async fn test_node_requires_existing_node_set() {
        let node = MetricSet::new(Utc::now()).with_labels([
            (labels::TYPE, types::NODE),
            (labels::NODENAME, "n1"),
        ]);
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::node("n1"), node)
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns1", "b"), pod("ns1", "b", "n1", 5))
            .with_set(ResourceKey::pod("ns1", "c"), pod("ns1", "c", "ghost", 1));

        let out = SumCountAggregator::node(sums()).process(batch).await.unwrap();
        let n1 = &out.sets[&ResourceKey::node("n1")];
        assert_eq!(int(n1, names::CPU_REQUEST), 15);
        assert_eq!(int(n1, names::POD_COUNT), 2);
        assert!(!out.sets.contains_key(&ResourceKey::node("ghost")));
    }

    #[tokio::test]
    async fn test_cluster_uses_namespace_counts() {
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns1", "b"), pod("ns1", "b", "n1", 100))
            .with_set(ResourceKey::pod("ns2", "c"), pod("ns2", "c", "n1", 7));

        let batch = SumCountAggregator::namespace(sums())
            .process(batch)
            .await
            .unwrap();
        let out = SumCountAggregator::cluster(sums())
            .process(batch)
            .await
            .unwrap();

        let cluster = &out.sets[&ResourceKey::cluster()];
        assert_eq!(cluster.label(labels::TYPE), Some(types::CLUSTER));
        assert_eq!(int(cluster, names::CPU_REQUEST), 117);
        assert_eq!(int(cluster, names::POD_COUNT), 3);
        assert_eq!(int(cluster, names::POD_CONTAINER_COUNT), 2);
    }

    #[tokio::test]
    async fn test_pod_without_namespace_is_skipped() {
        let orphan = MetricSet::new(Utc::now())
            .with_labels([(labels::TYPE, types::POD)])
            .with_value(names::CPU_REQUEST, Value::int_gauge(3));
        let batch = Batch::new(Utc::now()).with_set(ResourceKey::pod("?", "?"), orphan);

        let out = SumCountAggregator::namespace(sums())
            .process(batch)
            .await
            .unwrap();
        assert_eq!(out.sets.len(), 1);
    }

    fn node_with_fresh_set(_: &ResourceKey, child: &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)> {
        let node = child.label(labels::NODENAME)?;
        let fresh = MetricSet::new(child.scrape_time)
            .with_labels([(labels::TYPE, types::NODE), (labels::NODENAME, node)]);
        Some((ResourceKey::node(node), Some(fresh)))
    }

    fn no_group(_: &ResourceKey, _: &MetricSet) -> Option<(ResourceKey, Option<MetricSet>)> {
        None
    }

    fn any_pod(set: &MetricSet) -> bool {
        set.resource_type() == types::POD
    }

    #[tokio::test]
    async fn test_custom_specs_and_name() {
        let aggregator = SumCountAggregator::new(
            "node_rollup",
            vec![AggregationSpec {
                sum_metrics: sums(),
                count_metric: Some(names::POD_COUNT.to_string()),
                predicate: any_pod,
                group: node_with_fresh_set,
            }],
        );
        assert_eq!(aggregator.name(), "node_rollup");

        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns2", "b"), pod("ns2", "b", "n1", 5))
            .with_set(ResourceKey::pod("ns1", "c"), pod("ns1", "c", "n2", 1));

        let out = aggregator.process(batch).await.unwrap();
        let n1 = &out.sets[&ResourceKey::node("n1")];
        assert_eq!(n1.label(labels::TYPE), Some(types::NODE));
        assert_eq!(int(n1, names::CPU_REQUEST), 15);
        assert_eq!(int(n1, names::POD_COUNT), 2);
        assert_eq!(int(&out.sets[&ResourceKey::node("n2")], names::POD_COUNT), 1);
    }

    #[tokio::test]
    async fn test_unextractable_group_adds_no_set() {
        let aggregator = SumCountAggregator::new(
            "nowhere",
            vec![AggregationSpec {
                sum_metrics: sums(),
                count_metric: Some(names::POD_COUNT.to_string()),
                predicate: any_pod,
                group: no_group,
            }],
        );
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10));

        let out = aggregator.process(batch.clone()).await.unwrap();
        assert_eq!(out.sets, batch.sets);
    }

    #[tokio::test]
    async fn test_sum_type_mismatch_is_an_error() {
        let mut odd = pod("ns1", "b", "n1", 0);
        odd.values
            .insert(names::CPU_REQUEST.to_string(), Value::float_gauge(0.5));
        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("ns1", "a"), pod("ns1", "a", "n1", 10))
            .with_set(ResourceKey::pod("ns1", "b"), odd);

        let result = SumCountAggregator::namespace(sums()).process(batch).await;
        assert!(matches!(
            result,
            Err(crate::error::CollectorError::TypeMismatch { .. })
        ));
    }
}
