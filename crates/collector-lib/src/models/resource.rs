use super::metric::Metric;
use crate::error::{CollectorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque identity of a monitored entity
///
/// Keys are derived deterministically from resource coordinates and are only
/// ever compared or hashed, never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn pod_container(namespace: &str, pod: &str, container: &str) -> Self {
        Self(format!("namespace:{namespace}/pod:{pod}/container:{container}"))
    }

    pub fn pod(namespace: &str, pod: &str) -> Self {
        Self(format!("namespace:{namespace}/pod:{pod}"))
    }

    pub fn namespace(namespace: &str) -> Self {
        Self(format!("namespace:{namespace}"))
    }

    pub fn node(node: &str) -> Self {
        Self(format!("node:{node}"))
    }

    pub fn node_container(node: &str, container: &str) -> Self {
        Self(format!("node:{node}/container:{container}"))
    }

    pub fn cluster() -> Self {
        Self("cluster".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a value evolves between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing since the entity started
    Cumulative,
    /// Instantaneous reading
    Gauge,
    /// Change since the previous sample
    Delta,
}

/// Numeric payload of a metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Number::Int(_) => "int",
            Number::Float(_) => "float",
        }
    }
}

/// A single metric value with its kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub number: Number,
    pub kind: MetricKind,
}

impl Value {
    pub fn int_gauge(v: i64) -> Self {
        Self {
            number: Number::Int(v),
            kind: MetricKind::Gauge,
        }
    }

    pub fn float_gauge(v: f64) -> Self {
        Self {
            number: Number::Float(v),
            kind: MetricKind::Gauge,
        }
    }

    pub fn int_cumulative(v: i64) -> Self {
        Self {
            number: Number::Int(v),
            kind: MetricKind::Cumulative,
        }
    }

    pub fn float_cumulative(v: f64) -> Self {
        Self {
            number: Number::Float(v),
            kind: MetricKind::Cumulative,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.number.as_f64()
    }

    /// Add `other` into this value, rejecting mixed numeric types
    pub fn accumulate(&mut self, metric: &str, other: &Value) -> Result<()> {
        self.number = match (self.number, other.number) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a.saturating_add(b)),
            (Number::Float(a), Number::Float(b)) => Number::Float(a + b),
            (left, right) => {
                return Err(CollectorError::TypeMismatch {
                    metric: metric.to_string(),
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };
        Ok(())
    }
}

/// A value qualified by its own labels, e.g. one entry per disk device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledValue {
    pub labels: HashMap<String, String>,
    pub value: Value,
}

/// All metrics collected for one entity in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// When the entity's counters last started from zero
    pub collection_start_time: DateTime<Utc>,
    pub entity_create_time: DateTime<Utc>,
    pub scrape_time: DateTime<Utc>,
    pub values: HashMap<String, Value>,
    pub labeled_values: HashMap<String, Vec<LabeledValue>>,
    pub labels: HashMap<String, String>,
}

impl MetricSet {
    /// Create an empty set with all timestamps at `time`
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            collection_start_time: time,
            entity_create_time: time,
            scrape_time: time,
            values: HashMap::new(),
            labeled_values: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Value of the `type` label, empty when absent
    pub fn resource_type(&self) -> &str {
        self.label(super::names::labels::TYPE).unwrap_or("")
    }

    pub fn push_labeled(&mut self, name: impl Into<String>, value: LabeledValue) {
        self.labeled_values.entry(name.into()).or_default().push(value);
    }

    /// Labels in effect for `name`
    ///
    /// For a plain value this is the set's labels. For a labeled value the
    /// first instance's labels are layered over the set's labels. Returns
    /// `None` when the set carries no metric of that name.
    pub fn find_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        if self.values.contains_key(name) {
            return Some(self.labels.clone());
        }
        let first = self.labeled_values.get(name)?.first()?;
        let mut labels = self.labels.clone();
        labels.extend(first.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(labels)
    }

    /// Number of scalar and labeled values carried by this set
    pub fn len(&self) -> usize {
        self.values.len() + self.labeled_values.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One scrape cycle's worth of data
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub timestamp: DateTime<Utc>,
    pub sets: HashMap<ResourceKey, MetricSet>,
    /// Flat metrics that bypass the resource model
    pub metrics: Vec<Metric>,
}

impl Batch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            sets: HashMap::new(),
            metrics: Vec::new(),
        }
    }

    pub fn with_set(mut self, key: ResourceKey, set: MetricSet) -> Self {
        self.sets.insert(key, set);
        self
    }

    pub fn with_metric(mut self, metric: impl Into<Metric>) -> Self {
        self.metrics.push(metric.into());
        self
    }

    /// Fold another batch into this one; sets from `other` replace same-keyed sets
    pub fn merge(&mut self, other: Batch) {
        self.sets.extend(other.sets);
        self.metrics.extend(other.metrics);
    }

    /// Total number of values and flat metrics
    pub fn points(&self) -> usize {
        self.sets.values().map(MetricSet::len).sum::<usize>() + self.metrics.len()
    }
}
