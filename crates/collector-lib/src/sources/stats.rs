//! Reports the collector's own metrics as points
//!
//! Gathers the pipeline's Prometheus registry once per scrape and turns each
//! sample into a flat point named `<prefix>collector.<name>`, with `_`
//! replaced by `.` and the registry namespace stripped.

use super::{Source, SourceProvider};
use crate::filter::{FilterConfig, GlobFilter};
use crate::models::{Batch, Point};
use crate::observability::{CollectorMetrics, METRIC_NAMESPACE};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use prometheus::proto::{MetricFamily, MetricType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Name suffixes whose samples are not reported while they are zero
const ZERO_SUPPRESSED_SUFFIXES: &[&str] = &[
    "errors.total",
    "timeouts.total",
    "filtered.total",
    "skipped.total",
    "distributions.total",
];

/// Settings for the internal stats source
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Prepended to every point name (default: `kubernetes.`)
    pub prefix: String,
    /// Added to every point unless already present
    pub tags: HashMap<String, String>,
    pub filters: FilterConfig,
    /// Point source, usually the node name
    pub source: String,
    pub collection_interval: Duration,
    pub timeout: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            prefix: "kubernetes.".to_string(),
            tags: HashMap::new(),
            filters: FilterConfig::default(),
            source: "metrics-collector".to_string(),
            collection_interval: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }
}

/// Source reading the pipeline's own registry
pub struct StatsSource {
    metrics: CollectorMetrics,
    prefix: String,
    tags: HashMap<String, String>,
    filter: Option<GlobFilter>,
    source: String,
}

impl StatsSource {
    pub fn new(config: &StatsConfig, metrics: CollectorMetrics) -> crate::error::Result<Self> {
        Ok(Self {
            metrics,
            prefix: config.prefix.clone(),
            tags: config.tags.clone(),
            filter: GlobFilter::from_config(&config.filters)?,
            source: config.source.clone(),
        })
    }

    fn point_name(&self, family: &str, suffix: Option<&str>) -> String {
        let bare = family
            .strip_prefix(METRIC_NAMESPACE)
            .and_then(|s| s.strip_prefix('_'))
            .unwrap_or(family);
        let mut name = format!("{}collector.{}", self.prefix, bare.replace('_', "."));
        if let Some(s) = suffix {
            name.push('.');
            name.push_str(s);
        }
        name
    }

    fn family_points(&self, family: &MetricFamily, timestamp: i64, out: &mut Vec<Point>) {
        for metric in family.get_metric() {
            let labels: HashMap<String, String> = metric
                .get_label()
                .iter()
                .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                .collect();

            let samples: Vec<(Option<&str>, f64)> = match family.get_field_type() {
                MetricType::COUNTER => vec![(None, metric.get_counter().get_value())],
                MetricType::GAUGE => vec![(None, metric.get_gauge().get_value())],
                MetricType::HISTOGRAM => {
                    let h = metric.get_histogram();
                    let count = h.get_sample_count();
                    let mut v = vec![(Some("count"), count as f64), (Some("sum"), h.get_sample_sum())];
                    if count > 0 {
                        v.push((Some("mean"), h.get_sample_sum() / count as f64));
                    }
                    v
                }
                _ => continue,
            };

            for (suffix, value) in samples {
                let name = self.point_name(family.get_name(), suffix);
                if value == 0.0 && ZERO_SUPPRESSED_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                    continue;
                }
                let mut point = Point::new(name, value, timestamp, self.source.as_str())
                    .with_tags(labels.clone());
                point.add_tags(&self.tags);

                if let Some(filter) = &self.filter {
                    if !filter.matches(&point.name, &mut point.tags) {
                        trace!(name = %point.name, "Dropping internal metric");
                        continue;
                    }
                }
                out.push(point);
            }
        }
    }
}

#[async_trait]
impl Source for StatsSource {
    fn name(&self) -> &str {
        "internal_stats_source"
    }

    async fn scrape(&self) -> Result<Batch> {
        let now = Utc::now();
        let mut points = Vec::new();
        for family in self.metrics.registry().gather() {
            self.family_points(&family, now.timestamp(), &mut points);
        }

        let mut batch = Batch::new(now);
        batch.metrics.extend(points.into_iter().map(Into::into));
        Ok(batch)
    }
}

/// Provider exposing the single [`StatsSource`]
pub struct StatsProvider {
    source: Arc<StatsSource>,
    interval: Duration,
    timeout: Duration,
}

impl StatsProvider {
    pub fn new(config: &StatsConfig, metrics: CollectorMetrics) -> crate::error::Result<Self> {
        Ok(Self {
            source: Arc::new(StatsSource::new(config, metrics)?),
            interval: config.collection_interval,
            timeout: config.timeout,
        })
    }
}

impl SourceProvider for StatsProvider {
    fn name(&self) -> &str {
        "internal_stats_provider"
    }

    fn sources(&self) -> Vec<Arc<dyn Source>> {
        let source: Arc<dyn Source> = self.source.clone();
        vec![source]
    }

    fn collection_interval(&self) -> Duration {
        self.interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
