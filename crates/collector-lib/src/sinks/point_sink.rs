//! Sink for flat points and distributions

use super::{Sink, Transport};
use crate::error::Result;
use crate::filter::{FilterConfig, GlobFilter};
use crate::models::names::labels;
use crate::models::{Batch, Metric};
use crate::observability::CollectorMetrics;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Most tags a point may carry besides its source
pub const MAX_TAGS: usize = 19;

/// Tags that identify objects too finely to be worth sending
const EXCLUDED_TAGS: &[&str] = &[
    labels::NAMESPACE_ID,
    labels::HOST_ID,
    labels::POD_ID,
    labels::HOSTNAME,
];

/// Values shorter than this are never treated as duplicates
const MIN_DEDUPE_VALUE_LEN: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointSinkConfig {
    pub name: String,
    pub cluster_name: String,
    /// Prepended to every metric name, separated by a dot
    pub prefix: String,
    /// Added to metrics that do not already carry the key
    pub tags: HashMap<String, String>,
    pub filters: FilterConfig,
    /// Share of send errors logged when debug logging is off
    pub error_log_percent: f32,
}

impl Default for PointSinkConfig {
    fn default() -> Self {
        Self {
            name: "point_sink".to_string(),
            cluster_name: "k8s-cluster".to_string(),
            prefix: String::new(),
            tags: HashMap::new(),
            filters: FilterConfig::default(),
            error_log_percent: 0.01,
        }
    }
}

/// Prepares metrics for a backend and forwards them through a [`Transport`]
pub struct PointSink {
    name: String,
    cluster_name: String,
    prefix: String,
    global_tags: HashMap<String, String>,
    filter: Option<GlobFilter>,
    error_log_percent: f32,
    transport: Arc<dyn Transport>,
    metrics: CollectorMetrics,
}

impl PointSink {
    pub fn new(config: &PointSinkConfig, transport: Arc<dyn Transport>, metrics: CollectorMetrics) -> Result<Self> {
        let error_log_percent = if config.error_log_percent > 0.0 && config.error_log_percent <= 1.0 {
            config.error_log_percent
        } else {
            0.01
        };
        Ok(Self {
            name: config.name.clone(),
            cluster_name: config.cluster_name.clone(),
            prefix: config.prefix.trim_matches('.').to_string(),
            global_tags: config.tags.clone(),
            filter: GlobFilter::from_config(&config.filters)?,
            error_log_percent,
            transport,
            metrics,
        })
    }

    fn metric_name(&self, name: &str) -> String {
        let name = name.replace('+', "-");
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn log_send_error(&self, name: &str, error: &anyhow::Error) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            error!(sink = %self.name, name = %name, error = %error, "Error sending metric");
        } else if rand::thread_rng().gen::<f32>() <= self.error_log_percent {
            error!(sink = %self.name, name = %name, error = %error, "[sampled error] Error sending metric");
        }
    }

    /// Returns true once the metric went out
    async fn send(&self, mut metric: Metric) -> Option<bool> {
        metric.override_tag(labels::CLUSTER, &self.cluster_name);
        metric.add_tags(&self.global_tags);

        if let Some(filter) = &self.filter {
            let name = metric.name().to_string();
            if !filter.matches(&name, metric.tags_mut()) {
                return None;
            }
        }

        let name = self.metric_name(metric.name());
        metric.set_name(name);
        let removed = clean_tags(metric.tags_mut(), MAX_TAGS);
        if !removed.is_empty() {
            debug!(name = %metric.name(), removed = ?removed, "Removed tags");
        }

        let result = match &metric {
            Metric::Point(p) => self.transport.send_point(p).await,
            Metric::Distribution(d) => self.transport.send_distribution(d).await,
        };
        match result {
            Ok(()) => Some(true),
            Err(e) => {
                self.log_send_error(metric.name(), &e);
                Some(false)
            }
        }
    }
}

#[async_trait]
impl Sink for PointSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: Arc<Batch>) {
        debug!(sink = %self.name, points = batch.metrics.len(), "Received metric points");

        let (mut sent, mut errors, mut filtered) = (0u64, 0u64, 0u64);
        for metric in &batch.metrics {
            match self.send(metric.clone()).await {
                Some(true) => sent += 1,
                Some(false) => errors += 1,
                None => filtered += 1,
            }
        }

        self.metrics.add_sink_sent(&self.name, sent);
        self.metrics.add_sink_errors(&self.name, errors);
        self.metrics.add_sink_filtered(&self.name, filtered);
        if errors > 0 {
            warn!(sink = %self.name, count = errors, "Error sending one or more points");
        }
    }

    async fn stop(&self) {
        if let Err(e) = self.transport.close().await {
            warn!(sink = %self.name, error = %e, "Failed to close transport");
        }
    }
}

/// Strip tags a backend should not receive
///
/// Empty and excluded tags always go. When more than `max` remain, tags
/// repeating another tag's value are dropped (the shorter name wins), then
/// tags whose value is just `-` or `/`. Returns the removed tag names.
pub fn clean_tags(tags: &mut HashMap<String, String>, max: usize) -> Vec<String> {
    let mut removed = Vec::new();
    let mut drop_where = |tags: &mut HashMap<String, String>, pred: &dyn Fn(&str, &str) -> bool| {
        let names: Vec<String> = tags
            .iter()
            .filter(|(k, v)| pred(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for name in names {
            tags.remove(&name);
            removed.push(name);
        }
    };

    drop_where(tags, &|_, v| v.is_empty());
    drop_where(tags, &|k, _| EXCLUDED_TAGS.contains(&k));

    if tags.len() > max {
        let mut winners: HashMap<String, String> = HashMap::new();
        for (name, value) in tags.iter().filter(|(_, v)| v.len() >= MIN_DEDUPE_VALUE_LEN) {
            let winner = winners.entry(value.clone()).or_insert_with(|| name.clone());
            if (name.len(), name.as_str()) < (winner.len(), winner.as_str()) {
                *winner = name.clone();
            }
        }
        drop_where(tags, &|k, v| winners.get(v).is_some_and(|w| w != k));
        drop_where(tags, &|_, v| v == "-" || v == "/");
    }

    removed
}
