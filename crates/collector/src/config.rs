//! Collector configuration

use anyhow::{bail, Result};
use collector_lib::filter::FilterConfig;
use collector_lib::models::names;
use collector_lib::sinks::PointSinkConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "COLLECTOR_CONFIG_FILE";

/// Shortest resolution the scheduler accepts
pub const MIN_RESOLUTION_SECS: u64 = 5;

/// Collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Value of the `cluster` tag on every exported metric
    #[serde(default = "default_cluster_name", alias = "clusterName")]
    pub cluster_name: String,

    /// Node name from Kubernetes downward API, set when running per node
    #[serde(default = "default_node_name", alias = "nodeName")]
    pub node_name: Option<String>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port", alias = "apiPort")]
    pub api_port: u16,

    /// Cycle length in seconds
    #[serde(default = "default_resolution", alias = "resolutionSecs")]
    pub resolution_secs: u64,

    /// Delay after each cycle boundary in seconds
    #[serde(default, alias = "scrapeOffsetSecs")]
    pub scrape_offset_secs: u64,

    #[serde(default = "default_export_timeout", alias = "exportTimeoutSecs")]
    pub export_timeout_secs: u64,

    #[serde(default = "default_sink_stop_timeout", alias = "sinkStopTimeoutSecs")]
    pub sink_stop_timeout_secs: u64,

    #[serde(default = "default_max_parallelism", alias = "maxParallelism")]
    pub max_parallelism: usize,

    /// Interval for sources that do not set their own
    #[serde(default = "default_resolution", alias = "defaultCollectionIntervalSecs")]
    pub default_collection_interval_secs: u64,

    #[serde(default)]
    pub stats: StatsSettings,

    #[serde(default, alias = "pointConverter")]
    pub point_converter: ConverterSettings,

    #[serde(default)]
    pub aggregation: AggregationSettings,

    /// Namespace name -> uid used to tag namespace-scoped sets
    #[serde(default)]
    pub namespaces: HashMap<String, String>,

    #[serde(default)]
    pub sinks: Vec<SinkSettings>,
}

/// Internal stats source settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    pub enabled: bool,
    pub prefix: String,
    pub tags: HashMap<String, String>,
    pub filters: FilterConfig,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "kubernetes.".to_string(),
            tags: HashMap::new(),
            filters: FilterConfig::default(),
        }
    }
}

/// Point converter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConverterSettings {
    pub prefix: String,
    pub filters: FilterConfig,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            prefix: "kubernetes.".to_string(),
            filters: FilterConfig::default(),
        }
    }
}

/// Metrics summed by the namespace, node and cluster aggregators
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    #[serde(alias = "namespaceMetrics")]
    pub namespace_metrics: Vec<String>,
    #[serde(alias = "nodeMetrics")]
    pub node_metrics: Vec<String>,
    #[serde(alias = "clusterMetrics")]
    pub cluster_metrics: Vec<String>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            namespace_metrics: owned(names::NAMESPACE_SUM_METRICS),
            node_metrics: owned(names::NODE_SUM_METRICS),
            cluster_metrics: owned(names::NAMESPACE_SUM_METRICS),
        }
    }
}

/// Where a sink's lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Line protocol written to the log
    #[default]
    Log,
}

/// One configured sink
#[derive(Debug, Clone, Deserialize)]
pub struct SinkSettings {
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default = "default_error_log_percent", alias = "errorLogPercent")]
    pub error_log_percent: f32,
    #[serde(default)]
    pub transport: TransportKind,
}

impl SinkSettings {
    /// Point sink settings tagged with the collector's cluster name
    pub fn point_sink(&self, cluster_name: &str) -> PointSinkConfig {
        PointSinkConfig {
            name: self.name.clone(),
            cluster_name: cluster_name.to_string(),
            prefix: self.prefix.clone(),
            tags: self.tags.clone(),
            filters: self.filters.clone(),
            error_log_percent: self.error_log_percent,
        }
    }
}

fn default_cluster_name() -> String {
    "k8s-cluster".to_string()
}

fn default_node_name() -> Option<String> {
    std::env::var("NODE_NAME").ok().filter(|n| !n.is_empty())
}

fn default_api_port() -> u16 {
    8080
}

fn default_resolution() -> u64 {
    60
}

fn default_export_timeout() -> u64 {
    20
}

fn default_sink_stop_timeout() -> u64 {
    60
}

fn default_max_parallelism() -> usize {
    3
}

fn default_error_log_percent() -> f32 {
    0.01
}

impl CollectorConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Environment variables use the `COLLECTOR_` prefix and `__` to reach
    /// nested keys, e.g. `COLLECTOR_STATS__ENABLED=false`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("COLLECTOR").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sinks.is_empty() {
            bail!("No available sink to use");
        }
        if self.resolution_secs < MIN_RESOLUTION_SECS {
            bail!(
                "Resolution of {}s is below the minimum of {}s",
                self.resolution_secs,
                MIN_RESOLUTION_SECS
            );
        }
        Ok(())
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_secs(self.resolution_secs)
    }

    pub fn scrape_offset(&self) -> Duration {
        Duration::from_secs(self.scrape_offset_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn sink_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_stop_timeout_secs)
    }

    pub fn default_collection_interval(&self) -> Duration {
        Duration::from_secs(self.default_collection_interval_secs)
    }
}
