//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics describing the pipeline itself (scrapes, cycles, sinks)
//! - Structured JSON logging of lifecycle events with tracing
//!
//! The metrics live in a registry owned by [`CollectorMetrics`] rather than
//! the process-global default, so independent pipelines (and tests) never
//! collide on registration.

use crate::error::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Namespace prepended to every internal metric name
pub const METRIC_NAMESPACE: &str = "collector";

/// Histogram buckets for scrape and cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

struct Inner {
    registry: Registry,
    scrape_latency_seconds: HistogramVec,
    scrape_errors: IntCounterVec,
    scrape_timeouts: IntCounterVec,
    providers: IntGauge,
    sources: IntGauge,
    cycles: IntCounter,
    cycles_skipped: IntCounter,
    cycle_duration_seconds: Histogram,
    processor_errors: IntCounterVec,
    duplicate_distributions: IntCounterVec,
    converter_points_collected: IntCounter,
    converter_points_filtered: IntCounter,
    sink_timeouts: IntCounterVec,
    sink_points_sent: IntCounterVec,
    sink_points_errors: IntCounterVec,
    sink_points_filtered: IntCounterVec,
}

/// Internal pipeline metrics
///
/// Cheap to clone; clones share the same counters and registry.
#[derive(Clone)]
pub struct CollectorMetrics {
    inner: Arc<Inner>,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(METRIC_NAMESPACE)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::with_opts(opts(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, label: &str) -> Result<IntCounterVec> {
    let c = IntCounterVec::new(opts(name, help), &[label])?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let g = IntGauge::with_opts(opts(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl CollectorMetrics {
    /// Create and register all pipeline metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let scrape_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "source_scrape_latency_seconds",
                "Time spent scraping a single source",
            )
            .namespace(METRIC_NAMESPACE)
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider"],
        )?;
        registry.register(Box::new(scrape_latency_seconds.clone()))?;

        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_cycle_duration_seconds",
                "Time spent processing and exporting one cycle",
            )
            .namespace(METRIC_NAMESPACE)
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let inner = Inner {
            scrape_errors: counter_vec(
                &registry,
                "source_scrape_errors_total",
                "Scrapes that returned an error",
                "provider",
            )?,
            scrape_timeouts: counter_vec(
                &registry,
                "source_scrape_timeouts_total",
                "Scrapes dropped for exceeding their timeout",
                "provider",
            )?,
            providers: gauge(&registry, "source_providers", "Registered source providers")?,
            sources: gauge(&registry, "source_sources", "Sources across all providers")?,
            cycles: counter(&registry, "pipeline_cycles_total", "Cycles run to completion")?,
            cycles_skipped: counter(
                &registry,
                "pipeline_cycles_skipped_total",
                "Cycles skipped because too many were in flight",
            )?,
            processor_errors: counter_vec(
                &registry,
                "pipeline_processor_errors_total",
                "Cycles aborted by a processor error",
                "processor",
            )?,
            duplicate_distributions: counter_vec(
                &registry,
                "processor_duplicate_distributions_total",
                "Distributions seen more than once in a batch",
                "metric",
            )?,
            converter_points_collected: counter(
                &registry,
                "converter_points_collected_total",
                "Points produced by the point converter",
            )?,
            converter_points_filtered: counter(
                &registry,
                "converter_points_filtered_total",
                "Points dropped by the point converter filter",
            )?,
            sink_timeouts: counter_vec(
                &registry,
                "sink_timeouts_total",
                "Batches a sink missed because it was still busy",
                "sink",
            )?,
            sink_points_sent: counter_vec(
                &registry,
                "sink_points_sent_total",
                "Points handed to the sink transport",
                "sink",
            )?,
            sink_points_errors: counter_vec(
                &registry,
                "sink_points_errors_total",
                "Points the sink transport rejected",
                "sink",
            )?,
            sink_points_filtered: counter_vec(
                &registry,
                "sink_points_filtered_total",
                "Points dropped by the sink filter",
                "sink",
            )?,
            scrape_latency_seconds,
            cycle_duration_seconds,
            registry,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Registry holding every pipeline metric
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn observe_scrape_latency(&self, provider: &str, elapsed: Duration) {
        self.inner
            .scrape_latency_seconds
            .with_label_values(&[provider])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_scrape_errors(&self, provider: &str) {
        self.inner.scrape_errors.with_label_values(&[provider]).inc();
    }

    pub fn inc_scrape_timeouts(&self, provider: &str) {
        self.inner.scrape_timeouts.with_label_values(&[provider]).inc();
    }

    pub fn scrape_timeouts(&self, provider: &str) -> u64 {
        self.inner.scrape_timeouts.with_label_values(&[provider]).get()
    }

    pub fn scrape_errors(&self, provider: &str) -> u64 {
        self.inner.scrape_errors.with_label_values(&[provider]).get()
    }

    pub fn set_provider_counts(&self, providers: usize, sources: usize) {
        self.inner.providers.set(providers as i64);
        self.inner.sources.set(sources as i64);
    }

    pub fn inc_cycles(&self) {
        self.inner.cycles.inc();
    }

    pub fn cycles(&self) -> u64 {
        self.inner.cycles.get()
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner.cycles_skipped.inc();
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.inner.cycles_skipped.get()
    }

    pub fn observe_cycle_duration(&self, elapsed: Duration) {
        self.inner.cycle_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn inc_processor_errors(&self, processor: &str) {
        self.inner
            .processor_errors
            .with_label_values(&[processor])
            .inc();
    }

    pub fn processor_errors(&self, processor: &str) -> u64 {
        self.inner
            .processor_errors
            .with_label_values(&[processor])
            .get()
    }

    pub fn inc_duplicate_distributions(&self, metric: &str) {
        self.inner
            .duplicate_distributions
            .with_label_values(&[metric])
            .inc();
    }

    pub fn duplicate_distributions(&self, metric: &str) -> u64 {
        self.inner
            .duplicate_distributions
            .with_label_values(&[metric])
            .get()
    }

    pub fn add_converter_collected(&self, n: u64) {
        self.inner.converter_points_collected.inc_by(n);
    }

    pub fn add_converter_filtered(&self, n: u64) {
        self.inner.converter_points_filtered.inc_by(n);
    }

    pub fn converter_filtered(&self) -> u64 {
        self.inner.converter_points_filtered.get()
    }

    pub fn inc_sink_timeouts(&self, sink: &str) {
        self.inner.sink_timeouts.with_label_values(&[sink]).inc();
    }

    pub fn sink_timeouts(&self, sink: &str) -> u64 {
        self.inner.sink_timeouts.with_label_values(&[sink]).get()
    }

    pub fn add_sink_sent(&self, sink: &str, n: u64) {
        self.inner.sink_points_sent.with_label_values(&[sink]).inc_by(n);
    }

    pub fn sink_sent(&self, sink: &str) -> u64 {
        self.inner.sink_points_sent.with_label_values(&[sink]).get()
    }

    pub fn add_sink_errors(&self, sink: &str, n: u64) {
        self.inner.sink_points_errors.with_label_values(&[sink]).inc_by(n);
    }

    pub fn sink_errors(&self, sink: &str) -> u64 {
        self.inner.sink_points_errors.with_label_values(&[sink]).get()
    }

    pub fn add_sink_filtered(&self, sink: &str, n: u64) {
        self.inner
            .sink_points_filtered
            .with_label_values(&[sink])
            .inc_by(n);
    }

    pub fn sink_filtered(&self, sink: &str) -> u64 {
        self.inner
            .sink_points_filtered
            .with_label_values(&[sink])
            .get()
    }
}

/// Structured logger for collector lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    /// Log collector startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "collector_started",
            cluster = %self.cluster_name,
            collector_version = %version,
            "Metrics collector started"
        );
    }

    /// Log the effective pipeline configuration
    pub fn log_pipeline(&self, resolution: Duration, sinks: &[String], processors: &[String]) {
        info!(
            event = "pipeline_configured",
            cluster = %self.cluster_name,
            resolution_secs = resolution.as_secs(),
            sinks = ?sinks,
            processors = ?processors,
            "Pipeline configured"
        );
    }

    /// Log collector shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Metrics collector shutting down"
        );
    }
}
