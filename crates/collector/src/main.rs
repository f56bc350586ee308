//! Metrics collector - cluster resource metrics pipeline
//!
//! This binary scrapes registered sources once per resolution, derives rates
//! and roll-ups, and exports the result to the configured sinks.

use anyhow::{Context, Result};
use collector_lib::{
    health::HealthRegistry,
    observability::{CollectorMetrics, StructuredLogger},
    processors::{
        CumulativeDistributionConverter, DistributionRateCalculator, NamespaceBasedEnricher,
        PodAggregator, PointConverter, PointConverterConfig, Processor, RateCalculator,
        StaticNamespaceStore, SumCountAggregator,
    },
    sinks::{LogTransport, PointSink, Sink, SinkManager, SinkManagerConfig, Transport},
    sources::{SourceManager, SourceManagerConfig, StatsConfig, StatsProvider},
    PipelineManager,
};
use crate::config::{CollectorConfig, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-collector");

    let config = CollectorConfig::load().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        cluster = %config.cluster_name,
        node_name = ?config.node_name,
        sinks = config.sinks.len(),
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = CollectorMetrics::new().context("Failed to register collector metrics")?;

    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(COLLECTOR_VERSION);

    let sources = Arc::new(SourceManager::new(
        SourceManagerConfig {
            default_interval: config.default_collection_interval(),
            ..Default::default()
        },
        metrics.clone(),
    ));
    if config.stats.enabled {
        let stats = StatsConfig {
            prefix: config.stats.prefix.clone(),
            tags: config.stats.tags.clone(),
            filters: config.stats.filters.clone(),
            source: config
                .node_name
                .clone()
                .unwrap_or_else(|| config.cluster_name.clone()),
            ..Default::default()
        };
        sources.add_provider(Arc::new(StatsProvider::new(&stats, metrics.clone())?));
    }

    let sinks = Arc::new(SinkManager::new(
        build_sinks(&config, &metrics)?,
        SinkManagerConfig {
            export_timeout: config.export_timeout(),
            stop_timeout: config.sink_stop_timeout(),
        },
        metrics.clone(),
    ));

    let mut builder = PipelineManager::builder()
        .sources(sources)
        .sinks(sinks.clone())
        .resolution(config.resolution())
        .scrape_offset(config.scrape_offset())
        .max_parallelism(config.max_parallelism)
        .metrics(metrics.clone())
        .health(health_registry.clone());
    for processor in build_processors(&config, &metrics)? {
        builder = builder.processor(processor);
    }
    let pipeline = builder.build()?;
    logger.log_pipeline(config.resolution(), &sinks.names(), &pipeline.processor_names());

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry, metrics));

    // Start health and metrics server
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            warn!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let pipeline_handle = tokio::spawn(pipeline.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    // Sinks get their own stop timeout inside the pipeline
    let grace = config.sink_stop_timeout() + Duration::from_secs(5);
    if tokio::time::timeout(grace, pipeline_handle).await.is_err() {
        warn!("Pipeline did not stop in time");
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

/// Processors in dependency order: rates, enrichment, roll-ups, conversion
fn build_processors(config: &CollectorConfig, metrics: &CollectorMetrics) -> Result<Vec<Arc<dyn Processor>>> {
    let mut processors: Vec<Arc<dyn Processor>> = vec![
        Arc::new(RateCalculator::new()),
        Arc::new(DistributionRateCalculator::new(metrics.clone())),
    ];

    if !config.namespaces.is_empty() {
        let store = StaticNamespaceStore::new();
        for (name, uid) in &config.namespaces {
            store.insert(name, uid);
        }
        processors.push(Arc::new(NamespaceBasedEnricher::new(Arc::new(store))));
    }

    let aggregation = &config.aggregation;
    processors.push(Arc::new(PodAggregator::new()));
    processors.push(Arc::new(SumCountAggregator::namespace(
        aggregation.namespace_metrics.clone(),
    )));
    processors.push(Arc::new(SumCountAggregator::node(aggregation.node_metrics.clone())));
    processors.push(Arc::new(SumCountAggregator::cluster(
        aggregation.cluster_metrics.clone(),
    )));
    processors.push(Arc::new(CumulativeDistributionConverter::new()));

    let converter = PointConverterConfig {
        prefix: config.point_converter.prefix.clone(),
        cluster_name: config.cluster_name.clone(),
        node_name: config.node_name.clone(),
        filters: config.point_converter.filters.clone(),
    };
    processors.push(Arc::new(
        PointConverter::new(&converter, metrics.clone()).context("Invalid point converter filter")?,
    ));

    Ok(processors)
}

fn build_sinks(config: &CollectorConfig, metrics: &CollectorMetrics) -> Result<Vec<Arc<dyn Sink>>> {
    config
        .sinks
        .iter()
        .map(|settings| {
            let transport: Arc<dyn Transport> = match settings.transport {
                TransportKind::Log => Arc::new(LogTransport::new(&settings.name)),
            };
            let sink = PointSink::new(
                &settings.point_sink(&config.cluster_name),
                transport,
                metrics.clone(),
            )
            .with_context(|| format!("Invalid filter for sink {}", settings.name))?;
            Ok(Arc::new(sink) as Arc<dyn Sink>)
        })
        .collect()
}
