use super::*;
use crate::error::CollectorError;
use crate::models::{MetricSet, ResourceKey, Value};
use crate::sinks::{Sink, SinkManagerConfig};
use crate::sources::{Source, SourceManagerConfig, SourceProvider};
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

struct StaticSource;

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn scrape(&self) -> anyhow::Result<Batch> {
        let now = Utc::now();
        Ok(Batch::new(now).with_set(
            ResourceKey::node("n1"),
            MetricSet::new(now).with_value("memory/usage", Value::int_gauge(42)),
        ))
    }
}

struct StaticProvider;

impl SourceProvider for StaticProvider {
    fn name(&self) -> &str {
        "static_provider"
    }

    fn sources(&self) -> Vec<Arc<dyn Source>> {
        vec![Arc::new(StaticSource) as Arc<dyn Source>]
    }

    fn collection_interval(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Records the order processors ran in
struct TagProcessor {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Processor for TagProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, batch: Batch) -> crate::error::Result<Batch> {
        self.log.lock().unwrap().push(self.name.clone());
        Ok(batch)
    }
}

struct FailingProcessor;

#[async_trait]
impl Processor for FailingProcessor {
    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _batch: Batch) -> crate::error::Result<Batch> {
        Err(CollectorError::UnsupportedValue {
            metric: "memory/usage".to_string(),
            reason: "test".to_string(),
        })
    }
}

/// Never finishes, holding its cycle's slot
struct HangingProcessor {
    entered: AtomicUsize,
}

#[async_trait]
impl Processor for HangingProcessor {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn process(&self, _batch: Batch) -> crate::error::Result<Batch> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Arc<Batch>>>,
    stopped: AtomicBool,
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn export(&self, batch: Arc<Batch>) {
        self.batches.lock().unwrap().push(batch);
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Takes the first batch and never returns from it
#[derive(Default)]
struct StuckSink {
    entered: AtomicUsize,
}

#[async_trait]
impl Sink for StuckSink {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn export(&self, _batch: Arc<Batch>) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await
    }

    async fn stop(&self) {}
}

struct Harness {
    sources: Arc<SourceManager>,
    sinks: Arc<SinkManager>,
    sink: Arc<RecordingSink>,
    metrics: CollectorMetrics,
}

fn harness() -> Harness {
    let metrics = CollectorMetrics::new().unwrap();
    let sources = Arc::new(SourceManager::new(
        SourceManagerConfig {
            jitter_per_source: Duration::ZERO,
            ..Default::default()
        },
        metrics.clone(),
    ));
    let sink = Arc::new(RecordingSink::default());
    let sinks = Arc::new(SinkManager::new(
        vec![sink.clone() as Arc<dyn Sink>],
        SinkManagerConfig {
            export_timeout: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(100),
        },
        metrics.clone(),
    ));
    Harness {
        sources,
        sinks,
        sink,
        metrics,
    }
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    let end = Utc::now();
    (end - TimeDelta::seconds(60), end)
}

#[test]
fn test_cycle_window_alignment() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 37).unwrap();
    let (start, end, wait) = cycle_window(now, Duration::from_secs(60), Duration::from_secs(5));

    assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap());
    assert_eq!(wait, Duration::from_secs(28));
}

#[tokio::test]
async fn test_builder_requires_managers() {
    let h = harness();

    let missing_sinks = PipelineManager::builder().sources(h.sources.clone()).build();
    assert!(missing_sinks.is_err());

    let missing_sources = PipelineManager::builder().sinks(h.sinks.clone()).build();
    assert!(missing_sources.is_err());

    let ok = PipelineManager::builder()
        .sources(h.sources)
        .sinks(h.sinks)
        .build();
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_cycle_runs_processors_in_order_and_exports() {
    let h = harness();
    h.sources.add_provider(Arc::new(StaticProvider));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PipelineManager::builder()
        .sources(h.sources.clone())
        .sinks(h.sinks.clone())
        .metrics(h.metrics.clone());
    for name in ["first", "second", "third"] {
        builder = builder.processor(Arc::new(TagProcessor {
            name: name.to_string(),
            log: log.clone(),
        }));
    }
    let pipeline = builder.build().unwrap();
    assert_eq!(pipeline.processor_names(), vec!["first", "second", "third"]);

    let (start, end) = window();
    let outcome = pipeline.housekeep(start, end).await;
    assert_eq!(
        outcome,
        CycleOutcome::Exported(ExportSummary {
            accepted: 1,
            timed_out: 0
        })
    );
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(h.metrics.cycles(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let batches = h.sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].timestamp, end);
    assert!(batches[0].sets.contains_key(&ResourceKey::node("n1")));
}

#[tokio::test]
async fn test_processor_error_aborts_cycle() {
    let h = harness();
    let health = HealthRegistry::new();
    health.register_all().await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = PipelineManager::builder()
        .sources(h.sources.clone())
        .sinks(h.sinks.clone())
        .metrics(h.metrics.clone())
        .health(health.clone())
        .processor(Arc::new(FailingProcessor))
        .processor(Arc::new(TagProcessor {
            name: "after".to_string(),
            log: log.clone(),
        }))
        .build()
        .unwrap();

    let (start, end) = window();
    assert_eq!(pipeline.housekeep(start, end).await, CycleOutcome::Aborted);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(h.metrics.processor_errors("failing"), 1);
    assert_eq!(h.metrics.cycles(), 0);
    assert_eq!(
        health.status(components::PIPELINE).await,
        Some(crate::health::ComponentStatus::Degraded)
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.sink.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inverted_window_is_skipped() {
    let h = harness();
    let pipeline = PipelineManager::builder()
        .sources(h.sources)
        .sinks(h.sinks)
        .build()
        .unwrap();

    let now = Utc::now();
    assert_eq!(pipeline.housekeep(now, now).await, CycleOutcome::Skipped);
    assert_eq!(
        pipeline.housekeep(now, now - TimeDelta::seconds(1)).await,
        CycleOutcome::Skipped
    );
}

#[tokio::test]
async fn test_busy_pipeline_skips_cycle() {
    let h = harness();
    let hanging = Arc::new(HangingProcessor {
        entered: AtomicUsize::new(0),
    });
    let pipeline = PipelineManager::builder()
        .sources(h.sources.clone())
        .sinks(h.sinks.clone())
        .metrics(h.metrics.clone())
        .resolution(Duration::from_millis(200))
        .max_parallelism(1)
        .processor(hanging.clone())
        .build()
        .unwrap();

    let (start, end) = window();
    let stuck = pipeline.clone();
    tokio::spawn(async move {
        stuck.housekeep(start, end).await;
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(hanging.entered.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    let outcome = pipeline.housekeep(start, end).await;
    let waited = started.elapsed();

    assert_eq!(outcome, CycleOutcome::Skipped);
    assert!(waited >= Duration::from_millis(90), "waited {waited:?}");
    assert!(waited < Duration::from_millis(500), "waited {waited:?}");
    assert_eq!(h.metrics.cycles_skipped(), 1);
    assert_eq!(hanging.entered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_stops_sinks_and_providers() {
    let h = harness();
    h.sources.add_provider(Arc::new(StaticProvider));
    let health = HealthRegistry::new();

    let pipeline = PipelineManager::builder()
        .sources(h.sources.clone())
        .sinks(h.sinks.clone())
        .health(health.clone())
        .build()
        .unwrap();

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(pipeline.run(rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(health.readiness().await.ready);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    assert!(h.sink.stopped.load(Ordering::SeqCst));
    assert!(h.sources.is_empty());
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_repeated_aborts_mark_pipeline_unhealthy() {
    let h = harness();
    let health = HealthRegistry::with_threshold(2);
    health.register_all().await;
    health.set_ready(true).await;

    let pipeline = PipelineManager::builder()
        .sources(h.sources.clone())
        .sinks(h.sinks.clone())
        .metrics(h.metrics.clone())
        .health(health.clone())
        .processor(Arc::new(FailingProcessor))
        .build()
        .unwrap();

    let (start, end) = window();
    assert_eq!(pipeline.housekeep(start, end).await, CycleOutcome::Aborted);
    assert!(health.readiness().await.ready);

    assert_eq!(pipeline.housekeep(start, end).await, CycleOutcome::Aborted);
    assert_eq!(
        health.status(components::PIPELINE).await,
        Some(crate::health::ComponentStatus::Unhealthy)
    );
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_sinks_unhealthy_when_every_sink_misses() {
    let metrics = CollectorMetrics::new().unwrap();
    let sources = Arc::new(SourceManager::new(SourceManagerConfig::default(), metrics.clone()));
    let stuck = Arc::new(StuckSink::default());
    let sinks = Arc::new(SinkManager::new(
        vec![stuck.clone() as Arc<dyn Sink>],
        SinkManagerConfig {
            export_timeout: Duration::from_millis(50),
            stop_timeout: Duration::from_millis(50),
        },
        metrics.clone(),
    ));
    let health = HealthRegistry::with_threshold(2);
    health.register_all().await;

    let pipeline = PipelineManager::builder()
        .sources(sources)
        .sinks(sinks)
        .metrics(metrics)
        .health(health.clone())
        .build()
        .unwrap();

    // the first batch is handed off and wedges the sink
    let (start, end) = window();
    let first = pipeline.housekeep(start, end).await;
    assert!(matches!(first, CycleOutcome::Exported(s) if s.accepted == 1));
    assert_eq!(
        health.status(components::SINKS).await,
        Some(crate::health::ComponentStatus::Healthy)
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(stuck.entered.load(Ordering::SeqCst), 1);

    for expected in [
        crate::health::ComponentStatus::Degraded,
        crate::health::ComponentStatus::Unhealthy,
    ] {
        let outcome = pipeline.housekeep(start, end).await;
        assert!(matches!(outcome, CycleOutcome::Exported(s) if s.accepted == 0 && s.timed_out == 1));
        assert_eq!(health.status(components::SINKS).await, Some(expected));
    }
}
