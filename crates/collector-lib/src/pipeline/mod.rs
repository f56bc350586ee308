//! Cycle scheduling
//!
//! The [`PipelineManager`] wakes up once per resolution, shortly after each
//! aligned boundary, and runs one cycle over the window that just closed:
//! - drain the source manager's pending results into one batch
//! - run the processors in order
//! - hand the result to the sink manager
//!
//! At most `max_parallelism` cycles run at once. A cycle that cannot get a
//! slot within half the resolution is skipped.

#[cfg(test)]
mod tests;

use crate::health::{components, HealthRegistry};
use crate::models::Batch;
use crate::observability::CollectorMetrics;
use crate::processors::Processor;
use crate::sinks::{ExportSummary, SinkManager};
use crate::sources::SourceManager;
use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the pipeline manager
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Cycle length and boundary alignment (default: 60 seconds)
    pub resolution: Duration,
    /// Delay after each boundary before the cycle starts
    pub scrape_offset: Duration,
    /// Cycles allowed in flight at once (default: 3)
    pub max_parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: Duration::from_secs(60),
            scrape_offset: Duration::ZERO,
            max_parallelism: 3,
        }
    }
}

/// What happened to one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Clock anomaly or no free slot; nothing ran
    Skipped,
    /// A processor failed; nothing was exported
    Aborted,
    Exported(ExportSummary),
}

struct Inner {
    sources: Arc<SourceManager>,
    processors: Vec<Arc<dyn Processor>>,
    sinks: Arc<SinkManager>,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
    metrics: CollectorMetrics,
    health: Option<HealthRegistry>,
}

/// Drives collection cycles from sources through processors to sinks
#[derive(Clone)]
pub struct PipelineManager {
    inner: Arc<Inner>,
}

/// Window `[start, end)` containing `now` and the wait until its cycle runs
pub(crate) fn cycle_window(
    now: DateTime<Utc>,
    resolution: Duration,
    offset: Duration,
) -> (DateTime<Utc>, DateTime<Utc>, Duration) {
    let (Ok(res), Ok(offset)) = (TimeDelta::from_std(resolution), TimeDelta::from_std(offset)) else {
        return (now, now, resolution);
    };
    let start = now.duration_trunc(res).unwrap_or(now);
    let end = start + res;
    let wait = (end + offset - now).to_std().unwrap_or(Duration::ZERO);
    (start, end, wait)
}

impl PipelineManager {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.inner
            .processors
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run the scheduling loop until shutdown, then stop the sinks
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = &self.inner.config;
        info!(
            resolution_secs = config.resolution.as_secs(),
            scrape_offset_secs = config.scrape_offset.as_secs(),
            max_parallelism = config.max_parallelism,
            "Starting pipeline"
        );
        if let Some(health) = &self.inner.health {
            health.set_ready(true).await;
        }

        loop {
            let (start, end, wait) = cycle_window(Utc::now(), config.resolution, config.scrape_offset);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let pipeline = self.clone();
                    tokio::spawn(async move {
                        pipeline.housekeep(start, end).await;
                    });
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pipeline");
                    break;
                }
            }
        }

        if let Some(health) = &self.inner.health {
            health.set_ready(false).await;
        }
        self.inner.sources.stop_providers();
        self.inner.sinks.stop().await;
        info!("Pipeline stopped");
    }

    /// Run one cycle over `[start, end)`
    pub async fn housekeep(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CycleOutcome {
        if start >= end {
            warn!(start = %start, end = %end, "Wrong time provided to housekeep");
            return CycleOutcome::Skipped;
        }

        let admission = self.inner.config.resolution / 2;
        let permit = match tokio::time::timeout(admission, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return CycleOutcome::Skipped,
            Err(_) => {
                warn!(
                    end = %end,
                    wait_ms = admission.as_millis() as u64,
                    "Skipping cycle, too many cycles in flight"
                );
                self.inner.metrics.inc_cycles_skipped();
                return CycleOutcome::Skipped;
            }
        };

        let outcome = self.inner.run_cycle(end).await;
        drop(permit);
        outcome
    }
}

impl Inner {
    async fn run_cycle(&self, end: DateTime<Utc>) -> CycleOutcome {
        let started = Instant::now();

        let pending = self.sources.get_pending_metrics().await;
        let results = pending.len();
        let mut batch = Batch::new(end);
        for data in pending {
            batch.merge(data);
        }
        batch.timestamp = end;
        debug!(
            results,
            sets = batch.sets.len(),
            metrics = batch.metrics.len(),
            "Processing batch"
        );

        for processor in &self.processors {
            match processor.process(batch).await {
                Ok(processed) => batch = processed,
                Err(e) => {
                    error!(processor = %processor.name(), error = %e, "Error in processor");
                    self.metrics.inc_processor_errors(processor.name());
                    if let Some(health) = &self.health {
                        let status = health
                            .record_failure(components::PIPELINE, format!("{} failed: {e}", processor.name()))
                            .await;
                        if !status.is_operational() {
                            error!(processor = %processor.name(), "Pipeline keeps failing, marking unhealthy");
                        }
                    }
                    return CycleOutcome::Aborted;
                }
            }
        }

        let points = batch.points();
        let summary = self.sinks.export_data(Arc::new(batch)).await;
        let elapsed = started.elapsed();
        self.metrics.inc_cycles();
        self.metrics.observe_cycle_duration(elapsed);

        if let Some(health) = &self.health {
            self.report(health, results, summary).await;
        }

        info!(
            points,
            accepted = summary.accepted,
            timed_out = summary.timed_out,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle complete"
        );
        CycleOutcome::Exported(summary)
    }
}

impl Inner {
    async fn report(&self, health: &HealthRegistry, results: usize, summary: ExportSummary) {
        health.record_success(components::PIPELINE).await;

        if results == 0 {
            health
                .record_failure(components::SOURCES, "No source results this cycle")
                .await;
        } else {
            health.record_success(components::SOURCES).await;
        }

        // every sink missing the batch counts as a failed cycle
        if summary.timed_out > 0 && summary.accepted == 0 {
            let status = health
                .record_failure(components::SINKS, "No sink accepted the last batch")
                .await;
            if !status.is_operational() {
                error!(timed_out = summary.timed_out, "Sinks keep missing batches, marking unhealthy");
            }
        } else if summary.timed_out > 0 {
            health
                .set_degraded(
                    components::SINKS,
                    format!("{} sink(s) missed the last batch", summary.timed_out),
                )
                .await;
        } else {
            health.record_success(components::SINKS).await;
        }
    }
}

/// Builder for the pipeline manager
pub struct PipelineBuilder {
    sources: Option<Arc<SourceManager>>,
    processors: Vec<Arc<dyn Processor>>,
    sinks: Option<Arc<SinkManager>>,
    config: PipelineConfig,
    metrics: Option<CollectorMetrics>,
    health: Option<HealthRegistry>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            sources: None,
            processors: Vec::new(),
            sinks: None,
            config: PipelineConfig::default(),
            metrics: None,
            health: None,
        }
    }

    pub fn sources(mut self, sources: Arc<SourceManager>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Append a processor; processors run in the order added
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn sinks(mut self, sinks: Arc<SinkManager>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolution(mut self, resolution: Duration) -> Self {
        self.config.resolution = resolution;
        self
    }

    pub fn scrape_offset(mut self, offset: Duration) -> Self {
        self.config.scrape_offset = offset;
        self
    }

    pub fn max_parallelism(mut self, max: usize) -> Self {
        self.config.max_parallelism = max;
        self
    }

    pub fn metrics(mut self, metrics: CollectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<PipelineManager> {
        let sources = self
            .sources
            .ok_or_else(|| anyhow::anyhow!("Source manager is required"))?;
        let sinks = self
            .sinks
            .ok_or_else(|| anyhow::anyhow!("Sink manager is required"))?;
        if self.config.resolution.is_zero() {
            anyhow::bail!("Resolution must be positive");
        }
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => CollectorMetrics::new().context("Failed to create pipeline metrics")?,
        };
        let permits = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));

        Ok(PipelineManager {
            inner: Arc::new(Inner {
                sources,
                processors: self.processors,
                sinks,
                config: self.config,
                permits,
                metrics,
                health: self.health,
            }),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
