//! Fan-out of batches to sink workers
//!
//! Every sink runs on its own worker task. A worker accepts a new batch only
//! once it has finished exporting the previous one, so a slow sink misses
//! batches instead of queueing them.

use super::Sink;
use crate::models::Batch;
use crate::observability::CollectorMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for the sink manager
#[derive(Debug, Clone)]
pub struct SinkManagerConfig {
    /// How long an offer waits for a busy sink (default: 20 seconds)
    pub export_timeout: Duration,
    /// How long shutdown waits for each sink (default: 60 seconds)
    pub stop_timeout: Duration,
}

impl Default for SinkManagerConfig {
    fn default() -> Self {
        Self {
            export_timeout: Duration::from_secs(20),
            stop_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub accepted: usize,
    pub timed_out: usize,
}

enum Offer {
    Accepted,
    TimedOut,
    Closed,
}

/// Handle to one sink's worker task
#[derive(Clone)]
struct SinkWorker {
    name: String,
    /// Holds a permit while the worker is idle
    ready: Arc<Semaphore>,
    batches: mpsc::Sender<Arc<Batch>>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
}

impl SinkWorker {
    fn spawn(sink: Arc<dyn Sink>) -> Self {
        let (batch_tx, mut batch_rx) = mpsc::channel::<Arc<Batch>>(1);
        let (stop_tx, mut stop_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
        let ready = Arc::new(Semaphore::new(1));
        let worker = Self {
            name: sink.name().to_string(),
            ready: ready.clone(),
            batches: batch_tx,
            stop: stop_tx,
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(batch) = batch_rx.recv() => {
                        sink.export(batch).await;
                        ready.add_permits(1);
                    }
                    Some(done) = stop_rx.recv() => {
                        info!(sink = %sink.name(), "Sink stop received");
                        ready.close();
                        sink.stop().await;
                        let _ = done.send(());
                        break;
                    }
                    else => break,
                }
            }
            ready.close();
        });

        worker
    }

    async fn offer(&self, batch: Arc<Batch>, timeout: Duration) -> Offer {
        debug!(sink = %self.name, "Pushing data to sink");
        match tokio::time::timeout(timeout, self.ready.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                if self.batches.try_send(batch).is_err() {
                    self.ready.add_permits(1);
                    return Offer::Closed;
                }
                debug!(sink = %self.name, "Data push complete");
                Offer::Accepted
            }
            Ok(Err(_)) => Offer::Closed,
            Err(_) => Offer::TimedOut,
        }
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        let stopped = async {
            self.stop.send(done_tx).await.ok()?;
            done_rx.await.ok()
        };
        matches!(tokio::time::timeout(timeout, stopped).await, Ok(Some(())))
    }
}

/// Delivers each batch to every sink concurrently
pub struct SinkManager {
    workers: Vec<SinkWorker>,
    config: SinkManagerConfig,
    metrics: CollectorMetrics,
}

impl SinkManager {
    /// Start one worker per sink
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: SinkManagerConfig, metrics: CollectorMetrics) -> Self {
        let workers = sinks.into_iter().map(SinkWorker::spawn).collect();
        Self {
            workers,
            config,
            metrics,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Offer a batch to every sink
    ///
    /// Returns once each sink has either taken the batch or let the export
    /// timeout pass. Sinks that time out miss this batch.
    pub async fn export_data(&self, batch: Arc<Batch>) -> ExportSummary {
        let mut offers = JoinSet::new();
        for worker in &self.workers {
            let worker = worker.clone();
            let batch = batch.clone();
            let timeout = self.config.export_timeout;
            offers.spawn(async move {
                let offer = worker.offer(batch, timeout).await;
                (worker.name, offer)
            });
        }

        let mut summary = ExportSummary::default();
        while let Some(joined) = offers.join_next().await {
            let Ok((name, offer)) = joined else {
                continue;
            };
            match offer {
                Offer::Accepted => summary.accepted += 1,
                Offer::TimedOut => {
                    self.metrics.inc_sink_timeouts(&name);
                    summary.timed_out += 1;
                    info!(sink = %name, "Data push failed");
                }
                Offer::Closed => warn!(sink = %name, "Sink worker is gone"),
            }
        }
        summary
    }

    /// Stop every sink, waiting at most the stop timeout for each
    pub async fn stop(&self) {
        let mut stops = JoinSet::new();
        for worker in &self.workers {
            let worker = worker.clone();
            let timeout = self.config.stop_timeout;
            stops.spawn(async move {
                info!(sink = %worker.name, "Running stop");
                let stopped = worker.shutdown(timeout).await;
                (worker.name, stopped)
            });
        }

        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((name, true)) => info!(sink = %name, "Sink stopped"),
                Ok((name, false)) => warn!(sink = %name, "Failed to stop sink"),
                Err(e) => warn!(error = %e, "Sink stop task failed"),
            }
        }
    }
}
