//! Concurrent scraping of registered providers
//!
//! Each provider gets its own task ticking at the provider's collection
//! interval. Every tick fans out one task per source; results that miss the
//! provider's timeout are dropped and counted rather than delivered late.

use super::{ProviderHandler, Source, SourceProvider};
use crate::models::Batch;
use crate::observability::CollectorMetrics;
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the source manager
#[derive(Debug, Clone)]
pub struct SourceManagerConfig {
    /// Interval for providers that do not set one (default: 60 seconds)
    pub default_interval: Duration,
    /// Timeout for providers that do not set one (default: 30 seconds)
    pub default_timeout: Duration,
    /// Jitter budget added per source before scraping (default: 8ms)
    pub jitter_per_source: Duration,
    /// Upper bound on the jitter budget (default: 4 seconds)
    pub max_jitter: Duration,
    /// Capacity of the result channel
    pub buffer_size: usize,
}

impl Default for SourceManagerConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(60),
            default_timeout: Duration::from_secs(30),
            jitter_per_source: Duration::from_millis(8),
            max_jitter: Duration::from_secs(4),
            buffer_size: 1000,
        }
    }
}

impl SourceManagerConfig {
    /// Jitter budget for a round over `sources` sources
    pub fn jitter_budget(&self, sources: usize) -> Duration {
        (self.jitter_per_source * sources as u32).min(self.max_jitter)
    }
}

/// Registry entry for a running provider
struct ProviderEntry {
    sources: usize,
    /// Dropping or firing this stops the provider task
    stop: oneshot::Sender<()>,
}

/// Owns the providers and the results they produce between cycles
pub struct SourceManager {
    config: SourceManagerConfig,
    providers: DashMap<String, ProviderEntry>,
    result_tx: mpsc::Sender<Batch>,
    pending: Arc<Mutex<Vec<Batch>>>,
    metrics: CollectorMetrics,
}

impl SourceManager {
    /// Create a manager and start its result consumer
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SourceManagerConfig, metrics: CollectorMetrics) -> Self {
        let (result_tx, mut result_rx) = mpsc::channel::<Batch>(config.buffer_size.max(1));
        let pending = Arc::new(Mutex::new(Vec::new()));

        let sink = pending.clone();
        tokio::spawn(async move {
            while let Some(batch) = result_rx.recv().await {
                sink.lock().await.push(batch);
            }
            debug!("Source result channel closed");
        });

        Self {
            config,
            providers: DashMap::new(),
            result_tx,
            pending,
            metrics,
        }
    }

    /// Register a provider and start scraping it right away
    ///
    /// A provider with the same name is replaced and its task stopped.
    pub fn add_provider(&self, provider: Arc<dyn SourceProvider>) {
        let name = provider.name().to_string();
        let interval = non_zero_or(provider.collection_interval(), self.config.default_interval);
        let timeout = non_zero_or(provider.timeout(), self.config.default_timeout);
        let sources = provider.sources().len();

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = ProviderTask {
            provider,
            interval,
            timeout,
            config: self.config.clone(),
            result_tx: self.result_tx.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(task.run(stop_rx));

        if let Some(old) = self.providers.insert(
            name.clone(),
            ProviderEntry {
                sources,
                stop: stop_tx,
            },
        ) {
            let _ = old.stop.send(());
            info!(provider = %name, "Replaced provider");
        } else {
            info!(
                provider = %name,
                interval_secs = interval.as_secs(),
                timeout_secs = timeout.as_secs(),
                "Added provider"
            );
        }
        self.update_counts();
    }

    /// Stop and remove a provider; unknown names are ignored
    pub fn delete_provider(&self, name: &str) {
        if let Some((_, entry)) = self.providers.remove(name) {
            let _ = entry.stop.send(());
            info!(provider = %name, "Deleted provider");
        }
        self.update_counts();
    }

    /// Stop every provider
    pub fn stop_providers(&self) {
        let names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.delete_provider(&name);
        }
    }

    /// Drain everything scraped since the previous call
    pub async fn get_pending_metrics(&self) -> Vec<Batch> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn update_counts(&self) {
        let sources = self.providers.iter().map(|e| e.value().sources).sum();
        self.metrics.set_provider_counts(self.providers.len(), sources);
    }
}

impl ProviderHandler for SourceManager {
    fn add_provider(&self, provider: Arc<dyn SourceProvider>) {
        SourceManager::add_provider(self, provider);
    }

    fn delete_provider(&self, name: &str) {
        SourceManager::delete_provider(self, name);
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

/// Scrape loop for one provider
struct ProviderTask {
    provider: Arc<dyn SourceProvider>,
    interval: Duration,
    timeout: Duration,
    config: SourceManagerConfig,
    result_tx: mpsc::Sender<Batch>,
    metrics: CollectorMetrics,
}

impl ProviderTask {
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        // the first tick completes immediately
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!(provider = %self.provider.name(), "Stopping provider");
                    break;
                }
                _ = ticker.tick() => self.scrape_all(),
            }
        }
    }

    /// Fan out one scrape per source without waiting for them
    fn scrape_all(&self) {
        let sources = self.provider.sources();
        let budget = self.config.jitter_budget(sources.len()).as_millis() as u64;
        let provider = self.provider.name().to_string();

        for source in sources {
            let delay = if budget > 0 {
                Duration::from_millis(rand::thread_rng().gen_range(0..budget))
            } else {
                Duration::ZERO
            };
            tokio::spawn(scrape(
                source,
                provider.clone(),
                delay,
                self.timeout,
                self.result_tx.clone(),
                self.metrics.clone(),
            ));
        }
    }
}

async fn scrape(
    source: Arc<dyn Source>,
    provider: String,
    delay: Duration,
    timeout: Duration,
    result_tx: mpsc::Sender<Batch>,
    metrics: CollectorMetrics,
) {
    // spread load across targets
    tokio::time::sleep(delay).await;

    let started = Instant::now();
    let deadline = started + timeout;

    match tokio::time::timeout(timeout, source.scrape()).await {
        Ok(Ok(batch)) => {
            metrics.observe_scrape_latency(&provider, started.elapsed());
            let remaining = deadline.saturating_duration_since(Instant::now());
            let points = batch.points();
            if result_tx.send_timeout(batch, remaining).await.is_err() {
                metrics.inc_scrape_timeouts(&provider);
                warn!(
                    provider = %provider,
                    source = %source.name(),
                    "Failed to hand off scrape result in time"
                );
            } else {
                debug!(
                    provider = %provider,
                    source = %source.name(),
                    points,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scraped source"
                );
            }
        }
        Ok(Err(e)) => {
            metrics.inc_scrape_errors(&provider);
            error!(
                provider = %provider,
                source = %source.name(),
                error = %e,
                "Error scraping source"
            );
        }
        Err(_) => {
            metrics.inc_scrape_timeouts(&provider);
            warn!(
                provider = %provider,
                source = %source.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Scrape timed out"
            );
        }
    }
}
