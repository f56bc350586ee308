//! Processors over flat distributions

use super::Processor;
use crate::error::Result;
use crate::models::{Batch, Distribution, Metric};
use crate::observability::CollectorMetrics;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

/// Replaces cumulative distributions with their per-minute rate
///
/// The first sample of a series, and any sample whose buckets changed or
/// went down, produces nothing for that cycle. The cached sample always
/// advances to the latest one.
pub struct DistributionRateCalculator {
    previous: Mutex<HashMap<String, Distribution>>,
    metrics: CollectorMetrics,
}

impl DistributionRateCalculator {
    pub fn new(metrics: CollectorMetrics) -> Self {
        Self {
            previous: Mutex::new(HashMap::new()),
            metrics,
        }
    }
}

#[async_trait]
impl Processor for DistributionRateCalculator {
    fn name(&self) -> &str {
        "distribution_rate_calculator"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        let mut previous = self.previous.lock().await;
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(batch.metrics.len());

        for metric in batch.metrics.drain(..) {
            let dist = match metric {
                Metric::Distribution(d) if d.cumulative => d,
                other => {
                    out.push(other);
                    continue;
                }
            };

            let key = dist.key();
            if !seen.insert(key.clone()) {
                debug!(name = %dist.name, "Dropping duplicate distribution in batch");
                self.metrics.inc_duplicate_distributions(&dist.name);
                continue;
            }

            let rate = dist.rate(previous.get(&key));
            previous.insert(key, dist);
            if let Some(rate) = rate {
                out.push(rate.into());
            }
        }

        batch.metrics = out;
        Ok(batch)
    }
}

/// Converts every cumulative distribution to frequency form
#[derive(Debug, Default)]
pub struct CumulativeDistributionConverter;

impl CumulativeDistributionConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for CumulativeDistributionConverter {
    fn name(&self) -> &str {
        "cumulative_distribution_converter"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        for metric in batch.metrics.iter_mut() {
            if let Metric::Distribution(d) = metric {
                if d.cumulative {
                    *d = d.to_frequency();
                }
            }
        }
        Ok(batch)
    }
}
