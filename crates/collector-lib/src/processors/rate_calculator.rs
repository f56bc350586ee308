//! Counter to rate conversion
//!
//! Keeps the previous metric set for every resource key and derives rates
//! from the difference between consecutive scrapes.

use super::Processor;
use crate::error::Result;
use crate::models::names::{self, labels};
use crate::models::{Batch, LabeledValue, MetricKind, MetricSet, ResourceKey, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Output scaling for a derived rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    /// Nanosecond CPU counter to integer millicores
    MilliCores,
    /// Float units per second
    PerSecond,
}

/// Where a cumulative metric's rate is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTarget {
    pub name: String,
    pub unit: RateUnit,
}

impl RateTarget {
    pub fn new(name: &str, unit: RateUnit) -> Self {
        Self {
            name: name.to_string(),
            unit,
        }
    }
}

#[derive(Default)]
struct RateState {
    previous: HashMap<ResourceKey, MetricSet>,
    last_prune: Option<DateTime<Utc>>,
}

/// Derives per-interval rates from cumulative values
pub struct RateCalculator {
    rates: HashMap<String, RateTarget>,
    labeled_rates: HashMap<String, RateTarget>,
    prune_interval: Duration,
    state: Mutex<RateState>,
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCalculator {
    /// Calculator with the standard container metric mapping
    pub fn new() -> Self {
        let per_second = [
            (names::MEMORY_PAGE_FAULTS, names::MEMORY_PAGE_FAULTS_RATE),
            (names::MEMORY_MAJOR_PAGE_FAULTS, names::MEMORY_MAJOR_PAGE_FAULTS_RATE),
            (names::NETWORK_RX, names::NETWORK_RX_RATE),
            (names::NETWORK_RX_ERRORS, names::NETWORK_RX_ERRORS_RATE),
            (names::NETWORK_TX, names::NETWORK_TX_RATE),
            (names::NETWORK_TX_ERRORS, names::NETWORK_TX_ERRORS_RATE),
        ];

        let mut rates: HashMap<String, RateTarget> = per_second
            .iter()
            .map(|(from, to)| (from.to_string(), RateTarget::new(to, RateUnit::PerSecond)))
            .collect();
        rates.insert(
            names::CPU_USAGE.to_string(),
            RateTarget::new(names::CPU_USAGE_RATE, RateUnit::MilliCores),
        );

        let labeled_rates = [
            (names::DISK_IO_READ_BYTES, names::DISK_IO_READ_BYTES_RATE),
            (names::DISK_IO_WRITE_BYTES, names::DISK_IO_WRITE_BYTES_RATE),
        ]
        .iter()
        .map(|(from, to)| (from.to_string(), RateTarget::new(to, RateUnit::PerSecond)))
        .collect();

        Self::with_mapping(rates, labeled_rates)
    }

    /// Calculator with an explicit metric mapping
    pub fn with_mapping(
        rates: HashMap<String, RateTarget>,
        labeled_rates: HashMap<String, RateTarget>,
    ) -> Self {
        Self {
            rates,
            labeled_rates,
            prune_interval: Duration::from_secs(300),
            state: Mutex::new(RateState::default()),
        }
    }

    /// How often keys absent from the latest batch are evicted (default: 5 minutes)
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Number of resource keys currently cached
    pub async fn cached(&self) -> usize {
        self.state.lock().await.previous.len()
    }

    fn scalar_rates(&self, set: &MetricSet, prev: &MetricSet, elapsed_ns: f64) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for (name, target) in &self.rates {
            let (Some(new), Some(old)) = (set.values.get(name), prev.values.get(name)) else {
                continue;
            };
            if new.kind != MetricKind::Cumulative {
                continue;
            }
            if let Some(v) = rate(name, new, old, elapsed_ns, target.unit) {
                out.push((target.name.clone(), v));
            }
        }
        out
    }

    fn labeled_rate_values(
        &self,
        set: &MetricSet,
        prev: &MetricSet,
        elapsed_ns: f64,
    ) -> Vec<(String, LabeledValue)> {
        let mut out = Vec::new();
        for (name, target) in &self.labeled_rates {
            let (Some(news), Some(olds)) = (set.labeled_values.get(name), prev.labeled_values.get(name))
            else {
                continue;
            };
            for new in news.iter().filter(|v| v.value.kind == MetricKind::Cumulative) {
                let id = new.labels.get(labels::RESOURCE_ID);
                // first old instance with the same resource id wins
                let Some(old) = olds.iter().find(|o| o.labels.get(labels::RESOURCE_ID) == id) else {
                    continue;
                };
                if let Some(v) = rate(name, &new.value, &old.value, elapsed_ns, target.unit) {
                    out.push((
                        target.name.clone(),
                        LabeledValue {
                            labels: new.labels.clone(),
                            value: v,
                        },
                    ));
                }
            }
        }
        out
    }
}

fn rate(name: &str, new: &Value, old: &Value, elapsed_ns: f64, unit: RateUnit) -> Option<Value> {
    let delta = new.as_f64() - old.as_f64();
    if delta < 0.0 {
        // counter went backwards without a restart; leave a gap
        debug!(metric = %name, delta, "Skipping rate for decreasing counter");
        return None;
    }
    Some(match unit {
        RateUnit::MilliCores => Value::int_gauge((delta * 1000.0 / elapsed_ns) as i64),
        RateUnit::PerSecond => Value::float_gauge(delta * 1e9 / elapsed_ns),
    })
}

#[async_trait]
impl Processor for RateCalculator {
    fn name(&self) -> &str {
        "rate_calculator"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        for (key, set) in batch.sets.iter_mut() {
            let (scalars, labeled) = match state.previous.get(key) {
                None => {
                    state.previous.insert(key.clone(), set.clone());
                    continue;
                }
                Some(prev) if set.scrape_time <= prev.scrape_time => {
                    trace!(key = %key, "Out of order sample, not recomputing rates");
                    continue;
                }
                Some(prev) if set.collection_start_time != prev.collection_start_time => {
                    debug!(key = %key, "Collection restarted, resetting rate baseline");
                    state.previous.insert(key.clone(), set.clone());
                    continue;
                }
                Some(prev) => {
                    let elapsed_ns = (set.scrape_time - prev.scrape_time)
                        .num_nanoseconds()
                        .unwrap_or(i64::MAX) as f64;
                    (
                        self.scalar_rates(set, prev, elapsed_ns),
                        self.labeled_rate_values(set, prev, elapsed_ns),
                    )
                }
            };

            set.values.extend(scalars);
            for (name, value) in labeled {
                set.push_labeled(name, value);
            }
            state.previous.insert(key.clone(), set.clone());
        }

        let last = *state.last_prune.get_or_insert(batch.timestamp);
        let due = (batch.timestamp - last)
            .to_std()
            .map(|since| since >= self.prune_interval)
            .unwrap_or(false);
        if due {
            let before = state.previous.len();
            state.previous.retain(|key, _| batch.sets.contains_key(key));
            state.last_prune = Some(batch.timestamp);
            debug!(
                evicted = before - state.previous.len(),
                remaining = state.previous.len(),
                "Pruned rate cache"
            );
        }

        Ok(batch)
    }
}
