use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// A named scalar sample ready for a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub name: String,
    pub value: f64,
    /// Unix seconds
    pub timestamp: i64,
    pub source: String,
    pub tags: HashMap<String, String>,
}

impl Point {
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            source: source.into(),
            tags: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set a tag only if it is not already present
    pub fn add_tag(&mut self, key: &str, value: &str) {
        add_tag(&mut self.tags, key, value);
    }

    pub fn add_tags(&mut self, tags: &HashMap<String, String>) {
        for (k, v) in tags {
            add_tag(&mut self.tags, k, v);
        }
    }

    pub fn override_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }
}

/// One histogram bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub bound: f64,
    pub count: f64,
}

impl Centroid {
    pub fn new(bound: f64, count: f64) -> Self {
        Self { bound, count }
    }
}

/// A histogram in cumulative or frequency form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub name: String,
    pub centroids: Vec<Centroid>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub tags: HashMap<String, String>,
    /// Cumulative: each count includes every lower bucket
    pub cumulative: bool,
}

impl Distribution {
    pub fn cumulative(
        name: impl Into<String>,
        source: impl Into<String>,
        tags: HashMap<String, String>,
        centroids: Vec<Centroid>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            centroids,
            timestamp,
            source: source.into(),
            tags,
            cumulative: true,
        }
    }

    pub fn frequency(
        name: impl Into<String>,
        source: impl Into<String>,
        tags: HashMap<String, String>,
        centroids: Vec<Centroid>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            cumulative: false,
            ..Self::cumulative(name, source, tags, centroids, timestamp)
        }
    }

    pub fn add_tag(&mut self, key: &str, value: &str) {
        add_tag(&mut self.tags, key, value);
    }

    pub fn add_tags(&mut self, tags: &HashMap<String, String>) {
        for (k, v) in tags {
            add_tag(&mut self.tags, k, v);
        }
    }

    pub fn override_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    /// Content hash identifying the series this distribution belongs to
    ///
    /// Covers the form, name, source and tags. Tag order does not matter.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(if self.cumulative { b"c" } else { b"f" });
        hasher.update([0u8]);
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source.as_bytes());
        let sorted: BTreeMap<_, _> = self.tags.iter().collect();
        for (k, v) in sorted {
            hasher.update([0u8]);
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Convert to frequency form
    ///
    /// Each finite bucket's own count is spread over its lower bound, midpoint
    /// and upper bound in a 1/4, 1/2, 1/4 split (floored, remainder at the
    /// upper bound). The first bucket starts at zero unless its bound is not
    /// positive, in which case its count sits at the bound. Whatever the `+Inf`
    /// bucket adds lands on the last finite bound.
    ///
    /// Fractional counts, as produced by per-minute rates, are amplified so
    /// the smallest non-empty bucket holds at least one sample.
    pub fn to_frequency(&self) -> Distribution {
        if !self.cumulative {
            return self.clone();
        }

        let amplifier = self.amplifier();
        let mut out: Vec<Centroid> = Vec::with_capacity(self.centroids.len() * 2);
        let mut lower: Option<f64> = None;
        let mut prev_count = 0.0;

        for c in &self.centroids {
            let delta = (c.count - prev_count).max(0.0) * amplifier;
            if c.bound == f64::INFINITY {
                if let Some(last) = out.last_mut() {
                    last.count += delta;
                }
                break;
            }
            if !c.bound.is_finite() {
                continue;
            }
            match lower {
                None if c.bound <= 0.0 => add_at(&mut out, c.bound, delta),
                None => spread(&mut out, 0.0, c.bound, delta),
                Some(l) => spread(&mut out, l, c.bound, delta),
            }
            lower = Some(c.bound);
            prev_count = c.count;
        }

        Distribution {
            centroids: out,
            cumulative: false,
            ..self.clone()
        }
    }

    /// Factor lifting the smallest positive bucket increment to one
    fn amplifier(&self) -> f64 {
        let mut prev = 0.0;
        let mut smallest = f64::INFINITY;
        for c in &self.centroids {
            let delta = c.count - prev;
            if delta > 0.0 && delta < smallest {
                smallest = delta;
            }
            prev = c.count;
        }
        if smallest < 1.0 {
            1.0 / smallest
        } else {
            1.0
        }
    }

    /// Per-minute rate against the previous sample of the same series
    ///
    /// `None` when there is no previous sample, the series differ, time did
    /// not advance, the bucket layout changed or any bucket went down.
    pub fn rate(&self, previous: Option<&Distribution>) -> Option<Distribution> {
        let prev = previous?;
        if prev.key() != self.key() || self.timestamp <= prev.timestamp {
            return None;
        }
        if prev.centroids.len() != self.centroids.len() {
            return None;
        }
        let compatible = self
            .centroids
            .iter()
            .zip(&prev.centroids)
            .all(|(c, p)| c.bound == p.bound && c.count >= p.count);
        if !compatible {
            return None;
        }

        let minutes = (self.timestamp - prev.timestamp).num_milliseconds() as f64 / 60_000.0;
        let centroids = self
            .centroids
            .iter()
            .zip(&prev.centroids)
            .map(|(c, p)| Centroid::new(c.bound, (c.count - p.count) / minutes))
            .collect();

        Some(Distribution {
            centroids,
            ..self.clone()
        })
    }
}

fn add_tag(tags: &mut HashMap<String, String>, key: &str, value: &str) {
    if !tags.contains_key(key) {
        tags.insert(key.to_string(), value.to_string());
    }
}

fn add_at(out: &mut Vec<Centroid>, bound: f64, count: f64) {
    match out.last_mut() {
        Some(last) if last.bound == bound => last.count += count,
        _ => out.push(Centroid::new(bound, count)),
    }
}

fn spread(out: &mut Vec<Centroid>, lower: f64, upper: f64, count: f64) {
    let quarter = (count / 4.0).floor();
    let half = (count / 2.0).floor();
    add_at(out, lower, quarter);
    out.push(Centroid::new((lower + upper) / 2.0, half));
    out.push(Centroid::new(upper, count - quarter - half));
}

/// A flat metric carried in [`crate::models::Batch::metrics`]
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Point(Point),
    Distribution(Distribution),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Metric::Point(p) => &p.name,
            Metric::Distribution(d) => &d.name,
        }
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        match self {
            Metric::Point(p) => &p.tags,
            Metric::Distribution(d) => &d.tags,
        }
    }

    pub fn tags_mut(&mut self) -> &mut HashMap<String, String> {
        match self {
            Metric::Point(p) => &mut p.tags,
            Metric::Distribution(d) => &mut d.tags,
        }
    }

    pub fn add_tags(&mut self, tags: &HashMap<String, String>) {
        match self {
            Metric::Point(p) => p.add_tags(tags),
            Metric::Distribution(d) => d.add_tags(tags),
        }
    }

    pub fn override_tag(&mut self, key: &str, value: &str) {
        match self {
            Metric::Point(p) => p.override_tag(key, value),
            Metric::Distribution(d) => d.override_tag(key, value),
        }
    }

    pub fn set_name(&mut self, name: String) {
        match self {
            Metric::Point(p) => p.name = name,
            Metric::Distribution(d) => d.name = name,
        }
    }
}

impl From<Point> for Metric {
    fn from(p: Point) -> Self {
        Metric::Point(p)
    }
}

impl From<Distribution> for Metric {
    fn from(d: Distribution) -> Self {
        Metric::Distribution(d)
    }
}
