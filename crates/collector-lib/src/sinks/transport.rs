//! Backend transports and the line format they share

use crate::models::{Distribution, Point};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Write;
use tracing::{debug, info};

/// Wire-level delivery of prepared metrics
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_point(&self, point: &Point) -> Result<()>;

    async fn send_distribution(&self, distribution: &Distribution) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

fn write_tags(line: &mut String, source: &str, tags: &HashMap<String, String>) {
    let _ = write!(line, " source={}", quote(source));
    let sorted: BTreeMap<_, _> = tags.iter().collect();
    for (k, v) in sorted {
        let _ = write!(line, " {}={}", quote(k), quote(v));
    }
}

/// `"name" value timestamp source="..." "tag"="value"...`
pub fn point_line(point: &Point) -> String {
    let mut line = format!("{} {} {}", quote(&point.name), point.value, point.timestamp);
    write_tags(&mut line, &point.source, &point.tags);
    line
}

/// `!M timestamp #count bound... "name" source="..." "tag"="value"...`
///
/// Empty centroids are left out.
pub fn distribution_line(distribution: &Distribution) -> String {
    let mut line = format!("!M {}", distribution.timestamp.timestamp());
    for c in distribution.centroids.iter().filter(|c| c.count > 0.0) {
        let _ = write!(line, " #{} {}", c.count, c.bound);
    }
    let _ = write!(line, " {}", quote(&distribution.name));
    write_tags(&mut line, &distribution.source, &distribution.tags);
    line
}

/// Writes every metric to the log in line format
#[derive(Debug, Clone)]
pub struct LogTransport {
    sink: String,
}

impl LogTransport {
    pub fn new(sink: impl Into<String>) -> Self {
        Self { sink: sink.into() }
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send_point(&self, point: &Point) -> Result<()> {
        info!(target: "collector::export", sink = %self.sink, line = %point_line(point));
        Ok(())
    }

    async fn send_distribution(&self, distribution: &Distribution) -> Result<()> {
        info!(
            target: "collector::export",
            sink = %self.sink,
            line = %distribution_line(distribution)
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!(sink = %self.sink, "Closing log transport");
        Ok(())
    }
}
