//! Health of the collection stages
//!
//! The pipeline reports the outcome of every cycle per stage (sources,
//! scheduler, sinks). A failed cycle degrades its stage; once a stage has
//! failed `unhealthy_after` cycles in a row it turns unhealthy, which fails
//! both the liveness and readiness probes. Any successful cycle resets the
//! streak.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles before a stage is reported unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;

/// Health status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last cycle had trouble but data is still flowing
    Degraded,
    /// Failing every cycle
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the stage is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Last reported state of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl StageHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }
}

/// Body of the liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, StageHealth>,
}

impl HealthResponse {
    /// Worst status across stages
    pub fn compute_status(stages: &HashMap<String, StageHealth>) -> ComponentStatus {
        stages
            .values()
            .map(|s| s.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of the readiness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Stage names
pub mod components {
    pub const SOURCES: &str = "sources";
    pub const PIPELINE: &str = "pipeline";
    pub const SINKS: &str = "sinks";

    pub const ALL: &[&str] = &[SOURCES, PIPELINE, SINKS];
}

#[derive(Debug, Default)]
struct State {
    stages: HashMap<String, StageHealth>,
    /// Set while the scheduler loop runs
    running: bool,
}

/// Shared view of stage health, fed by the pipeline
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
    unhealthy_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_UNHEALTHY_AFTER)
    }

    /// Registry turning a stage unhealthy after `unhealthy_after` failed
    /// cycles in a row
    pub fn with_threshold(unhealthy_after: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    /// Register every stage as healthy
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for name in components::ALL {
            state.stages.insert(
                name.to_string(),
                StageHealth::new(ComponentStatus::Healthy, None, 0),
            );
        }
    }

    /// Status of one stage, if registered
    pub async fn status(&self, stage: &str) -> Option<ComponentStatus> {
        self.state.read().await.stages.get(stage).map(|s| s.status)
    }

    /// A cycle went through this stage cleanly
    pub async fn record_success(&self, stage: &str) {
        self.state.write().await.stages.insert(
            stage.to_string(),
            StageHealth::new(ComponentStatus::Healthy, None, 0),
        );
    }

    /// A cycle failed in this stage; returns the resulting status
    pub async fn record_failure(&self, stage: &str, message: impl Into<String>) -> ComponentStatus {
        let mut state = self.state.write().await;
        let failures = state
            .stages
            .get(stage)
            .map_or(0, |s| s.consecutive_failures)
            .saturating_add(1);
        let status = if failures >= self.unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        state.stages.insert(
            stage.to_string(),
            StageHealth::new(status, Some(message.into()), failures),
        );
        status
    }

    /// Partial trouble that does not count towards the failure streak
    pub async fn set_degraded(&self, stage: &str, message: impl Into<String>) {
        self.state.write().await.stages.insert(
            stage.to_string(),
            StageHealth::new(ComponentStatus::Degraded, Some(message.into()), 0),
        );
    }

    /// Flag the scheduler loop as running or stopped
    pub async fn set_ready(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn health(&self) -> HealthResponse {
        let stages = self.state.read().await.stages.clone();
        let status = HealthResponse::compute_status(&stages);
        HealthResponse {
            status,
            components: stages,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.running {
            return ReadinessResponse {
                ready: false,
                reason: Some("Pipeline not yet started".to_string()),
            };
        }

        let mut failing: Vec<&str> = state
            .stages
            .iter()
            .filter(|(_, s)| s.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        if failing.is_empty() {
            return ReadinessResponse {
                ready: true,
                reason: None,
            };
        }
        failing.sort_unstable();
        ReadinessResponse {
            ready: false,
            reason: Some(format!("Unhealthy: {}", failing.join(", "))),
        }
    }
}
