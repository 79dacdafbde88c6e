//! Component health and the read-only status report.
//!
//! The flush path marks the sink degraded when a drain loses batches and
//! healthy again after a clean drain. [`StatusReport`] combines that with a
//! buffer snapshot and the configured thresholds for the health endpoint.

use crate::buffer::{BufferSnapshot, FlushPolicy};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Monitored parts of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Record source feeding the ingestion boundary
    Source,
    /// In-memory partition buffer
    Buffer,
    /// Durable storage writer
    Sink,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Source => "source",
            Component::Buffer => "buffer",
            Component::Sink => "sink",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// No report yet
    Unknown,
}

impl ComponentStatus {
    /// Lowercase label for JSON bodies.
    pub fn label(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    /// Reason attached to a degraded or unhealthy status.
    pub fn message(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(msg) | ComponentStatus::Unhealthy(msg) => Some(msg),
            ComponentStatus::Healthy | ComponentStatus::Unknown => None,
        }
    }
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

#[derive(Debug, Clone)]
struct Entry {
    status: ComponentStatus,
    changed_at: Instant,
}

/// Health registry shared by the engine and the HTTP surface.
pub struct HealthCheck {
    components: RwLock<BTreeMap<Component, Entry>>,
    running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a registry with every component in `Unknown`.
    pub fn new() -> Self {
        let now = Instant::now();
        let components = [Component::Source, Component::Buffer, Component::Sink]
            .into_iter()
            .map(|c| {
                (
                    c,
                    Entry {
                        status: ComponentStatus::Unknown,
                        changed_at: now,
                    },
                )
            })
            .collect();
        Self {
            components: RwLock::new(components),
            running: RwLock::new(false),
        }
    }

    fn set(&self, component: Component, status: ComponentStatus) {
        let mut components = self.components.write();
        let entry = components.entry(component).or_insert_with(|| Entry {
            status: ComponentStatus::Unknown,
            changed_at: Instant::now(),
        });
        if entry.status != status {
            entry.status = status;
            entry.changed_at = Instant::now();
        }
    }

    pub fn mark_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, component: Component, reason: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded(reason.into()));
    }

    pub fn mark_unhealthy(&self, component: Component, reason: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy(reason.into()));
    }

    /// Status of one component.
    pub fn status_of(&self, component: Component) -> ComponentStatus {
        self.components
            .read()
            .get(&component)
            .map(|e| e.status.clone())
            .unwrap_or(ComponentStatus::Unknown)
    }

    /// Seconds since the component last changed status.
    pub fn seconds_in_status(&self, component: Component) -> Option<u64> {
        self.components
            .read()
            .get(&component)
            .map(|e| e.changed_at.elapsed().as_secs())
    }

    /// All component statuses, ordered by component.
    pub fn all_statuses(&self) -> Vec<(Component, ComponentStatus)> {
        self.components
            .read()
            .iter()
            .map(|(c, e)| (*c, e.status.clone()))
            .collect()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for entry in components.values() {
            match entry.status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    pub fn set_running(&self, running: bool) {
        *self.running.write() = running;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Configured thresholds, echoed back by the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdsReport {
    pub flush_interval_seconds: u64,
    pub max_lines_per_flush: usize,
}

/// One component's entry in the status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Read-only status snapshot served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub pending_records: usize,
    pub partitions: usize,
    pub generation: u64,
    pub seconds_since_last_flush: u64,
    pub config: ThresholdsReport,
    pub components: BTreeMap<Component, ComponentReport>,
}

impl StatusReport {
    /// Assemble a report. Takes no locks beyond the health registry's.
    pub fn new(snapshot: &BufferSnapshot, policy: &FlushPolicy, health: &HealthCheck) -> Self {
        let components = health
            .all_statuses()
            .into_iter()
            .map(|(c, s)| {
                (
                    c,
                    ComponentReport {
                        status: s.label(),
                        message: s.message().map(str::to_string),
                    },
                )
            })
            .collect();

        Self {
            status: health.overall_status(),
            timestamp: Utc::now(),
            pending_records: snapshot.pending,
            partitions: snapshot.partitions,
            generation: snapshot.generation,
            seconds_since_last_flush: snapshot.since_last_flush.as_secs(),
            config: ThresholdsReport {
                flush_interval_seconds: policy.time_threshold.as_secs(),
                max_lines_per_flush: policy.count_threshold,
            },
            components,
        }
    }
}
