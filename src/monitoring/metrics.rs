//! Metrics and Alerts
//!
//! Follows the event feed to keep per-execution counters, raises timeout
//! and resource alerts, and derives a coarse health signal. Alerts are
//! side signals only; they never change an execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::execution::{EventBus, ExecutionMetrics, ExecutionStatus, StepStatus, WorkflowEvent};

use super::resource::ResourceMonitor;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Timeout,
    Resource,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub execution_id: Option<String>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    fn new(kind: AlertKind, execution_id: Option<String>, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            execution_id,
            message,
            raised_at: now,
            acknowledged: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Counters summed over every observed execution.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AggregateTotals {
    pub executions: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub total_retries: u32,
}

#[derive(Debug, Clone)]
struct TrackedExecution {
    workflow_id: String,
    status: ExecutionStatus,
    started_at: DateTime<Utc>,
    steps: HashMap<String, StepStatus>,
    retries: u32,
    metrics: ExecutionMetrics,
    timeout_alerted: bool,
}

impl TrackedExecution {
    fn new(workflow_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            started_at: now,
            steps: HashMap::new(),
            retries: 0,
            metrics: ExecutionMetrics::default(),
            timeout_alerted: false,
        }
    }

    fn set_step(&mut self, step_id: &str, status: StepStatus) {
        self.steps.insert(step_id.to_string(), status);

        let count = |wanted: StepStatus| self.steps.values().filter(|s| **s == wanted).count();
        self.metrics.total_steps = self.metrics.total_steps.max(self.steps.len());
        self.metrics.completed_steps = count(StepStatus::Completed);
        self.metrics.failed_steps = count(StepStatus::Failed);
        self.metrics.skipped_steps = count(StepStatus::Skipped);
        self.metrics.total_retries = self.retries;
    }

    /// Terminal events carry exact metrics; they replace the running tally.
    fn finish(&mut self, status: ExecutionStatus, metrics: &ExecutionMetrics) {
        self.status = status;
        self.metrics = metrics.clone();
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    executions: HashMap<String, TrackedExecution>,
    alerts: Vec<Alert>,
}

/// Per-execution counters and monitoring alerts.
#[derive(Debug)]
pub struct MetricsAggregator {
    config: MonitorConfig,
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MetricsState::default()),
        }
    }

    pub fn observe(&self, event: &WorkflowEvent) {
        self.observe_at(event, Utc::now());
    }

    /// Applies one event, timestamped `now`.
    pub fn observe_at(&self, event: &WorkflowEvent, now: DateTime<Utc>) {
        let mut state = self.lock();
        let tracked = state
            .executions
            .entry(event.execution_id().to_string())
            .or_insert_with(|| TrackedExecution::new(event.workflow_id(), now));

        match event {
            WorkflowEvent::ExecutionStarted { .. } => tracked.started_at = now,
            WorkflowEvent::StepStarted { step_id, .. } => tracked.set_step(step_id, StepStatus::Running),
            WorkflowEvent::StepCompleted { step_id, .. } => tracked.set_step(step_id, StepStatus::Completed),
            WorkflowEvent::StepSkipped { step_id, .. } => tracked.set_step(step_id, StepStatus::Skipped),
            WorkflowEvent::StepFailed { step_id, .. } => tracked.set_step(step_id, StepStatus::Failed),
            WorkflowEvent::StepRetrying { step_id, .. } => {
                tracked.retries += 1;
                tracked.set_step(step_id, StepStatus::Pending);
            }
            WorkflowEvent::AlternativeSuggested { .. } => {}
            WorkflowEvent::ExecutionPaused { .. } => tracked.status = ExecutionStatus::Paused,
            WorkflowEvent::ExecutionResumed { .. } => tracked.status = ExecutionStatus::Running,
            WorkflowEvent::ExecutionCompleted { metrics, .. } => {
                tracked.finish(ExecutionStatus::Completed, metrics)
            }
            WorkflowEvent::ExecutionFailed { metrics, .. } => tracked.finish(ExecutionStatus::Failed, metrics),
            WorkflowEvent::ExecutionCancelled { metrics, .. } => {
                tracked.finish(ExecutionStatus::Cancelled, metrics)
            }
        }
    }

    /// Raises a timeout alert for every running execution older than the
    /// configured limit. Each execution alerts at most once.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let limit = self.config.execution_timeout();
        let mut state = self.lock();
        let mut raised = Vec::new();

        for (execution_id, tracked) in state.executions.iter_mut() {
            if tracked.status != ExecutionStatus::Running || tracked.timeout_alerted {
                continue;
            }
            let elapsed = now - tracked.started_at;
            if elapsed > limit {
                tracked.timeout_alerted = true;
                let message = format!(
                    "Execution {} of '{}' running for {}s (limit {}s)",
                    execution_id,
                    tracked.workflow_id,
                    elapsed.num_seconds(),
                    self.config.execution_timeout_secs
                );
                warn!("{}", message);
                raised.push(Alert::new(AlertKind::Timeout, Some(execution_id.clone()), message, now));
            }
        }

        state.alerts.extend(raised.iter().cloned());
        raised
    }

    /// Records a memory usage ratio and raises a resource alert when it is
    /// above the threshold, unless one is already active.
    pub fn record_resource_ratio(&self, ratio: f64) -> Option<Alert> {
        if ratio <= self.config.resource_threshold {
            return None;
        }

        let mut state = self.lock();
        let active = state
            .alerts
            .iter()
            .any(|a| a.kind == AlertKind::Resource && !a.acknowledged);
        if active {
            debug!("Resource usage still high ({:.0}%)", ratio * 100.0);
            return None;
        }

        let message = format!(
            "Memory usage at {:.0}% (threshold {:.0}%)",
            ratio * 100.0,
            self.config.resource_threshold * 100.0
        );
        warn!("{}", message);
        let alert = Alert::new(AlertKind::Resource, None, message, Utc::now());
        state.alerts.push(alert.clone());
        Some(alert)
    }

    /// Samples the monitor and records its memory ratio.
    pub fn sample_resources(&self, monitor: &mut ResourceMonitor) -> Option<Alert> {
        let sample = monitor.sample()?;
        self.record_resource_ratio(sample.memory_ratio)
    }

    /// Degraded while an alert is unacknowledged or too many finished
    /// executions failed.
    pub fn health(&self) -> HealthStatus {
        let state = self.lock();
        if state.alerts.iter().any(|a| !a.acknowledged) {
            return HealthStatus::Degraded;
        }

        let finished: Vec<_> = state
            .executions
            .values()
            .filter(|t| t.status.is_terminal())
            .collect();
        if finished.is_empty() {
            return HealthStatus::Healthy;
        }

        let failed = finished
            .iter()
            .filter(|t| t.status == ExecutionStatus::Failed)
            .count();
        if failed as f64 / finished.len() as f64 > self.config.degraded_failure_ratio {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn metrics_for(&self, execution_id: &str) -> Option<ExecutionMetrics> {
        self.lock()
            .executions
            .get(execution_id)
            .map(|t| t.metrics.clone())
    }

    pub fn totals(&self) -> AggregateTotals {
        let state = self.lock();
        let mut totals = AggregateTotals {
            executions: state.executions.len(),
            ..AggregateTotals::default()
        };

        for tracked in state.executions.values() {
            match tracked.status {
                ExecutionStatus::Running | ExecutionStatus::Paused => totals.running += 1,
                ExecutionStatus::Completed => totals.completed += 1,
                ExecutionStatus::Failed => totals.failed += 1,
                ExecutionStatus::Cancelled => totals.cancelled += 1,
            }
            totals.completed_steps += tracked.metrics.completed_steps;
            totals.failed_steps += tracked.metrics.failed_steps;
            totals.skipped_steps += tracked.metrics.skipped_steps;
            totals.total_retries += tracked.metrics.total_retries;
        }
        totals
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.lock()
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Returns false if no alert has this id.
    pub fn acknowledge(&self, alert_id: &str) -> bool {
        match self.lock().alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Follows `bus` on a background task until the bus closes.
    pub fn spawn_listener(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.observe(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Metrics listener lagged, {} events dropped", missed)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
