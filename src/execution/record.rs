//! Execution Records
//!
//! Mutable per-run state: the execution itself, one record per step and
//! the derived metrics. Records are owned by the engine while a run is in
//! progress; everyone else sees cloned snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::recovery::WorkflowError;
use crate::workflow::{Results, Variables, WorkflowDefinition, WorkflowStep};

/// Status of a whole execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Per-step execution record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StepExecution {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.duration_ms = None;
    }

    pub fn complete(&mut self, output: Value) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.finish_timing();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(message.into());
        self.finish_timing();
    }

    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.finish_timing();
    }

    /// Makes the step eligible to run again, keeping its retry count and
    /// last error.
    pub fn requeue(&mut self) {
        self.status = StepStatus::Pending;
    }

    /// Clears everything a run produced. Used by rollback.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
        self.output = None;
        self.error = None;
    }

    fn finish_timing(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
    }
}

/// Counters derived from the step records.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionMetrics {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub total_retries: u32,
    pub duration_ms: Option<u64>,
}

/// One run of a workflow against a specific variable set.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub variables: Variables,
    pub steps: Vec<StepExecution>,

    /// Outputs of completed steps, keyed by step id
    pub results: Results,
    pub metrics: ExecutionMetrics,
    pub error: Option<String>,

    /// Every failure raised during the run, in order
    pub errors: Vec<WorkflowError>,

    /// Fallback step ids suggested by alternative recovery
    pub fallback_steps: Vec<String>,
}

impl WorkflowExecution {
    /// Creates a running execution with one pending record per step.
    pub fn new(definition: &WorkflowDefinition, variables: Variables) -> Self {
        let mut execution = Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: definition.id.clone(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            variables,
            steps: definition
                .steps
                .iter()
                .map(|s| StepExecution::new(s.id.clone()))
                .collect(),
            results: Results::new(),
            metrics: ExecutionMetrics::default(),
            error: None,
            errors: Vec::new(),
            fallback_steps: Vec::new(),
        };
        execution.refresh_metrics();
        execution
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// True if every dependency of `step` has a completed record.
    pub fn dependencies_met(&self, step: &WorkflowStep) -> bool {
        step.dependencies.iter().all(|dep| {
            self.step(dep)
                .is_some_and(|record| record.status == StepStatus::Completed)
        })
    }

    /// Marks every recorded error of a step as resolved.
    pub fn resolve_errors(&mut self, step_id: &str) {
        for error in self.errors.iter_mut().filter(|e| e.step_id == step_id) {
            error.resolved = true;
        }
    }

    /// Recounts metrics from the step records.
    pub fn refresh_metrics(&mut self) {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();

        self.metrics.total_steps = self.steps.len();
        self.metrics.completed_steps = count(StepStatus::Completed);
        self.metrics.failed_steps = count(StepStatus::Failed);
        self.metrics.skipped_steps = count(StepStatus::Skipped);
        self.metrics.total_retries = self.steps.iter().map(|s| s.retry_count).sum();
    }

    /// Moves the execution to a terminal status and records its duration.
    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.refresh_metrics();
        self.metrics.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    /// Completed with at least one step actually completed.
    ///
    /// A run where every step was skipped still ends `completed` but is
    /// not considered a success.
    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.metrics.completed_steps > 0
    }

    /// Running time so far, or total duration once finished.
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepType;
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new("wf", "wf")
            .with_step(WorkflowStep::new("a", StepType::Condition))
            .with_step(WorkflowStep::new("b", StepType::Condition).depends_on("a"))
    }

    #[test]
    fn test_new_execution_has_pending_records() {
        let execution = WorkflowExecution::new(&definition(), Variables::new());

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.steps.len(), 2);
        assert!(execution.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(execution.metrics.total_steps, 2);
    }

    #[test]
    fn test_dependencies_met() {
        let def = definition();
        let mut execution = WorkflowExecution::new(&def, Variables::new());
        assert!(!execution.dependencies_met(&def.steps[1]));

        execution.step_mut("a").unwrap().complete(json!(true));
        assert!(execution.dependencies_met(&def.steps[1]));
    }

    #[test]
    fn test_skipped_dependency_is_not_met() {
        let def = definition();
        let mut execution = WorkflowExecution::new(&def, Variables::new());
        execution.step_mut("a").unwrap().skip();
        assert!(!execution.dependencies_met(&def.steps[1]));
    }

    #[test]
    fn test_step_timing() {
        let mut record = StepExecution::new("a");
        record.start();
        record.complete(json!(1));

        assert_eq!(record.status, StepStatus::Completed);
        assert!(record.completed_at.is_some());
        assert!(record.duration_ms.is_some());
    }

    #[test]
    fn test_reset_clears_run_output() {
        let mut record = StepExecution::new("a");
        record.start();
        record.fail("boom");
        record.retry_count = 2;
        record.reset();

        assert_eq!(record.status, StepStatus::Pending);
        assert!(record.error.is_none());
        assert_eq!(record.retry_count, 2);
    }

    #[test]
    fn test_finish_records_metrics() {
        let mut execution = WorkflowExecution::new(&definition(), Variables::new());
        execution.step_mut("a").unwrap().complete(json!(1));
        execution.step_mut("b").unwrap().skip();
        execution.finish(ExecutionStatus::Completed);

        assert_eq!(execution.metrics.completed_steps, 1);
        assert_eq!(execution.metrics.skipped_steps, 1);
        assert!(execution.metrics.duration_ms.is_some());
        assert!(execution.is_successful());
    }

    #[test]
    fn test_all_skipped_is_not_successful() {
        let mut execution = WorkflowExecution::new(&definition(), Variables::new());
        for record in &mut execution.steps {
            record.skip();
        }
        execution.finish(ExecutionStatus::Completed);
        assert!(!execution.is_successful());
    }

    #[test]
    fn test_status_terminal() {
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }
}
