//! Execution event feed
//!
//! Every transition of an execution is published on a broadcast channel.
//! Observers such as the notification hub and the metrics aggregator
//! subscribe to it; publishing without subscribers is a no-op.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::recovery::WorkflowError;

use super::record::ExecutionMetrics;

/// Why a step was skipped.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DependenciesUnmet,
    ConditionFalse,
    Recovery,
}

/// A transition observed during an execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: String,
        workflow_id: String,
    },
    StepStarted {
        execution_id: String,
        workflow_id: String,
        step_id: String,
    },
    StepCompleted {
        execution_id: String,
        workflow_id: String,
        step_id: String,
        duration_ms: Option<u64>,
    },
    StepSkipped {
        execution_id: String,
        workflow_id: String,
        step_id: String,
        reason: SkipReason,
    },
    StepFailed {
        execution_id: String,
        workflow_id: String,
        step_id: String,
        error: WorkflowError,
    },
    StepRetrying {
        execution_id: String,
        workflow_id: String,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    AlternativeSuggested {
        execution_id: String,
        workflow_id: String,
        step_id: String,
        fallback_steps: Vec<String>,
        notify_user: bool,
    },
    ExecutionPaused {
        execution_id: String,
        workflow_id: String,
        step_id: Option<String>,
    },
    ExecutionResumed {
        execution_id: String,
        workflow_id: String,
    },
    ExecutionCompleted {
        execution_id: String,
        workflow_id: String,
        metrics: ExecutionMetrics,
    },
    ExecutionFailed {
        execution_id: String,
        workflow_id: String,
        error: String,
        metrics: ExecutionMetrics,
    },
    ExecutionCancelled {
        execution_id: String,
        workflow_id: String,
        metrics: ExecutionMetrics,
    },
}

impl WorkflowEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::StepRetrying { execution_id, .. }
            | Self::AlternativeSuggested { execution_id, .. }
            | Self::ExecutionPaused { execution_id, .. }
            | Self::ExecutionResumed { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. } => execution_id,
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::ExecutionStarted { workflow_id, .. }
            | Self::StepStarted { workflow_id, .. }
            | Self::StepCompleted { workflow_id, .. }
            | Self::StepSkipped { workflow_id, .. }
            | Self::StepFailed { workflow_id, .. }
            | Self::StepRetrying { workflow_id, .. }
            | Self::AlternativeSuggested { workflow_id, .. }
            | Self::ExecutionPaused { workflow_id, .. }
            | Self::ExecutionResumed { workflow_id, .. }
            | Self::ExecutionCompleted { workflow_id, .. }
            | Self::ExecutionFailed { workflow_id, .. }
            | Self::ExecutionCancelled { workflow_id, .. } => workflow_id,
        }
    }

    /// Step the event concerns, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepSkipped { step_id, .. }
            | Self::StepFailed { step_id, .. }
            | Self::StepRetrying { step_id, .. }
            | Self::AlternativeSuggested { step_id, .. } => Some(step_id),
            Self::ExecutionPaused { step_id, .. } => step_id.as_deref(),
            _ => None,
        }
    }

    /// Emitting component: `workflow` for execution-level events, `step`
    /// for step-level ones.
    pub fn source(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. }
            | Self::ExecutionPaused { .. }
            | Self::ExecutionResumed { .. }
            | Self::ExecutionCompleted { .. }
            | Self::ExecutionFailed { .. }
            | Self::ExecutionCancelled { .. } => "workflow",
            _ => "step",
        }
    }

    /// Short status label of the transition.
    pub fn status(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } | Self::StepStarted { .. } => "started",
            Self::StepCompleted { .. } | Self::ExecutionCompleted { .. } => "completed",
            Self::StepSkipped { .. } => "skipped",
            Self::StepFailed { .. } | Self::ExecutionFailed { .. } => "failed",
            Self::StepRetrying { .. } => "retrying",
            Self::AlternativeSuggested { .. } => "alternative",
            Self::ExecutionPaused { .. } => "paused",
            Self::ExecutionResumed { .. } => "resumed",
            Self::ExecutionCancelled { .. } => "cancelled",
        }
    }
}

/// Broadcast channel carrying [`WorkflowEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Creates a bus whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
