//! Recovery Strategies
//!
//! Resolves a classified failure to exactly one [`RecoveryStrategy`] and
//! applies it to the execution records.
//!
//! # Default table
//!
//! | error type   | strategy                                   |
//! |--------------|--------------------------------------------|
//! | `network`    | retry, 3 attempts, 1000 ms, x2 backoff     |
//! | `timeout`    | retry, 2 attempts, 5000 ms, x2 backoff     |
//! | `validation` | skip                                       |
//! | `system`     | alternative, no fallback steps, notify     |
//! | `execution`  | step retry policy if any, otherwise abort  |
//!
//! A step's own retry policy overrides the table's retry parameters, and a
//! spent retry budget always downgrades retry (and rollback) to skip.

use std::collections::HashMap;
use std::sync::RwLock;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::execution::record::{ExecutionStatus, StepExecution, WorkflowExecution};
use crate::workflow::{RetryPolicy, WorkflowStep};

use super::classifier::{ErrorClassifier, ErrorType, HeuristicClassifier};
use super::record::WorkflowError;

/// Policy chosen in response to a classified step failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-run the step in place after an exponential backoff.
    Retry {
        max_attempts: u32,
        delay_ms: u64,
        backoff_multiplier: f64,
    },
    /// Mark the step skipped and move on.
    Skip,
    /// Reset the `steps` records preceding the failed step and re-run
    /// from the earliest of them.
    Rollback { steps: usize, max_attempts: u32 },
    /// Leave the step failed, record fallback step ids and tell the user.
    Alternative {
        #[serde(default)]
        fallback_steps: Vec<String>,
        #[serde(default = "default_notify")]
        notify_user: bool,
    },
    /// Pause the execution until it is resumed by the caller.
    Manual,
}

fn default_notify() -> bool {
    true
}

impl RecoveryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::Skip => "skip",
            Self::Rollback { .. } => "rollback",
            Self::Alternative { .. } => "alternative",
            Self::Manual => "manual",
        }
    }

    /// Retry budget carried by the strategy itself.
    fn budget(&self) -> Option<u32> {
        match self {
            Self::Retry { max_attempts, .. } | Self::Rollback { max_attempts, .. } => {
                Some(*max_attempts)
            }
            _ => None,
        }
    }
}

impl From<RetryPolicy> for RecoveryStrategy {
    fn from(policy: RetryPolicy) -> Self {
        Self::Retry {
            max_attempts: policy.max_attempts,
            delay_ms: policy.delay_ms,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

/// What the engine must do after a strategy was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Wait, then re-run the same step.
    Retry { attempt: u32, delay_ms: u64 },
    /// Step skipped; continue with the next one.
    Skip,
    /// Continue the loop from this step index.
    Rollback { restart_at: usize },
    /// Step stays failed; continue with the next one.
    Alternative {
        fallback_steps: Vec<String>,
        notify_user: bool,
    },
    /// Execution paused; stop driving it.
    Pause,
    /// No strategy applies; the execution fails.
    Abort { message: String },
}

/// Default error type -> strategy table.
pub fn default_table() -> HashMap<ErrorType, RecoveryStrategy> {
    HashMap::from([
        (
            ErrorType::Network,
            RecoveryStrategy::Retry {
                max_attempts: 3,
                delay_ms: 1000,
                backoff_multiplier: 2.0,
            },
        ),
        (
            ErrorType::Timeout,
            RecoveryStrategy::Retry {
                max_attempts: 2,
                delay_ms: 5000,
                backoff_multiplier: 2.0,
            },
        ),
        (ErrorType::Validation, RecoveryStrategy::Skip),
        (
            ErrorType::System,
            RecoveryStrategy::Alternative {
                fallback_steps: Vec::new(),
                notify_user: true,
            },
        ),
    ])
}

/// Classifies failures and resolves them to recovery strategies.
///
/// The strategy table can be overridden per error type at any time.
pub struct RecoveryResolver {
    table: RwLock<HashMap<ErrorType, RecoveryStrategy>>,
    classifier: Box<dyn ErrorClassifier>,
}

impl RecoveryResolver {
    /// Resolver with the default table and the keyword classifier.
    pub fn new() -> Self {
        Self::with_classifier(HeuristicClassifier)
    }

    pub fn with_classifier(classifier: impl ErrorClassifier + 'static) -> Self {
        Self {
            table: RwLock::new(default_table()),
            classifier: Box::new(classifier),
        }
    }

    pub fn set_strategy(&self, error_type: ErrorType, strategy: RecoveryStrategy) {
        info!("Recovery for {} errors set to {}", error_type, strategy.name());
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(error_type, strategy);
    }

    pub fn remove_strategy(&self, error_type: ErrorType) -> Option<RecoveryStrategy> {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&error_type)
    }

    pub fn strategy_for(&self, error_type: ErrorType) -> Option<RecoveryStrategy> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&error_type)
            .cloned()
    }

    /// Builds the failure record for a step that just failed.
    pub fn record_failure(
        &self,
        execution_id: &str,
        step: &WorkflowStep,
        record: &StepExecution,
        message: &str,
    ) -> WorkflowError {
        let error_type = self.classifier.classify(message);
        let severity = self.classifier.severity(message);
        let budget = self.retry_budget(error_type, step);

        WorkflowError::new(execution_id, &step.id, error_type, severity, message)
            .with_retries(record.retry_count, budget)
    }

    /// Resolves the strategy for a failure.
    ///
    /// Returns `None` when nothing applies, which aborts the execution.
    pub fn resolve(&self, error: &WorkflowError, step: &WorkflowStep) -> Option<RecoveryStrategy> {
        let nominal = self
            .strategy_for(error.error_type)
            .or_else(|| step.retry.map(RecoveryStrategy::from))?;

        let strategy = match (nominal, step.retry) {
            (RecoveryStrategy::Retry { .. }, Some(policy)) => RecoveryStrategy::from(policy),
            (other, _) => other,
        };

        if strategy.budget().is_some() && error.retries_exhausted() {
            info!(
                "Step '{}' spent its retry budget ({}/{}); skipping instead of {}",
                error.step_id,
                error.retry_count,
                error.max_retries,
                strategy.name()
            );
            return Some(RecoveryStrategy::Skip);
        }

        debug!(
            "Resolved {} error on step '{}' to {}",
            error.error_type,
            error.step_id,
            strategy.name()
        );
        Some(strategy)
    }

    /// Applies a resolved strategy to the record of the step at `index`.
    ///
    /// The record is expected to be in the failed state already.
    pub fn apply(
        &self,
        strategy: Option<&RecoveryStrategy>,
        execution: &mut WorkflowExecution,
        index: usize,
    ) -> RecoveryAction {
        let action = match strategy {
            Some(RecoveryStrategy::Retry {
                delay_ms,
                backoff_multiplier,
                max_attempts,
            }) => {
                let policy = RetryPolicy::new(*max_attempts, *delay_ms, *backoff_multiplier);
                let record = &mut execution.steps[index];
                let delay_ms = policy.delay_for(record.retry_count);
                record.retry_count += 1;
                record.requeue();
                RecoveryAction::Retry {
                    attempt: record.retry_count,
                    delay_ms,
                }
            }
            Some(RecoveryStrategy::Skip) => {
                let step_id = execution.steps[index].step_id.clone();
                execution.steps[index].skip();
                execution.resolve_errors(&step_id);
                RecoveryAction::Skip
            }
            Some(RecoveryStrategy::Rollback { steps, .. }) => {
                let restart_at = index.saturating_sub(*steps);
                for record in &mut execution.steps[restart_at..index] {
                    execution.results.remove(&record.step_id);
                    record.reset();
                }
                let record = &mut execution.steps[index];
                record.retry_count += 1;
                record.requeue();
                warn!(
                    "Rolling back {} step(s) before '{}'",
                    index - restart_at,
                    record.step_id
                );
                RecoveryAction::Rollback { restart_at }
            }
            Some(RecoveryStrategy::Alternative {
                fallback_steps,
                notify_user,
            }) => {
                for fallback in fallback_steps {
                    if !execution.fallback_steps.contains(fallback) {
                        execution.fallback_steps.push(fallback.clone());
                    }
                }
                RecoveryAction::Alternative {
                    fallback_steps: fallback_steps.clone(),
                    notify_user: *notify_user,
                }
            }
            Some(RecoveryStrategy::Manual) => {
                execution.steps[index].requeue();
                execution.status = ExecutionStatus::Paused;
                RecoveryAction::Pause
            }
            None => {
                let record = &execution.steps[index];
                let message = format!(
                    "Step '{}' failed: {}",
                    record.step_id,
                    record.error.as_deref().unwrap_or("unknown error")
                );
                RecoveryAction::Abort { message }
            }
        };

        execution.refresh_metrics();
        action
    }

    /// Retry budget for a failure of `error_type` on `step`.
    fn retry_budget(&self, error_type: ErrorType, step: &WorkflowStep) -> u32 {
        let nominal = self.strategy_for(error_type);
        match (step.retry, nominal.as_ref()) {
            (Some(policy), Some(RecoveryStrategy::Retry { .. }) | None) => policy.max_attempts,
            (_, Some(strategy)) => strategy.budget().unwrap_or(0),
            (None, None) => 0,
        }
    }
}

impl Default for RecoveryResolver {
    fn default() -> Self {
        Self::new()
    }
}
