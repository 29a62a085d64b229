//! Workflow Execution Engine
//!
//! Drives executions from start to a terminal state:
//! - Declaration-order traversal with dependency and condition gating
//! - Placeholder resolution and handler dispatch per step
//! - Failure classification and recovery (retry, skip, rollback, ...)
//! - Cooperative pause/resume/cancel checked at every step boundary
//!
//! Steps of one execution run strictly one at a time. Independent
//! executions may be driven concurrently from different tasks; they share
//! nothing but the execution table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::recovery::{ErrorType, RecoveryAction, RecoveryResolver, RecoveryStrategy};
use crate::workflow::condition::evaluate;
use crate::workflow::resolver::resolve_config;
use crate::workflow::{Variables, WorkflowDefinition, WorkflowRegistry};

use super::error::EngineError;
use super::events::{EventBus, SkipReason, WorkflowEvent};
use super::handlers::HandlerRegistry;
use super::record::{ExecutionStatus, StepStatus, WorkflowExecution};

/// Advisory flags shared between the driving task and the control API.
#[derive(Debug, Default)]
struct ExecutionControl {
    token: CancellationToken,
    paused: AtomicBool,
}

/// Outcome of a step-boundary check.
enum Boundary {
    Continue,
    Stop,
}

/// Workflow execution engine.
///
/// Owns the definition registry, the handler table, the recovery resolver
/// and the table of execution snapshots. Share it behind an `Arc` to drive
/// and control executions from several tasks.
///
/// # Example
///
/// ```rust,no_run
/// use stepwise::config::EngineConfig;
/// use stepwise::execution::{Engine, HandlerRegistry};
/// use stepwise::load_definition;
/// use stepwise::workflow::{OrderingMode, Variables};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("workflow.yaml", OrderingMode::Declaration)?;
///     let engine = Engine::new(&EngineConfig::default(), HandlerRegistry::with_builtins());
///     engine.register(definition.clone())?;
///
///     let execution = engine.execute(&definition.id, Variables::new()).await?;
///     println!("{}", execution.status);
///     Ok(())
/// }
/// ```
pub struct Engine {
    registry: WorkflowRegistry,
    handlers: HandlerRegistry,
    recovery: RecoveryResolver,
    executions: DashMap<String, WorkflowExecution>,
    controls: DashMap<String, Arc<ExecutionControl>>,
    events: EventBus,
}

impl Engine {
    pub fn new(config: &EngineConfig, handlers: HandlerRegistry) -> Self {
        Self {
            registry: WorkflowRegistry::new(config.ordering),
            handlers,
            recovery: RecoveryResolver::new(),
            executions: DashMap::new(),
            controls: DashMap::new(),
            events: EventBus::new(config.event_capacity),
        }
    }

    /// Replaces the recovery resolver (custom classifier or table).
    pub fn with_recovery(mut self, recovery: RecoveryResolver) -> Self {
        self.recovery = recovery;
        self
    }

    /// Event feed of every execution driven by this engine.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn recovery(&self) -> &RecoveryResolver {
        &self.recovery
    }

    /// Overrides the recovery strategy for one error type.
    pub fn set_recovery_strategy(&self, error_type: ErrorType, strategy: RecoveryStrategy) {
        self.recovery.set_strategy(error_type, strategy);
    }

    // ---- Management API ----

    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>, EngineError> {
        Ok(self.registry.register(definition)?)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.registry.get(workflow_id)
    }

    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.registry.list_all()
    }

    // ---- Execution API ----

    /// Runs a registered workflow to a terminal state (or until paused).
    ///
    /// Step failures are absorbed into the returned execution. The call
    /// only fails for an unknown workflow, a step type without handler, or
    /// when recovery aborts the run.
    pub async fn execute(
        &self,
        workflow_id: &str,
        variables: Variables,
    ) -> Result<WorkflowExecution, EngineError> {
        let definition = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        if let Some(missing) = self.handlers.missing_for(&definition) {
            return Err(EngineError::HandlerNotRegistered(missing));
        }

        let execution = WorkflowExecution::new(&definition, variables);
        let control = Arc::new(ExecutionControl::default());
        self.controls.insert(execution.id.clone(), Arc::clone(&control));
        self.sync(&execution);

        info!(
            "Starting execution {} of '{}' ({} steps)",
            execution.id,
            definition.id,
            definition.steps.len()
        );
        self.events.publish(WorkflowEvent::ExecutionStarted {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
        });

        self.drive(&definition, execution, &control).await
    }

    /// Requests a pause. The driving task stops at the next step boundary.
    pub fn pause(&self, execution_id: &str) -> Result<(), EngineError> {
        let status = self.status_of(execution_id)?;
        match status {
            ExecutionStatus::Running => {
                if let Some(control) = self.controls.get(execution_id) {
                    control.paused.store(true, Ordering::SeqCst);
                }
                info!("Pause requested for execution {}", execution_id);
                Ok(())
            }
            ExecutionStatus::Paused => Ok(()),
            _ => Err(EngineError::invalid_state(execution_id, status, "paused")),
        }
    }

    /// Continues a paused execution from its first non-terminal step.
    ///
    /// A pause that was requested but not yet reached is simply withdrawn.
    pub async fn resume(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
        let control = self
            .controls
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()));

        let execution = {
            let mut entry = self
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

            match entry.status {
                ExecutionStatus::Paused => {
                    entry.status = ExecutionStatus::Running;
                    entry.clone()
                }
                ExecutionStatus::Running => {
                    if let Some(control) = &control {
                        control.paused.store(false, Ordering::SeqCst);
                    }
                    return Ok(entry.clone());
                }
                status => return Err(EngineError::invalid_state(execution_id, status, "resumed")),
            }
        };

        let control = control.unwrap_or_default();
        control.paused.store(false, Ordering::SeqCst);
        self.controls.insert(execution.id.clone(), Arc::clone(&control));

        let definition = self
            .registry
            .get(&execution.workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(execution.workflow_id.clone()))?;

        info!("Resuming execution {}", execution.id);
        self.events.publish(WorkflowEvent::ExecutionResumed {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
        });

        self.drive(&definition, execution, &control).await
    }

    /// Cancels an execution.
    ///
    /// A paused execution is finalized immediately; a running one stops at
    /// its next boundary or as soon as the in-flight step yields.
    pub fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        if let Some(control) = self.controls.get(execution_id) {
            if let Some(entry) = self.executions.get(execution_id) {
                if entry.status == ExecutionStatus::Running {
                    control.token.cancel();
                    info!("Cancellation requested for execution {}", execution_id);
                    return Ok(());
                }
            }
        }

        let finished = {
            let mut entry = self
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

            match entry.status {
                ExecutionStatus::Paused | ExecutionStatus::Running => {
                    entry.finish(ExecutionStatus::Cancelled);
                    entry.clone()
                }
                status => return Err(EngineError::invalid_state(execution_id, status, "cancelled")),
            }
        };

        if let Some((_, control)) = self.controls.remove(execution_id) {
            control.token.cancel();
        }
        info!("Execution {} cancelled", execution_id);
        self.publish_cancelled(&finished);
        Ok(())
    }

    /// Snapshot of an execution.
    pub fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.executions.get(execution_id).map(|entry| entry.clone())
    }

    /// Snapshots of every execution, oldest first.
    pub fn list_executions(&self) -> Vec<WorkflowExecution> {
        let mut all: Vec<_> = self.executions.iter().map(|entry| entry.clone()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    // ---- Driving ----

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        mut execution: WorkflowExecution,
        control: &ExecutionControl,
    ) -> Result<WorkflowExecution, EngineError> {
        let mut index = 0;

        while index < definition.steps.len() {
            let step = &definition.steps[index];

            if execution.steps[index].status.is_terminal() {
                index += 1;
                continue;
            }

            if let Boundary::Stop = self.check_boundary(&mut execution, control, Some(&step.id)) {
                return Ok(execution);
            }

            if !execution.dependencies_met(step) {
                self.skip_step(&mut execution, index, SkipReason::DependenciesUnmet);
                index += 1;
                continue;
            }

            if let Some(condition) = &step.condition {
                if !evaluate(condition, &execution.variables, &execution.results) {
                    self.skip_step(&mut execution, index, SkipReason::ConditionFalse);
                    index += 1;
                    continue;
                }
            }

            let handler = self
                .handlers
                .get(step.step_type)
                .ok_or(EngineError::HandlerNotRegistered(step.step_type))?;

            execution.steps[index].start();
            execution.refresh_metrics();
            self.sync(&execution);
            info!("[{}] Step '{}' started ({})", execution.id, step.id, step.step_type);
            self.events.publish(WorkflowEvent::StepStarted {
                execution_id: execution.id.clone(),
                workflow_id: execution.workflow_id.clone(),
                step_id: step.id.clone(),
            });

            let config = resolve_config(&step.config, &execution.variables, &execution.results);
            let outcome = tokio::select! {
                biased;
                _ = control.token.cancelled() => None,
                result = handler.execute(&config, &execution.variables, &execution.results) => Some(result),
            };

            let Some(result) = outcome else {
                warn!("[{}] Step '{}' interrupted by cancellation", execution.id, step.id);
                execution.steps[index].fail("cancelled while running");
                self.finish_cancelled(&mut execution);
                return Ok(execution);
            };

            match result {
                Ok(output) => {
                    execution.results.insert(step.id.clone(), output.clone());
                    execution.steps[index].complete(output);
                    execution.resolve_errors(&step.id);
                    execution.refresh_metrics();

                    let duration_ms = execution.steps[index].duration_ms;
                    info!(
                        "[{}] Step '{}' completed in {}ms",
                        execution.id,
                        step.id,
                        duration_ms.unwrap_or(0)
                    );
                    self.events.publish(WorkflowEvent::StepCompleted {
                        execution_id: execution.id.clone(),
                        workflow_id: execution.workflow_id.clone(),
                        step_id: step.id.clone(),
                        duration_ms,
                    });
                    index += 1;
                }
                Err(err) => {
                    let message = err.to_string();
                    execution.steps[index].fail(&message);

                    let failure =
                        self.recovery
                            .record_failure(&execution.id, step, &execution.steps[index], &message);
                    warn!(
                        "[{}] Step '{}' failed ({} / {}): {}",
                        execution.id, step.id, failure.error_type, failure.severity, message
                    );
                    execution.errors.push(failure.clone());

                    let strategy = self.recovery.resolve(&failure, step);
                    self.events.publish(WorkflowEvent::StepFailed {
                        execution_id: execution.id.clone(),
                        workflow_id: execution.workflow_id.clone(),
                        step_id: step.id.clone(),
                        error: failure,
                    });

                    match self.recovery.apply(strategy.as_ref(), &mut execution, index) {
                        RecoveryAction::Retry { attempt, delay_ms } => {
                            info!(
                                "[{}] Retrying step '{}' (attempt {}) in {}ms",
                                execution.id, step.id, attempt, delay_ms
                            );
                            self.sync(&execution);
                            self.events.publish(WorkflowEvent::StepRetrying {
                                execution_id: execution.id.clone(),
                                workflow_id: execution.workflow_id.clone(),
                                step_id: step.id.clone(),
                                attempt,
                                delay_ms,
                            });

                            if let Boundary::Stop = self.check_boundary(&mut execution, control, Some(&step.id)) {
                                return Ok(execution);
                            }
                            tokio::select! {
                                _ = control.token.cancelled() => {}
                                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                            }
                        }
                        RecoveryAction::Skip => {
                            self.publish_skipped(&execution, &step.id, SkipReason::Recovery);
                            index += 1;
                        }
                        RecoveryAction::Rollback { restart_at } => {
                            index = restart_at;
                        }
                        RecoveryAction::Alternative {
                            fallback_steps,
                            notify_user,
                        } => {
                            info!(
                                "[{}] Step '{}' has fallback steps: {:?}",
                                execution.id, step.id, fallback_steps
                            );
                            self.events.publish(WorkflowEvent::AlternativeSuggested {
                                execution_id: execution.id.clone(),
                                workflow_id: execution.workflow_id.clone(),
                                step_id: step.id.clone(),
                                fallback_steps,
                                notify_user,
                            });
                            index += 1;
                        }
                        RecoveryAction::Pause => {
                            control.paused.store(false, Ordering::SeqCst);
                            self.sync(&execution);
                            info!(
                                "[{}] Execution paused for manual recovery of step '{}'",
                                execution.id, step.id
                            );
                            self.events.publish(WorkflowEvent::ExecutionPaused {
                                execution_id: execution.id.clone(),
                                workflow_id: execution.workflow_id.clone(),
                                step_id: Some(step.id.clone()),
                            });
                            return Ok(execution);
                        }
                        RecoveryAction::Abort { message } => {
                            error!("[{}] Aborting execution: {}", execution.id, message);
                            execution.error = Some(message.clone());
                            execution.finish(ExecutionStatus::Failed);
                            self.sync(&execution);
                            self.controls.remove(&execution.id);
                            self.events.publish(WorkflowEvent::ExecutionFailed {
                                execution_id: execution.id.clone(),
                                workflow_id: execution.workflow_id.clone(),
                                error: message.clone(),
                                metrics: execution.metrics.clone(),
                            });
                            return Err(EngineError::ExecutionFailed {
                                execution_id: execution.id,
                                message,
                            });
                        }
                    }
                }
            }

            self.sync(&execution);
        }

        if let Boundary::Stop = self.check_boundary(&mut execution, control, None) {
            return Ok(execution);
        }
        self.finish_run(&mut execution);
        Ok(execution)
    }

    /// Honors cancellation and pause requests. Cancellation wins.
    fn check_boundary(
        &self,
        execution: &mut WorkflowExecution,
        control: &ExecutionControl,
        step_id: Option<&str>,
    ) -> Boundary {
        if control.token.is_cancelled() {
            self.finish_cancelled(execution);
            return Boundary::Stop;
        }

        if control.paused.swap(false, Ordering::SeqCst) {
            execution.status = ExecutionStatus::Paused;
            self.sync(execution);
            info!("[{}] Execution paused", execution.id);
            self.events.publish(WorkflowEvent::ExecutionPaused {
                execution_id: execution.id.clone(),
                workflow_id: execution.workflow_id.clone(),
                step_id: step_id.map(str::to_string),
            });
            return Boundary::Stop;
        }

        Boundary::Continue
    }

    fn skip_step(&self, execution: &mut WorkflowExecution, index: usize, reason: SkipReason) {
        execution.steps[index].skip();
        execution.refresh_metrics();
        self.sync(execution);

        let step_id = execution.steps[index].step_id.clone();
        debug!("[{}] Step '{}' skipped: {:?}", execution.id, step_id, reason);
        self.publish_skipped(execution, &step_id, reason);
    }

    fn publish_skipped(&self, execution: &WorkflowExecution, step_id: &str, reason: SkipReason) {
        self.events.publish(WorkflowEvent::StepSkipped {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
            step_id: step_id.to_string(),
            reason,
        });
    }

    /// Every step is terminal: completed unless some step stayed failed.
    fn finish_run(&self, execution: &mut WorkflowExecution) {
        let failed: Vec<&str> = execution
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.step_id.as_str())
            .collect();

        if failed.is_empty() {
            execution.finish(ExecutionStatus::Completed);
            info!(
                "[{}] Execution completed: {} completed, {} skipped in {}ms",
                execution.id,
                execution.metrics.completed_steps,
                execution.metrics.skipped_steps,
                execution.metrics.duration_ms.unwrap_or(0)
            );
            self.sync(execution);
            self.events.publish(WorkflowEvent::ExecutionCompleted {
                execution_id: execution.id.clone(),
                workflow_id: execution.workflow_id.clone(),
                metrics: execution.metrics.clone(),
            });
        } else {
            let message = format!("{} step(s) failed: {}", failed.len(), failed.join(", "));
            execution.error = Some(message.clone());
            execution.finish(ExecutionStatus::Failed);
            error!("[{}] Execution failed: {}", execution.id, message);
            self.sync(execution);
            self.events.publish(WorkflowEvent::ExecutionFailed {
                execution_id: execution.id.clone(),
                workflow_id: execution.workflow_id.clone(),
                error: message,
                metrics: execution.metrics.clone(),
            });
        }

        self.controls.remove(&execution.id);
    }

    fn finish_cancelled(&self, execution: &mut WorkflowExecution) {
        execution.finish(ExecutionStatus::Cancelled);
        self.sync(execution);
        self.controls.remove(&execution.id);
        info!("[{}] Execution cancelled", execution.id);
        self.publish_cancelled(execution);
    }

    fn publish_cancelled(&self, execution: &WorkflowExecution) {
        self.events.publish(WorkflowEvent::ExecutionCancelled {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
            metrics: execution.metrics.clone(),
        });
    }

    fn status_of(&self, execution_id: &str) -> Result<ExecutionStatus, EngineError> {
        self.executions
            .get(execution_id)
            .map(|entry| entry.status)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Publishes the current state as the visible snapshot.
    fn sync(&self, execution: &WorkflowExecution) {
        self.executions
            .insert(execution.id.clone(), execution.clone());
    }
}
