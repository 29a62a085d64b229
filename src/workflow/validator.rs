//! Workflow Validation
//!
//! Structural checks run when a definition is loaded or registered:
//! - Step field validation
//! - Reference integrity checking
//! - Optional topological ordering with cycle detection

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{WorkflowDefinition, WorkflowStep};

/// How steps are ordered for execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    /// Visit steps in declaration order. Forward references are accepted
    /// but can never be satisfied, so their dependents end up skipped.
    #[default]
    Declaration,
    /// Reorder steps so dependencies come first and reject cycles.
    Topological,
}

/// Errors found in a workflow definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Workflow has no steps")]
    EmptyWorkflow,

    #[error("Workflow has an empty or whitespace-only ID")]
    EmptyWorkflowId,

    #[error("Workflow '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("Step has empty or whitespace-only ID")]
    EmptyStepId,

    #[error("Step '{step}' references unknown step '{reference}'")]
    InvalidReference { step: String, reference: String },

    #[error("Step '{0}' depends on itself")]
    SelfReference(String),

    #[error("Workflow contains cyclic dependencies (steps depend on each other in a loop)")]
    CyclicDependency,

    #[error("Failed to read workflow file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse workflow YAML: {0}")]
    Parse(String),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<DefinitionError>),
}

/// Validates a single step's fields.
fn validate_step(step: &WorkflowStep) -> Vec<DefinitionError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(DefinitionError::EmptyStepId);
        return errors;
    }

    if step.dependencies.iter().any(|d| d == &step.id) {
        errors.push(DefinitionError::SelfReference(step.id.clone()));
    }

    if step.dependencies.is_empty() {
        debug!("Step '{}' is a root step (no dependencies)", step.id);
    }

    errors
}

/// Validates the definition structure.
///
/// Performs the following checks:
/// 1. Definition has an id and at least one step
/// 2. No duplicate or blank step IDs
/// 3. All dependencies point to steps of this definition
/// 4. In topological mode, no cycles; steps are reordered so that
///    dependencies come before dependents
pub fn validate_definition(
    definition: &mut WorkflowDefinition,
    mode: OrderingMode,
) -> Result<(), DefinitionError> {
    info!(
        "Validating workflow '{}' with {} steps",
        definition.id,
        definition.steps.len()
    );

    if definition.id.trim().is_empty() {
        return Err(DefinitionError::EmptyWorkflowId);
    }

    if definition.steps.is_empty() {
        return Err(DefinitionError::EmptyWorkflow);
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    for step in &definition.steps {
        if !seen_ids.insert(step.id.clone()) {
            return Err(DefinitionError::DuplicateStepId(step.id.clone()));
        }
    }

    let mut all_errors = Vec::new();
    for step in &definition.steps {
        all_errors.extend(validate_step(step));

        for dep_id in &step.dependencies {
            if !seen_ids.contains(dep_id) {
                all_errors.push(DefinitionError::InvalidReference {
                    step: step.id.clone(),
                    reference: dep_id.clone(),
                });
            }
        }
    }

    match all_errors.len() {
        0 => {}
        1 => return Err(all_errors.remove(0)),
        _ => return Err(DefinitionError::Multiple(all_errors)),
    }

    if mode == OrderingMode::Topological {
        topological_sort(definition)?;
    }

    info!(
        "Workflow '{}' validated: {} steps",
        definition.id,
        definition.steps.len()
    );
    Ok(())
}

/// Performs topological sort on the steps using Kahn's algorithm.
///
/// Roots keep their relative declaration order. Also detects cyclic
/// dependencies.
fn topological_sort(definition: &mut WorkflowDefinition) -> Result<(), DefinitionError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &definition.steps {
        in_degree.insert(step.id.as_str(), step.dependencies.len());
        for dep in &step.dependencies {
            successors.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = definition
        .steps
        .iter()
        .filter(|s| s.dependencies.is_empty())
        .map(|s| s.id.as_str())
        .collect();

    let mut sorted_order: Vec<String> = Vec::new();

    while let Some(current_id) = queue.pop_front() {
        sorted_order.push(current_id.to_string());

        for successor_id in successors.get(current_id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(successor_id) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*successor_id);
                }
            }
        }
    }

    if sorted_order.len() != definition.steps.len() {
        return Err(DefinitionError::CyclicDependency);
    }

    let mut step_map: HashMap<String, WorkflowStep> = definition
        .steps
        .drain(..)
        .map(|s| (s.id.clone(), s))
        .collect();

    definition.steps = sorted_order
        .into_iter()
        .filter_map(|id| step_map.remove(&id))
        .collect();

    debug!(
        "Topological order: {:?}",
        definition.steps.iter().map(|s| &s.id).collect::<Vec<_>>()
    );

    Ok(())
}
