//! Execution error types

use thiserror::Error;

use crate::workflow::{DefinitionError, StepType};

use super::record::ExecutionStatus;

/// Failure raised by a step handler.
///
/// The display text is what the error classifier inspects, so variants
/// keep their wording close to the underlying cause.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("invalid config field '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("required input '{0}' is missing")]
    MissingInput(String),

    #[error("{0}")]
    Collaborator(String),

    #[error("{0}")]
    Http(String),
}

impl StepError {
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn missing_input(name: impl Into<String>) -> Self {
        Self::MissingInput(name.into())
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }
}

/// Errors returned by the engine's management and execution API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("No handler registered for step type '{0}'")]
    HandlerNotRegistered(StepType),

    #[error("Execution '{execution_id}' is {status} and cannot be {action}")]
    InvalidState {
        execution_id: String,
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error("Execution '{execution_id}' failed: {message}")]
    ExecutionFailed {
        execution_id: String,
        message: String,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl EngineError {
    pub fn invalid_state(
        execution_id: impl Into<String>,
        status: ExecutionStatus,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            execution_id: execution_id.into(),
            status,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display() {
        let err = StepError::invalid_config("query", "required field is missing");
        assert_eq!(
            err.to_string(),
            "invalid config field 'query': required field is missing"
        );
        assert_eq!(StepError::collaborator("connection refused").to_string(), "connection refused");
        assert!(StepError::missing_input("search").to_string().contains("required"));
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::invalid_state("exec-1", ExecutionStatus::Completed, "paused");
        assert_eq!(err.to_string(), "Execution 'exec-1' is completed and cannot be paused");

        let err = EngineError::HandlerNotRegistered(StepType::ToolInvoke);
        assert!(err.to_string().contains("tool-invoke"));

        let err: EngineError = DefinitionError::EmptyWorkflow.into();
        assert_eq!(err.to_string(), "Workflow has no steps");
    }
}
