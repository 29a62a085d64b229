//! Step Handlers
//!
//! Every [`StepType`] is dispatched to exactly one [`StepHandler`]. The
//! engine-internal types are provided by [`HandlerRegistry::with_builtins`];
//! collaborator-backed types are wired up by the host with its backends.

pub mod builtin;
pub mod collaborators;
pub mod http;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::workflow::{Results, StepConfig, StepType, Variables, WorkflowDefinition};

use super::error::StepError;

pub use builtin::{ConditionHandler, DataTransformHandler, NotificationHandler};
pub use collaborators::{
    AgentDelegateHandler, DelegationBackend, DelegationRequest, ReasoningBackend, ReasoningCallHandler,
    ReasoningRequest, RetrievalQueryHandler, SearchBackend, SearchRequest, ToolBackend, ToolInvokeHandler,
    ToolRequest,
};
pub use http::{HttpRequest, HttpRequestHandler};

/// Executes one step with its already resolved configuration.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(
        &self,
        config: &StepConfig,
        variables: &Variables,
        results: &Results,
    ) -> Result<Value, StepError>;
}

/// Step type -> handler dispatch table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with data-transform, condition, notification and
    /// http-request handlers.
    pub fn with_builtins() -> Self {
        Self::new()
            .with(StepType::DataTransform, DataTransformHandler)
            .with(StepType::Condition, ConditionHandler)
            .with(StepType::Notification, NotificationHandler)
            .with(StepType::HttpRequest, HttpRequestHandler::new())
    }

    /// Registers a handler, replacing any previous one for the type.
    pub fn register(&mut self, step_type: StepType, handler: impl StepHandler + 'static) {
        self.handlers.insert(step_type, Arc::new(handler));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, step_type: StepType, handler: impl StepHandler + 'static) -> Self {
        self.register(step_type, handler);
        self
    }

    pub fn with_search_backend(self, backend: Arc<dyn SearchBackend>) -> Self {
        self.with(StepType::RetrievalQuery, RetrievalQueryHandler::new(backend))
    }

    pub fn with_delegation_backend(self, backend: Arc<dyn DelegationBackend>) -> Self {
        self.with(StepType::AgentDelegate, AgentDelegateHandler::new(backend))
    }

    pub fn with_tool_backend(self, backend: Arc<dyn ToolBackend>) -> Self {
        self.with(StepType::ToolInvoke, ToolInvokeHandler::new(backend))
    }

    pub fn with_reasoning_backend(self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.with(StepType::ReasoningCall, ReasoningCallHandler::new(backend))
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.handlers.contains_key(&step_type)
    }

    /// First step type of `definition` that has no handler, if any.
    pub fn missing_for(&self, definition: &WorkflowDefinition) -> Option<StepType> {
        definition
            .steps
            .iter()
            .map(|step| step.step_type)
            .find(|step_type| !self.contains(*step_type))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.contains(StepType::DataTransform));
        assert!(registry.contains(StepType::Condition));
        assert!(registry.contains(StepType::Notification));
        assert!(registry.contains(StepType::HttpRequest));
        assert!(!registry.contains(StepType::RetrievalQuery));
    }

    #[test]
    fn test_missing_for_definition() {
        let registry = HandlerRegistry::with_builtins();
        let def = WorkflowDefinition::new("wf", "wf")
            .with_step(WorkflowStep::new("a", StepType::Condition))
            .with_step(WorkflowStep::new("b", StepType::ToolInvoke));

        assert_eq!(registry.missing_for(&def), Some(StepType::ToolInvoke));
        assert_eq!(HandlerRegistry::new().missing_for(&WorkflowDefinition::new("x", "x")), None);
    }

    #[test]
    fn test_debug_lists_types() {
        let registry = HandlerRegistry::new().with(StepType::Condition, ConditionHandler);
        assert!(format!("{:?}", registry).contains("condition"));
    }
}
