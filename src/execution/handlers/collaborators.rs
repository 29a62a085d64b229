//! Collaborator-backed step handlers
//!
//! Search, delegation, tool and reasoning backends live outside this crate.
//! Each handler turns its step config into a typed request and hands it to
//! the backend the host registered.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::execution::error::StepError;
use crate::workflow::{Results, StepConfig, Variables};

use super::StepHandler;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: u64,
    pub threshold: f64,
}

impl SearchRequest {
    pub fn from_config(config: &StepConfig) -> Result<Self, StepError> {
        Ok(Self {
            query: config.require_str("query")?.to_string(),
            limit: config.u64("limit")?.unwrap_or(10),
            threshold: config.f64("threshold")?.unwrap_or(0.0),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DelegationRequest {
    pub task: String,
    pub capabilities: Vec<String>,
}

impl DelegationRequest {
    pub fn from_config(config: &StepConfig) -> Result<Self, StepError> {
        let capabilities = match config.array("capabilities")? {
            Some(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| StepError::invalid_config("capabilities", "expected a list of strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            task: config.require_str("task")?.to_string(),
            capabilities,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub parameters: Map<String, Value>,
}

impl ToolRequest {
    pub fn from_config(config: &StepConfig) -> Result<Self, StepError> {
        Ok(Self {
            tool: config.require_str("tool")?.to_string(),
            parameters: config.object("parameters")?.cloned().unwrap_or_default(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub prompt: String,
    pub use_retrieval: bool,
    pub use_delegation: bool,
}

impl ReasoningRequest {
    pub fn from_config(config: &StepConfig) -> Result<Self, StepError> {
        Ok(Self {
            prompt: config.require_str("prompt")?.to_string(),
            use_retrieval: config.bool("use_retrieval")?.unwrap_or(false),
            use_delegation: config.bool("use_delegation")?.unwrap_or(false),
        })
    }
}

/// Ranked search over a knowledge store.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<Value>, StepError>;
}

/// Assigns a task to an agent with the requested capabilities.
#[async_trait]
pub trait DelegationBackend: Send + Sync {
    async fn delegate(&self, request: DelegationRequest) -> Result<Value, StepError>;
}

#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, StepError>;
}

/// Free-text answers from a language model.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn reason(&self, request: ReasoningRequest) -> Result<String, StepError>;
}

pub struct RetrievalQueryHandler {
    backend: Arc<dyn SearchBackend>,
}

impl RetrievalQueryHandler {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StepHandler for RetrievalQueryHandler {
    async fn execute(&self, config: &StepConfig, _variables: &Variables, _results: &Results) -> Result<Value, StepError> {
        let hits = self.backend.search(SearchRequest::from_config(config)?).await?;
        Ok(Value::Array(hits))
    }
}

pub struct AgentDelegateHandler {
    backend: Arc<dyn DelegationBackend>,
}

impl AgentDelegateHandler {
    pub fn new(backend: Arc<dyn DelegationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StepHandler for AgentDelegateHandler {
    async fn execute(&self, config: &StepConfig, _variables: &Variables, _results: &Results) -> Result<Value, StepError> {
        self.backend.delegate(DelegationRequest::from_config(config)?).await
    }
}

pub struct ToolInvokeHandler {
    backend: Arc<dyn ToolBackend>,
}

impl ToolInvokeHandler {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StepHandler for ToolInvokeHandler {
    async fn execute(&self, config: &StepConfig, _variables: &Variables, _results: &Results) -> Result<Value, StepError> {
        self.backend.invoke(ToolRequest::from_config(config)?).await
    }
}

pub struct ReasoningCallHandler {
    backend: Arc<dyn ReasoningBackend>,
}

impl ReasoningCallHandler {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StepHandler for ReasoningCallHandler {
    async fn execute(&self, config: &StepConfig, _variables: &Variables, _results: &Results) -> Result<Value, StepError> {
        let answer = self.backend.reason(ReasoningRequest::from_config(config)?).await?;
        Ok(json!({ "answer": answer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSearch;

    #[async_trait]
    impl SearchBackend for EchoSearch {
        async fn search(&self, request: SearchRequest) -> Result<Vec<Value>, StepError> {
            Ok((0..request.limit)
                .map(|i| json!({ "query": request.query, "rank": i }))
                .collect())
        }
    }

    struct Shout;

    #[async_trait]
    impl ReasoningBackend for Shout {
        async fn reason(&self, request: ReasoningRequest) -> Result<String, StepError> {
            Ok(request.prompt.to_uppercase())
        }
    }

    #[test]
    fn test_search_request_defaults() {
        let request = SearchRequest::from_config(&StepConfig::new().with("query", "rust")).unwrap();
        assert_eq!(request.limit, 10);
        assert_eq!(request.threshold, 0.0);
    }

    #[test]
    fn test_search_request_rejects_bad_limit() {
        let config = StepConfig::new().with("query", "rust").with("limit", "ten");
        let err = SearchRequest::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("'limit'"));
    }

    #[test]
    fn test_delegation_capabilities() {
        let config = StepConfig::new()
            .with("task", "summarise")
            .with("capabilities", json!(["nlp", "summary"]));
        let request = DelegationRequest::from_config(&config).unwrap();
        assert_eq!(request.capabilities, vec!["nlp", "summary"]);

        let config = config.with("capabilities", json!([1]));
        assert!(DelegationRequest::from_config(&config).is_err());
    }

    #[test]
    fn test_tool_request_parameters_default() {
        let request = ToolRequest::from_config(&StepConfig::new().with("tool", "calc")).unwrap();
        assert!(request.parameters.is_empty());
        assert!(ToolRequest::from_config(&StepConfig::new()).is_err());
    }

    #[tokio::test]
    async fn test_retrieval_handler_returns_list() {
        let handler = RetrievalQueryHandler::new(Arc::new(EchoSearch));
        let config = StepConfig::new().with("query", "rust").with("limit", 2);
        let out = handler
            .execute(&config, &Variables::new(), &Results::new())
            .await
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reasoning_handler_wraps_answer() {
        let handler = ReasoningCallHandler::new(Arc::new(Shout));
        let config = StepConfig::new().with("prompt", "hi").with("use_retrieval", true);
        let out = handler
            .execute(&config, &Variables::new(), &Results::new())
            .await
            .unwrap();
        assert_eq!(out, json!({ "answer": "HI" }));
    }
}
