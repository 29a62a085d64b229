//! Workflow Data Model
//!
//! Core data structures describing a registered workflow: its steps,
//! their types, gating conditions and retry policies.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: research
//! name: Research pipeline
//! version: "1.0"
//! steps:
//!   - id: search
//!     name: Search the corpus
//!     type: retrieval-query
//!     config:
//!       query: ${topic}
//!       limit: 5
//!     retry:
//!       max_attempts: 3
//!       delay_ms: 1000
//!       backoff_multiplier: 2.0
//!
//!   - id: summarize
//!     name: Summarize findings
//!     type: reasoning-call
//!     dependencies: [search]
//!     condition:
//!       field: mode
//!       operator: equals
//!       value: full
//!     config:
//!       prompt: ${prompt}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::error::StepError;

/// Run-time variables supplied when an execution starts.
pub type Variables = HashMap<String, Value>;

/// Outputs of completed steps, keyed by step id.
pub type Results = HashMap<String, Value>;

/// The kind of work a step performs.
///
/// Each type maps to exactly one registered handler.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// Query the search backend
    RetrievalQuery,
    /// Hand a task to the agent-delegation backend
    AgentDelegate,
    /// Invoke a named tool on the tool backend
    ToolInvoke,
    /// Ask the reasoning backend for an answer
    ReasoningCall,
    /// Generic outbound HTTP call
    HttpRequest,
    /// Map/filter/reduce over a prior step's output
    DataTransform,
    /// Evaluate a predicate and return a boolean
    Condition,
    /// Log or send a message
    Notification,
}

impl StepType {
    /// Returns the wire name of this step type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrievalQuery => "retrieval-query",
            Self::AgentDelegate => "agent-delegate",
            Self::ToolInvoke => "tool-invoke",
            Self::ReasoningCall => "reasoning-call",
            Self::HttpRequest => "http-request",
            Self::DataTransform => "data-transform",
            Self::Condition => "condition",
            Self::Notification => "notification",
        }
    }

    /// Returns true for types that need an external collaborator.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::RetrievalQuery | Self::AgentDelegate | Self::ToolInvoke | Self::ReasoningCall
        )
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value configuration payload of a step.
///
/// Values may contain `${name}` placeholders until they are resolved
/// against the execution's variables and prior results.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct StepConfig(BTreeMap<String, Value>);

impl StepConfig {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a string value, failing if present with another type.
    pub fn str(&self, key: &str) -> Result<Option<&str>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(StepError::invalid_config(key, "expected a string")),
        }
    }

    /// Returns a non-empty string value or fails naming the key.
    pub fn require_str(&self, key: &str) -> Result<&str, StepError> {
        match self.str(key)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(StepError::invalid_config(key, "required field is missing")),
        }
    }

    pub fn u64(&self, key: &str) -> Result<Option<u64>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| StepError::invalid_config(key, "expected a non-negative integer")),
        }
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| StepError::invalid_config(key, "expected a number")),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(StepError::invalid_config(key, "expected a boolean")),
        }
    }

    pub fn array(&self, key: &str) -> Result<Option<&Vec<Value>>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(_) => Err(StepError::invalid_config(key, "expected a list")),
        }
    }

    pub fn object(&self, key: &str) -> Result<Option<&serde_json::Map<String, Value>>, StepError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(StepError::invalid_config(key, "expected an object")),
        }
    }
}

impl FromIterator<(String, Value)> for StepConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Comparison operator of a [`Condition`].
///
/// Unrecognised operator names deserialize to [`ConditionOperator::Unknown`],
/// which never matches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    #[serde(other)]
    Unknown,
}

/// A binary predicate gating a step.
///
/// The left operand is looked up by name in the variables, then in prior
/// step outputs; the right operand is a literal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Exists, Value::Null)
    }
}

/// Retry settings attached to a step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,

    /// Base delay before the first retry
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Factor applied to the delay for each further retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            backoff_multiplier,
        }
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    ///
    /// `delay_ms * backoff_multiplier ^ retry_count`
    pub fn delay_for(&self, retry_count: u32) -> u64 {
        let factor = self.backoff_multiplier.powi(retry_count as i32);
        (self.delay_ms as f64 * factor).round() as u64
    }
}

/// A single unit of work in a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Identifier, unique within the definition
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default)]
    pub config: StepConfig,

    /// IDs of steps that must be completed before this one may run
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl WorkflowStep {
    /// Creates a new step.
    ///
    /// # Example
    ///
    /// ```
    /// use stepwise::workflow::{RetryPolicy, StepType, WorkflowStep};
    ///
    /// let step = WorkflowStep::new("search", StepType::RetrievalQuery)
    ///     .with_name("Search the corpus")
    ///     .with_config("query", "${topic}")
    ///     .with_retry(RetryPolicy::new(3, 100, 2.0));
    /// ```
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        let id = id.into().trim().to_string();
        Self {
            name: id.clone(),
            id,
            step_type,
            config: StepConfig::new(),
            dependencies: Vec::new(),
            condition: None,
            retry: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key, value.into());
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A registered, immutable workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Steps in declaration order
    pub steps: Vec<WorkflowStep>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowDefinition {
    /// Creates an empty definition.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            steps: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Appends a step, builder style.
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_creation() {
        let step = WorkflowStep::new(" search ", StepType::RetrievalQuery)
            .with_config("query", "rust")
            .depends_on("intake");

        assert_eq!(step.id, "search");
        assert_eq!(step.name, "search");
        assert_eq!(step.dependencies, vec!["intake"]);
        assert_eq!(step.config.get("query"), Some(&json!("rust")));
    }

    #[test]
    fn test_step_type_wire_names() {
        let parsed: StepType = serde_json::from_value(json!("agent-delegate")).unwrap();
        assert_eq!(parsed, StepType::AgentDelegate);
        assert_eq!(StepType::DataTransform.to_string(), "data-transform");
        assert!(StepType::ToolInvoke.is_external());
        assert!(!StepType::HttpRequest.is_external());
    }

    #[test]
    fn test_unknown_operator_deserializes() {
        let cond: Condition =
            serde_json::from_value(json!({"field": "x", "operator": "matches", "value": 1})).unwrap();
        assert_eq!(cond.operator, ConditionOperator::Unknown);
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy::new(3, 100, 2.0);
        assert_eq!(policy.delay_for(0), 100);
        assert_eq!(policy.delay_for(1), 200);
        assert_eq!(policy.delay_for(2), 400);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({"max_attempts": 2})).unwrap();
        assert_eq!(policy.delay_ms, 1000);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_config_typed_accessors() {
        let config = StepConfig::new()
            .with("query", "rust")
            .with("limit", 5)
            .with("threshold", 0.5)
            .with("flag", true);

        assert_eq!(config.require_str("query").unwrap(), "rust");
        assert_eq!(config.u64("limit").unwrap(), Some(5));
        assert_eq!(config.f64("threshold").unwrap(), Some(0.5));
        assert_eq!(config.bool("flag").unwrap(), Some(true));
        assert_eq!(config.u64("missing").unwrap(), None);
    }

    #[test]
    fn test_config_accessor_type_mismatch() {
        let config = StepConfig::new().with("limit", "ten");
        let err = config.u64("limit").unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert!(config.require_str("query").is_err());
    }

    #[test]
    fn test_definition_helpers() {
        let definition = WorkflowDefinition::new("wf", "Workflow")
            .with_step(WorkflowStep::new("a", StepType::Condition))
            .with_step(WorkflowStep::new("b", StepType::Notification).depends_on("a"))
            .with_step(WorkflowStep::new("c", StepType::Notification).depends_on("a"));

        assert_eq!(definition.len(), 3);
        assert!(definition.get_step("b").is_some());
        assert!(definition.get_step("z").is_none());
    }

    #[test]
    fn test_step_deserialize_from_yaml() {
        let yaml = r#"
id: fetch
type: http-request
config:
  url: https://example.com
dependencies: [search]
retry:
  max_attempts: 2
  delay_ms: 50
"#;
        let step: WorkflowStep = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.step_type, StepType::HttpRequest);
        assert_eq!(step.dependencies, vec!["search"]);
        assert_eq!(step.retry.unwrap().delay_ms, 50);
        assert!(step.condition.is_none());
    }
}
