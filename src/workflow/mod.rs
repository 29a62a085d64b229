//! Workflow Definition Module
//!
//! Data structures and utilities for defining, loading and validating
//! workflows, plus the pure helpers the engine evaluates them with.
//!
//! # Structure
//!
//! - [`model`]: Definitions, steps, conditions and retry policies
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Structural checks and optional topological ordering
//! - [`registry`]: Store of registered definitions
//! - [`resolver`]: `${name}` placeholder resolution
//! - [`condition`]: Condition evaluation

pub mod condition;
pub mod model;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod validator;

pub use model::{
    Condition, ConditionOperator, Results, RetryPolicy, StepConfig, StepType, Variables,
    WorkflowDefinition, WorkflowStep,
};
pub use parser::{load_definition, parse_definition, save_definition};
pub use registry::WorkflowRegistry;
pub use validator::{validate_definition, DefinitionError, OrderingMode};
