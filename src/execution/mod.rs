//! Workflow Execution Module
//!
//! Runs registered workflows and keeps their per-run records.
//!
//! # Architecture
//!
//! - [`engine`]: Drives executions and exposes the control API
//! - [`handlers`]: Step type dispatch and the built-in handlers
//! - [`record`]: Execution and step records with their metrics
//! - [`events`]: Transition feed consumed by observers
//! - [`error`]: Step and engine error types

pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod record;

pub use engine::Engine;
pub use error::{EngineError, StepError};
pub use events::{EventBus, SkipReason, WorkflowEvent};
pub use handlers::{HandlerRegistry, StepHandler};
pub use record::{ExecutionMetrics, ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
