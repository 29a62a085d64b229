//! Stepwise - Workflow Execution Engine
//!
//! Runs declared graphs of named steps against a shared variable space,
//! with dependency and condition gating, retry with backoff, classified
//! error recovery and throttled user notifications.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Definitions, loading, validation and placeholder resolution
//! - [`execution`]: The engine, step handlers, run records and the event feed
//! - [`recovery`]: Error classification and recovery strategies
//! - [`notifications`]: Event-to-notification conversion and storage
//! - [`monitoring`]: Resource sampling, metrics and alerts
//! - [`config`]: Runtime settings
//!
//! # Example
//!
//! ```rust,no_run
//! use stepwise::config::EngineConfig;
//! use stepwise::execution::{Engine, HandlerRegistry};
//! use stepwise::workflow::{OrderingMode, Variables};
//! use stepwise::load_definition;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let definition = load_definition("workflow.yaml", OrderingMode::Declaration)?;
//!
//!     // Create the engine with the built-in step handlers
//!     let engine = Engine::new(&EngineConfig::default(), HandlerRegistry::with_builtins());
//!     let definition = engine.register(definition)?;
//!
//!     // Execute the workflow
//!     let execution = engine.execute(&definition.id, Variables::new()).await?;
//!     println!("{}: {}", execution.id, execution.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod execution;
pub mod monitoring;
pub mod notifications;
pub mod recovery;
pub mod workflow;

// Re-export commonly used types
pub use config::Settings;
pub use execution::{Engine, EngineError, ExecutionStatus, HandlerRegistry, WorkflowExecution};
pub use notifications::NotificationHub;
pub use workflow::{load_definition, parse_definition, WorkflowDefinition, WorkflowStep};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepwise";
