//! Failure Recovery
//!
//! Classifies step failures and decides what happens next.
//!
//! - [`classifier`]: Error type and severity heuristics
//! - [`record`]: The failure record kept on each execution
//! - [`strategy`]: Strategy table, resolution and application

pub mod classifier;
pub mod record;
pub mod strategy;

pub use classifier::{ErrorClassifier, ErrorType, HeuristicClassifier, Severity};
pub use record::WorkflowError;
pub use strategy::{RecoveryAction, RecoveryResolver, RecoveryStrategy};
