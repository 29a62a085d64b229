//! Failure records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::classifier::{ErrorType, Severity};

/// One raised step failure.
///
/// Created once per failure and never changed afterwards except for the
/// `resolved` flag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowError {
    pub id: String,
    pub execution_id: String,
    pub step_id: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,

    /// Retries already spent on the step when the failure was raised
    pub retry_count: u32,

    /// Retry budget that applies to this failure
    pub max_retries: u32,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowError {
    pub fn new(
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
        error_type: ErrorType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            error_type,
            severity,
            message: message.into(),
            retry_count: 0,
            max_retries: 0,
            resolved: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = retry_count;
        self.max_retries = max_retries;
        self
    }

    /// True once the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
