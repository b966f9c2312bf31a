//! Error types for workflow planning and execution.

use std::time::Duration;
use tessera_cache::CacheError;
use tessera_core::{ErrorCode, TransitionError};
use thiserror::Error;

/// Errors raised while validating or running a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Definition failed a structural check.
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    /// Duplicate step id in one definition.
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    /// A step depends on a step that does not exist.
    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    /// The dependency graph is not acyclic.
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Workflow has {count} steps, limit is {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("Workflow {0} is already running")]
    AlreadyRunning(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    /// Workflow-level retry cap reached.
    #[error("Workflow {workflow_id} reached its retry limit of {max}")]
    MaxRetriesExceeded { workflow_id: String, max: u32 },

    /// A step exhausted its attempts.
    #[error("Step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },

    #[error("Workflow timed out after {0:?}")]
    Timeout(Duration),

    /// The workflow left the active set while running.
    #[error("Workflow {0} is no longer active")]
    Cancelled(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::StepFailed { .. } | WorkflowError::Timeout(_) => true,
            WorkflowError::Cache(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            WorkflowError::Invalid(_)
            | WorkflowError::DuplicateStep(_)
            | WorkflowError::UnknownDependency { .. }
            | WorkflowError::Cycle(_)
            | WorkflowError::TooManySteps { .. } => ErrorCode::InvalidWorkflow.as_str(),
            WorkflowError::AlreadyRunning(_) => ErrorCode::WorkflowAlreadyRunning.as_str(),
            WorkflowError::NotFound(_) => ErrorCode::WorkflowNotFound.as_str(),
            WorkflowError::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded.as_str(),
            WorkflowError::StepFailed { .. } => "STEP_FAILED",
            WorkflowError::Timeout(_) => "WORKFLOW_TIMEOUT",
            WorkflowError::Cancelled(_) => "WORKFLOW_CANCELLED",
            WorkflowError::Transition(_) => "INVALID_STEP_TRANSITION",
            WorkflowError::Cache(e) => e.error_code(),
        }
    }

    /// Caller-facing code, for errors that have one.
    pub fn response_code(&self) -> Option<ErrorCode> {
        self.error_code().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_share_invalid_workflow() {
        let errors = [
            WorkflowError::Invalid("x".into()),
            WorkflowError::DuplicateStep("a".into()),
            WorkflowError::Cycle(vec!["a".into(), "b".into(), "a".into()]),
            WorkflowError::TooManySteps { count: 3, max: 2 },
        ];
        for e in errors {
            assert_eq!(e.response_code(), Some(ErrorCode::InvalidWorkflow));
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let e = WorkflowError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(e.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_execution_errors_have_no_response_code() {
        let e = WorkflowError::StepFailed {
            step_id: "a".into(),
            error: "boom".into(),
        };
        assert_eq!(e.response_code(), None);
        assert!(e.is_retryable());
    }
}
