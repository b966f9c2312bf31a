//! Error types for registry and router operations.

use std::time::Duration;
use tessera_cache::CacheError;
use thiserror::Error;

/// Errors raised by the registry and by agent executors.
///
/// Routing never surfaces these to callers directly; the router converts
/// them into a failed [`Response`](tessera_core::Response) with an error code.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Descriptor failed validation.
    #[error("Invalid agent: {0}")]
    InvalidAgent(String),

    /// Agent not found.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Agent is at its concurrency limit.
    #[error("Agent {0} has no free run slots")]
    AtCapacity(String),

    /// State cache failure.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The executor reported a failure.
    #[error("Executor error: {0}")]
    Executor(String),

    /// The executor did not answer in time.
    #[error("Executor timed out after {0:?}")]
    Timeout(Duration),

    /// The dispatch was cancelled.
    #[error("Dispatch cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout(_) | AgentError::AtCapacity(_) => true,
            AgentError::Cache(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            AgentError::InvalidAgent(_) => "INVALID_AGENT",
            AgentError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            AgentError::AtCapacity(_) => "AGENT_AT_CAPACITY",
            AgentError::Cache(e) => e.error_code(),
            AgentError::Executor(_) => "EXECUTOR_ERROR",
            AgentError::Timeout(_) => "TIMEOUT",
            AgentError::Cancelled => "CANCELLED",
            AgentError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::AgentNotFound("a-1".to_string());
        assert_eq!(err.to_string(), "Agent not found: a-1");
        assert_eq!(err.error_code(), "AGENT_NOT_FOUND");
    }

    #[test]
    fn test_cache_errors_pass_through() {
        let err: AgentError = CacheError::ConnectionFailed("down".into()).into();
        assert_eq!(err.error_code(), "CACHE_CONNECTION_FAILED");
        assert!(err.is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
    }
}
