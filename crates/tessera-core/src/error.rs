//! Error-code taxonomy carried inside failed [`Response`](crate::Response)s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structured failure codes returned by the router and the workflow engine.
///
/// Expected failures never cross a component boundary as a Rust error; they
/// are reported as a `Response { success: false, error_code, .. }` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Message failed structural validation (id, size, expiry).
    InvalidMessage,
    /// Explicit target agent is not registered.
    AgentNotFound,
    /// Explicit target agent is registered but failing health checks.
    AgentUnhealthy,
    /// No healthy agent advertises the required capability.
    NoAgentsFound,
    /// Agents were discovered but none has a live executor.
    NoAgentInstances,
    /// Every candidate agent is at its concurrency limit.
    NoSuitableAgent,
    /// Message type has no capability mapping.
    UnknownMessageType,
    /// Executor returned an error, panicked, timed out or was cancelled.
    AgentCommunicationError,
    /// Registry state changed underneath an in-progress dispatch.
    RoutingError,
    /// Workflow definition was rejected before execution.
    InvalidWorkflow,
    /// A workflow with the same id is already active.
    WorkflowAlreadyRunning,
    /// A valid workflow could not be accepted for execution.
    WorkflowStartError,
    /// Workflow id is unknown to the queried collection.
    WorkflowNotFound,
    /// Workflow-level retry budget is exhausted.
    MaxRetriesExceeded,
    /// Restarting a failed workflow did not succeed.
    WorkflowRetryError,
}

impl ErrorCode {
    /// All codes, in taxonomy order.
    pub const ALL: [ErrorCode; 15] = [
        ErrorCode::InvalidMessage,
        ErrorCode::AgentNotFound,
        ErrorCode::AgentUnhealthy,
        ErrorCode::NoAgentsFound,
        ErrorCode::NoAgentInstances,
        ErrorCode::NoSuitableAgent,
        ErrorCode::UnknownMessageType,
        ErrorCode::AgentCommunicationError,
        ErrorCode::RoutingError,
        ErrorCode::InvalidWorkflow,
        ErrorCode::WorkflowAlreadyRunning,
        ErrorCode::WorkflowStartError,
        ErrorCode::WorkflowNotFound,
        ErrorCode::MaxRetriesExceeded,
        ErrorCode::WorkflowRetryError,
    ];

    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::AgentNotFound => "AGENT_NOT_FOUND",
            ErrorCode::AgentUnhealthy => "AGENT_UNHEALTHY",
            ErrorCode::NoAgentsFound => "NO_AGENTS_FOUND",
            ErrorCode::NoAgentInstances => "NO_AGENT_INSTANCES",
            ErrorCode::NoSuitableAgent => "NO_SUITABLE_AGENT",
            ErrorCode::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            ErrorCode::AgentCommunicationError => "AGENT_COMMUNICATION_ERROR",
            ErrorCode::RoutingError => "ROUTING_ERROR",
            ErrorCode::InvalidWorkflow => "INVALID_WORKFLOW",
            ErrorCode::WorkflowAlreadyRunning => "WORKFLOW_ALREADY_RUNNING",
            ErrorCode::WorkflowStartError => "WORKFLOW_START_ERROR",
            ErrorCode::WorkflowNotFound => "WORKFLOW_NOT_FOUND",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::WorkflowRetryError => "WORKFLOW_RETRY_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::AgentUnhealthy
                | ErrorCode::NoAgentsFound
                | ErrorCode::NoSuitableAgent
                | ErrorCode::AgentCommunicationError
                | ErrorCode::RoutingError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown error code '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "AGENT_NOT_FOUND".parse::<ErrorCode>().unwrap(),
            ErrorCode::AgentNotFound
        );
        assert!("NOPE".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorCode::AgentCommunicationError.is_retryable());
        assert!(!ErrorCode::InvalidMessage.is_retryable());
        assert!(!ErrorCode::InvalidWorkflow.is_retryable());
    }
}
