//! Top-level error type for embedding applications.

use tessera_agent::AgentError;
use tessera_cache::CacheError;
use tessera_workflow::WorkflowError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TesseraError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Result type for context-level operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

impl TesseraError {
    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            TesseraError::Config(ConfigError::InvalidEnvVar { .. }) => "INVALID_ENV_VAR",
            TesseraError::Config(ConfigError::ValidationError(_)) => "INVALID_CONFIG",
            TesseraError::Cache(e) => e.error_code(),
            TesseraError::Agent(e) => e.error_code(),
            TesseraError::Workflow(e) => e.error_code(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TesseraError::Config(_) => false,
            TesseraError::Cache(e) => e.is_retryable(),
            TesseraError::Agent(e) => e.is_retryable(),
            TesseraError::Workflow(e) => e.is_retryable(),
        }
    }
}
