//! Error types for state store operations

use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while talking to the state store
#[derive(Error, Debug)]
pub enum CacheError {
    /// Could not obtain a connection to the backing store
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Store rejected or failed a command
    #[error("Backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Value at a key has the wrong shape for the operation (e.g. SMEMBERS on a string)
    #[error("Wrong type for key '{0}'")]
    WrongType(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::ConnectionFailed(_) | CacheError::Backend(_))
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::ConnectionFailed(_) => "CACHE_CONNECTION_FAILED",
            CacheError::Backend(_) => "CACHE_BACKEND_ERROR",
            CacheError::Serialization(_) => "CACHE_SERIALIZATION_ERROR",
            CacheError::WrongType(_) => "CACHE_WRONG_TYPE",
            CacheError::InvalidConfig(_) => "CACHE_INVALID_CONFIG",
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            CacheError::ConnectionFailed(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
