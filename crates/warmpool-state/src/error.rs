//! Error types for the coordination store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (refused, dropped, timed out).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("store command failed: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl StoreError {
    /// Whether the failure is a connectivity problem callers should degrade on.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
        {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}
