//! Error types for vc-core

use thiserror::Error;

/// Main error type for vc-core
#[derive(Error, Debug)]
pub enum Error {
    /// A provider adapter call failed.
    ///
    /// `retryable` follows the same taxonomy as `call.error` events.
    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Call not connected: {0}")]
    CallNotConnected(String),

    #[error("Call ended: {0}")]
    CallEnded(String),

    #[error("Already waiting for transcript on call: {0}")]
    TranscriptPending(String),

    #[error("Timed out waiting for transcript on call: {0}")]
    TranscriptTimeout(String),

    #[error("Maximum concurrent calls reached ({0})")]
    ConcurrencyLimit(usize),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a retryable provider error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether retrying the failed operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::TranscriptTimeout(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for vc-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert!(Error::transient("503 from upstream").is_retryable());
        assert!(!Error::permanent("401 unauthorized").is_retryable());
        assert!(!Error::CallNotFound("abc".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::permanent("bad number");
        assert_eq!(err.to_string(), "Provider error: bad number");
    }
}
