//! Error types for vc-media

use thiserror::Error;

/// vc-media error type
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Speech recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid stream message: {0}")]
    InvalidMessage(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    DecodeError(#[from] base64::DecodeError),

    #[error("Resampler setup failed: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

impl MediaError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::ConnectionFailed(_) | Self::HttpError(_) | Self::WebSocketError(_) => true,
            _ => false,
        }
    }
}

impl From<MediaError> for vc_core::Error {
    fn from(err: MediaError) -> Self {
        let retryable = err.is_retryable();
        vc_core::Error::Provider {
            message: err.to_string(),
            retryable,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MediaError>;
