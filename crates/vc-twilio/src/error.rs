//! Error types for vc-twilio

use thiserror::Error;

/// vc-twilio error type
#[derive(Error, Debug)]
pub enum TwilioError {
    #[error("Twilio credentials not set")]
    CredentialsNotSet,

    #[error("Missing X-Twilio-Signature header")]
    MissingSignature,

    #[error("Webhook signature verification failed")]
    SignatureVerificationFailed,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Twilio API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TwilioError {
    /// Throttling, server errors and transport failures may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Http(_) => true,
            _ => false,
        }
    }
}

impl From<TwilioError> for vc_core::Error {
    fn from(err: TwilioError) -> Self {
        match err {
            TwilioError::Config(message) => vc_core::Error::Config(message),
            TwilioError::CredentialsNotSet => {
                vc_core::Error::Config("Twilio credentials not set".to_string())
            }
            other => {
                let retryable = other.is_retryable();
                vc_core::Error::Provider {
                    message: other.to_string(),
                    retryable,
                }
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TwilioError>;
