//! Error types for gr-facebook

use thiserror::Error;

/// gr-facebook error type
#[derive(Error, Debug)]
pub enum FacebookError {
    #[error("Facebook page access token not set")]
    AccessTokenNotSet,

    #[error("Facebook API error: {0}")]
    Api(String),

    #[error("Facebook API request failed: {0}")]
    Request(String),

    #[error("Invalid Graph object id: {0:?}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Facebook webhook verification failed")]
    WebhookVerificationFailed,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}

impl From<reqwest::Error> for FacebookError {
    fn from(err: reqwest::Error) -> Self {
        FacebookError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for FacebookError {
    fn from(err: serde_json::Error) -> Self {
        FacebookError::InvalidPayload(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FacebookError>;
