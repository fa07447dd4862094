//! Event stream error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
