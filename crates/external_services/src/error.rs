//! Error types for external services.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Requested event {requested} but the API returned {returned}")]
    EventMismatch { requested: String, returned: String },
}

pub type Result<T> = std::result::Result<T, Error>;
