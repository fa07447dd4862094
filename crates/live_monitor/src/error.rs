//! Live monitor error types.

use thiserror::Error;

/// Live monitor error type.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Event identifier is empty or otherwise unusable.
    #[error("Invalid event id: {0:?}")]
    InvalidEventId(String),

    /// No session exists for the event.
    #[error("Event not monitored: {0}")]
    NotMonitored(String),

    /// The session task is gone and no longer accepts commands.
    #[error("Monitor session for {0} has stopped")]
    SessionClosed(String),

    /// Stream subscription error.
    #[error("Stream error: {0}")]
    Stream(#[from] checkin_stream::StreamError),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for live monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
