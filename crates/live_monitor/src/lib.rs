//! Live event monitor.
//!
//! Merges a live check-in stream with periodically fetched snapshots into a
//! bounded, consistent view per event:
//!
//! - [`aggregator`]: merge rules and the load state machine
//! - [`session`]: one actor task per monitored event
//! - [`registry`]: running sessions keyed by event id
//! - [`api`]: HTTP/WebSocket presentation of the views

pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use aggregator::LiveAggregator;
pub use api::{create_router, AppState};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use registry::MonitorRegistry;
pub use session::{MonitorSession, SessionCommand, SessionCommands, SessionConfig, SessionHandle};
pub use state::{
    ActivityKind, ActivityLog, ActivityLogEntry, LiveState, LiveView, MonitorStatus,
    ACTIVITY_LOG_CAPACITY,
};
