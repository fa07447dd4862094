//! WebSocket transport shared by the live monitor.
//!
//! [`WsManager`] owns one long-lived connection: it resolves and connects,
//! performs the (optionally TLS) handshake, keeps the link alive with pings and
//! reconnects with exponential backoff. Everything protocol specific lives in a
//! [`WsHandler`] implementation.

pub mod error;
pub mod messages;
pub mod ws_handler;
pub mod ws_manager;

pub use error::{Error, Result};
pub use messages::ControlCommand;
pub use ws_handler::WsHandler;
pub use ws_manager::{WsManager, WsManagerConfig};
