//! Control messages for a running WebSocket manager.

/// Commands that can be sent to a WsManager while it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Leave a channel. The handler decides which frame announces it.
    Leave(String),
    /// Close the socket and stop reconnecting.
    Shutdown,
}
