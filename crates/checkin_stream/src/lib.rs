//! Event stream client for live check-ins.
//!
//! [`EventStreamClient::subscribe`] joins the channel of one event and hands
//! back a [`Subscription`]: a cancellable, ordered sequence of
//! [`StreamMessage`]s. The underlying [`common::WsManager`] reconnects and
//! re-joins on its own; consumers only ever see decoded messages.
//!
//! Delivery is at-least-once from the server's point of view and may have gaps
//! across reconnects. Nothing is replayed on join.

pub mod client;
pub mod error;
pub mod handler;
pub mod messages;

pub use client::{EventStreamClient, StreamConfig, StreamSubscriber, Subscription};
pub use error::{Result, StreamError};
pub use handler::CheckInChannelHandler;
pub use messages::{decode_frame, CheckInEvent, StatsUpdate, StreamMessage};
