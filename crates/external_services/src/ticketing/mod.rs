//! Ticketing back end access.
//!
//! Provides the REST client used for snapshots and the frame builders for the
//! live event channel.

pub mod channel;
pub mod client;
pub mod types;

pub use channel::{build_join_message, build_leave_message, CHECK_IN_UPDATE, STATS_UPDATE};
pub use client::TicketingClient;
pub use types::{
    ApiEnvelope, CheckInRecord, EventDetails, GateStat, GateStatsResponse, Order, TicketTier,
};
