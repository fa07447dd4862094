//! External service access for the live monitor.
//!
//! - `ticketing`: REST client for the ticketing back end and the JSON frames
//!   spoken on its live event channel.
//! - `snapshot`: the snapshot fetcher, which combines several independent reads
//!   into one authoritative [`EventSnapshot`].
//!
//! # Example
//!
//! ```ignore
//! use external_services::{SnapshotFetcher, TicketingClient};
//! use std::sync::Arc;
//!
//! let client = TicketingClient::new("https://tickets.example.com/api");
//! let fetcher = SnapshotFetcher::new(Arc::new(client));
//! let snapshot = fetcher.fetch_snapshot("evt_123").await?;
//! println!("{} / {} checked in", snapshot.total_check_ins, snapshot.capacity);
//! ```

pub mod error;
pub mod snapshot;
pub mod ticketing;

pub use error::{Error, Result};
pub use snapshot::{EventSnapshot, SnapshotField, SnapshotFetcher, SnapshotSource};
pub use ticketing::{CheckInRecord, EventDetails, GateStat, GateStatsResponse, Order, TicketTier, TicketingClient};
