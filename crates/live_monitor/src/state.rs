//! Live state owned by the aggregator and the views projected from it.

use checkin_stream::CheckInEvent;
use chrono::{DateTime, Utc};
use external_services::{CheckInRecord, EventSnapshot, GateStat, SnapshotField};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// Maximum number of entries kept in the activity log.
pub const ACTIVITY_LOG_CAPACITY: usize = 50;

/// Lifecycle of one monitored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    Uninitialized,
    Loading,
    Live,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    /// Built from a stream check-in.
    CheckIn,
    /// Built from a snapshot's recent check-ins on first load.
    Seeded,
}

/// One line of the activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
}

impl ActivityLogEntry {
    pub fn from_check_in(event: &CheckInEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: describe_check_in(
                &event.ticket_id,
                event.gate.as_deref(),
                event.attendee_name.as_deref(),
            ),
            timestamp: event.timestamp,
            kind: ActivityKind::CheckIn,
        }
    }

    pub fn from_record(record: &CheckInRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: describe_check_in(
                &record.ticket_id,
                record.gate.as_deref(),
                record.attendee_name.as_deref(),
            ),
            timestamp: record.checked_in_at,
            kind: ActivityKind::Seeded,
        }
    }
}

fn describe_check_in(ticket_id: &str, gate: Option<&str>, attendee: Option<&str>) -> String {
    let who = match attendee {
        Some(name) if !name.trim().is_empty() => format!("{} (ticket {})", name, ticket_id),
        _ => format!("Ticket {}", ticket_id),
    };
    match gate {
        Some(gate) => format!("{} checked in at gate {}", who, gate),
        None => format!("{} checked in", who),
    }
}

/// Bounded, newest-first activity log. Inserting past capacity evicts the
/// oldest entry in the same call.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityLogEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ActivityLogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityLogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ActivityLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(ACTIVITY_LOG_CAPACITY)
    }
}

/// `round(100 * total / capacity)`, or 0 without capacity.
pub fn capacity_percentage(total: u64, capacity: u64) -> u64 {
    if capacity == 0 {
        return 0;
    }
    let total = total as u128;
    let capacity = capacity as u128;
    ((200 * total + capacity) / (2 * capacity)) as u64
}

/// Mutable root of one event's live data.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    /// Last snapshot applied.
    pub snapshot: Option<EventSnapshot>,
    pub total_check_ins: u64,
    pub revenue: Decimal,
    pub gate_stats: Vec<GateStat>,
    pub capacity: u64,
    pub log: ActivityLog,
}

impl LiveState {
    pub fn capacity_percentage(&self) -> u64 {
        capacity_percentage(self.total_check_ins, self.capacity)
    }
}

/// Read-only projection of a session, as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveView {
    pub event_id: String,
    pub title: Option<String>,
    pub status: MonitorStatus,
    pub total_check_ins: u64,
    pub capacity: u64,
    pub capacity_percentage: u64,
    pub revenue: Decimal,
    pub gate_stats: Vec<GateStat>,
    pub activity: Vec<ActivityLogEntry>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Reason the first load failed, while in `Error`.
    pub error: Option<String>,
    /// Most recent refresh failure while `Live`, cleared by the next success.
    pub last_refresh_error: Option<String>,
    /// Secondary snapshot reads that were substituted on the last snapshot.
    pub degraded: Vec<SnapshotField>,
    /// Incremented on every state change.
    pub version: u64,
}
