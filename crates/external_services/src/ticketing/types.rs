//! Ticketing API data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Response body that is either bare or wrapped as `{"data": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiEnvelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            ApiEnvelope::Wrapped { data } => data,
            ApiEnvelope::Bare(data) => data,
        }
    }
}

/// Event metadata from `GET /events/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "tiers")]
    pub ticket_tiers: Vec<TicketTier>,
}

impl EventDetails {
    /// Total capacity: sum of every tier's initial quantity.
    pub fn capacity(&self) -> u64 {
        self.ticket_tiers.iter().map(|t| t.initial_quantity).sum()
    }
}

/// Ticket tier within an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTier {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub initial_quantity: u64,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Check-in count for one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStat {
    pub gate: String,
    pub count: u64,
}

impl GateStat {
    pub fn new(gate: impl Into<String>, count: u64) -> Self {
        Self {
            gate: gate.into(),
            count,
        }
    }
}

/// Response from `GET /events/{id}/gate-stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatsResponse {
    #[serde(default)]
    pub total_check_ins: Option<u64>,
    #[serde(default, alias = "gateStats")]
    pub gates: Vec<GateStat>,
}

impl GateStatsResponse {
    /// Reported total, falling back to the sum of the per-gate counts.
    pub fn total(&self) -> u64 {
        self.total_check_ins
            .unwrap_or_else(|| self.gates.iter().map(|g| g.count).sum())
    }
}

/// Order from `GET /events/{id}/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub total: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}

impl Order {
    /// Cancelled and refunded orders do not contribute to revenue.
    pub fn counts_toward_revenue(&self) -> bool {
        !matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("cancelled" | "canceled" | "refunded")
        )
    }
}

/// Sum of order totals that count toward revenue.
pub fn revenue_from_orders(orders: &[Order]) -> Decimal {
    orders
        .iter()
        .filter(|o| o.counts_toward_revenue())
        .map(|o| o.total)
        .sum()
}

/// Check-in record from `GET /events/{id}/check-ins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecord {
    pub ticket_id: String,
    #[serde(default)]
    pub gate: Option<String>,
    pub checked_in_at: DateTime<Utc>,
    #[serde(default)]
    pub attendee_name: Option<String>,
}
