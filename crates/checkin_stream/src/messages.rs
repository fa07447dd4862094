//! Typed stream messages and frame decoding.
//!
//! Inbound frames look like `{"type": "checkInUpdate", "data": {...}}`. The
//! payload shape is loose on the wire: every field is optional except the
//! ticket identifier of a check-in, which is what makes it a check-in at all.

use crate::error::{Result, StreamError};
use chrono::{DateTime, TimeZone, Utc};
use external_services::ticketing::{GateStat, CHECK_IN_UPDATE, STATS_UPDATE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A message delivered by the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    CheckIn(CheckInEvent),
    Stats(StatsUpdate),
}

/// One ticket scanned at a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInEvent {
    pub ticket_id: String,
    pub gate: Option<String>,
    /// Server timestamp, or the receipt time when the frame carried none.
    pub timestamp: DateTime<Utc>,
    /// Authoritative running total, when the server includes it.
    pub total_check_ins: Option<u64>,
    pub attendee_name: Option<String>,
}

impl CheckInEvent {
    pub fn new(ticket_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            gate: None,
            timestamp,
            total_check_ins: None,
            attendee_name: None,
        }
    }

    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_check_ins = Some(total);
        self
    }
}

/// Partial correction of the aggregate counters. Absent fields mean "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdate {
    #[serde(default)]
    pub total_check_ins: Option<u64>,
    #[serde(default)]
    pub revenue: Option<Decimal>,
    #[serde(default)]
    pub gate_stats: Option<Vec<GateStat>>,
}

impl StatsUpdate {
    pub fn is_empty(&self) -> bool {
        self.total_check_ins.is_none() && self.revenue.is_none() && self.gate_stats.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCheckIn {
    #[serde(default)]
    ticket_id: Option<Value>,
    #[serde(default)]
    gate: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    total_check_ins: Option<Value>,
    #[serde(default)]
    attendee_name: Option<Value>,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for frame types this client does not consume and an
/// error for frames that cannot be turned into a message.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> Result<Option<StreamMessage>> {
    let frame: Frame = serde_json::from_str(text)?;

    match frame.kind.as_str() {
        CHECK_IN_UPDATE => decode_check_in(frame.data, received_at)
            .map(|event| Some(StreamMessage::CheckIn(event))),
        STATS_UPDATE => decode_stats(frame.data).map(|update| Some(StreamMessage::Stats(update))),
        _ => Ok(None),
    }
}

fn decode_check_in(data: Value, received_at: DateTime<Utc>) -> Result<CheckInEvent> {
    if !data.is_object() {
        return Err(StreamError::Malformed(
            "checkInUpdate payload is not an object".to_string(),
        ));
    }
    let raw: RawCheckIn = serde_json::from_value(data)?;

    let ticket_id = match raw.ticket_id {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(StreamError::Malformed(
                "checkInUpdate without ticketId".to_string(),
            ))
        }
    };

    let timestamp = raw
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let total_check_ins = match raw.total_check_ins {
        None | Some(Value::Null) => None,
        Some(value) => {
            let total = value.as_u64();
            if total.is_none() {
                debug!(
                    "Ignoring non-numeric totalCheckIns {} for ticket {}",
                    value, ticket_id
                );
            }
            total
        }
    };

    Ok(CheckInEvent {
        gate: raw.gate.as_ref().and_then(text_field),
        attendee_name: raw.attendee_name.as_ref().and_then(text_field),
        ticket_id,
        timestamp,
        total_check_ins,
    })
}

/// Non-empty strings as-is, numbers in their decimal form, anything else dropped.
fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_stats(data: Value) -> Result<StatsUpdate> {
    if !data.is_object() {
        return Err(StreamError::Malformed(
            "statsUpdate payload is not an object".to_string(),
        ));
    }
    Ok(serde_json::from_value(data)?)
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
