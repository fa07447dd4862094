//! Live event channel frames.
//!
//! Every frame is a JSON object tagged by `type`. Control frames carry the
//! event identifier; inbound frames carry their payload under `data`.

use serde_json::json;

/// Outbound frame type announcing interest in an event's channel.
pub const JOIN_EVENT: &str = "joinEvent";

/// Outbound frame type announcing departure from an event's channel.
pub const LEAVE_EVENT: &str = "leaveEvent";

/// Inbound frame type carrying a single check-in.
pub const CHECK_IN_UPDATE: &str = "checkInUpdate";

/// Inbound frame type carrying a partial stats correction.
pub const STATS_UPDATE: &str = "statsUpdate";

/// Build the join frame for an event channel.
pub fn build_join_message(event_id: &str) -> String {
    json!({ "type": JOIN_EVENT, "eventId": event_id }).to_string()
}

/// Build the leave frame for an event channel.
pub fn build_leave_message(event_id: &str) -> String {
    json!({ "type": LEAVE_EVENT, "eventId": event_id }).to_string()
}
