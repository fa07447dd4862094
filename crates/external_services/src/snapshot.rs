//! Snapshot fetcher: authoritative point-in-time state for one event.
//!
//! A snapshot combines four independent reads. Event metadata is required;
//! gate statistics, orders and recent check-ins are best effort. When one of
//! the best-effort reads fails the snapshot still succeeds with a zero/empty
//! value for that field, and the field is listed in [`EventSnapshot::degraded`]
//! so the failure stays visible for diagnostics.

use crate::error::{Error, Result};
use crate::ticketing::types::{
    revenue_from_orders, CheckInRecord, EventDetails, GateStat, GateStatsResponse, Order,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Default number of recent check-ins requested per snapshot.
pub const DEFAULT_CHECK_IN_LIMIT: usize = 50;

/// Read side of the ticketing API used to build snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<EventDetails>;

    async fn get_gate_stats(&self, event_id: &str) -> Result<GateStatsResponse>;

    async fn get_event_orders(&self, event_id: &str) -> Result<Vec<Order>>;

    async fn get_event_check_ins(&self, event_id: &str, limit: usize)
        -> Result<Vec<CheckInRecord>>;
}

/// A secondary snapshot field that was substituted because its read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotField {
    GateStats,
    Revenue,
    RecentCheckIns,
}

impl SnapshotField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotField::GateStats => "gate_stats",
            SnapshotField::Revenue => "revenue",
            SnapshotField::RecentCheckIns => "recent_check_ins",
        }
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable authoritative state of one event at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub event_id: String,
    pub title: String,
    pub capacity: u64,
    pub total_check_ins: u64,
    pub revenue: Decimal,
    pub gate_stats: Vec<GateStat>,
    /// Most recent check-ins, newest first.
    pub recent_check_ins: Vec<CheckInRecord>,
    pub fetched_at: DateTime<Utc>,
    pub degraded: Vec<SnapshotField>,
}

impl EventSnapshot {
    /// Whether every secondary read succeeded.
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Builds [`EventSnapshot`]s from a [`SnapshotSource`].
#[derive(Clone)]
pub struct SnapshotFetcher {
    source: Arc<dyn SnapshotSource>,
    check_in_limit: usize,
}

impl SnapshotFetcher {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            check_in_limit: DEFAULT_CHECK_IN_LIMIT,
        }
    }

    /// Override how many recent check-ins are requested.
    pub fn with_check_in_limit(mut self, limit: usize) -> Self {
        self.check_in_limit = limit;
        self
    }

    /// Fetch a snapshot. Only a metadata failure is returned as an error.
    pub async fn fetch_snapshot(&self, event_id: &str) -> Result<EventSnapshot> {
        counter!("live_monitor_snapshot_fetches_total").increment(1);

        let (event, gates, orders, check_ins) = tokio::join!(
            self.source.get_event(event_id),
            self.source.get_gate_stats(event_id),
            self.source.get_event_orders(event_id),
            self.source.get_event_check_ins(event_id, self.check_in_limit),
        );

        let event = event.inspect_err(|e| {
            error!("Failed to fetch event metadata for {}: {}", event_id, e);
            counter!("live_monitor_snapshot_failures_total").increment(1);
        })?;

        if event.id != event_id {
            error!(
                "Snapshot for {} returned metadata of event {}",
                event_id, event.id
            );
            counter!("live_monitor_snapshot_failures_total").increment(1);
            return Err(Error::EventMismatch {
                requested: event_id.to_string(),
                returned: event.id,
            });
        }

        let mut degraded = Vec::new();

        let gates = gates.unwrap_or_else(|e| {
            Self::record_degraded(event_id, SnapshotField::GateStats, &e, &mut degraded);
            GateStatsResponse::default()
        });

        let revenue = match orders {
            Ok(orders) => revenue_from_orders(&orders),
            Err(e) => {
                Self::record_degraded(event_id, SnapshotField::Revenue, &e, &mut degraded);
                Decimal::ZERO
            }
        };

        let mut recent_check_ins = check_ins.unwrap_or_else(|e| {
            Self::record_degraded(event_id, SnapshotField::RecentCheckIns, &e, &mut degraded);
            Vec::new()
        });
        recent_check_ins.sort_by(|a, b| b.checked_in_at.cmp(&a.checked_in_at));
        recent_check_ins.truncate(self.check_in_limit);

        let snapshot = EventSnapshot {
            event_id: event.id.clone(),
            title: event.title.clone(),
            capacity: event.capacity(),
            total_check_ins: gates.total(),
            revenue,
            gate_stats: gates.gates,
            recent_check_ins,
            fetched_at: Utc::now(),
            degraded,
        };

        debug!(
            "Snapshot for {}: {}/{} checked in, revenue {}, {} gates, degraded {:?}",
            event_id,
            snapshot.total_check_ins,
            snapshot.capacity,
            snapshot.revenue,
            snapshot.gate_stats.len(),
            snapshot.degraded
        );

        Ok(snapshot)
    }

    fn record_degraded(
        event_id: &str,
        field: SnapshotField,
        err: &crate::Error,
        degraded: &mut Vec<SnapshotField>,
    ) {
        warn!(
            "Snapshot for {} degraded: {} unavailable ({}), using empty value",
            event_id, field, err
        );
        counter!("live_monitor_snapshot_degraded_total", "field" => field.as_str()).increment(1);
        degraded.push(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticketing::types::TicketTier;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        fail_event: bool,
        fail_gates: bool,
        fail_orders: bool,
        fail_check_ins: bool,
        returned_id: Option<String>,
        calls: AtomicUsize,
    }

    fn api_error(what: &str) -> Error {
        Error::Api(format!("{} unavailable", what))
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn get_event(&self, event_id: &str) -> Result<EventDetails> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_event {
                return Err(Error::EventNotFound(event_id.to_string()));
            }
            Ok(EventDetails {
                id: self
                    .returned_id
                    .clone()
                    .unwrap_or_else(|| event_id.to_string()),
                title: "Harbour Nights".to_string(),
                venue: None,
                starts_at: None,
                ticket_tiers: vec![
                    TicketTier {
                        id: "ga".to_string(),
                        name: Some("General".to_string()),
                        initial_quantity: 80,
                        price: None,
                    },
                    TicketTier {
                        id: "vip".to_string(),
                        name: Some("VIP".to_string()),
                        initial_quantity: 20,
                        price: None,
                    },
                ],
            })
        }

        async fn get_gate_stats(&self, _event_id: &str) -> Result<GateStatsResponse> {
            if self.fail_gates {
                return Err(api_error("gate stats"));
            }
            Ok(GateStatsResponse {
                total_check_ins: Some(40),
                gates: vec![GateStat::new("North", 25), GateStat::new("South", 15)],
            })
        }

        async fn get_event_orders(&self, _event_id: &str) -> Result<Vec<Order>> {
            if self.fail_orders {
                return Err(api_error("orders"));
            }
            Ok(vec![
                Order {
                    id: "o1".to_string(),
                    total: Decimal::new(2500, 0),
                    status: Some("paid".to_string()),
                },
                Order {
                    id: "o2".to_string(),
                    total: Decimal::new(1000, 0),
                    status: Some("refunded".to_string()),
                },
            ])
        }

        async fn get_event_check_ins(
            &self,
            _event_id: &str,
            _limit: usize,
        ) -> Result<Vec<CheckInRecord>> {
            if self.fail_check_ins {
                return Err(api_error("check-ins"));
            }
            Ok(vec![
                CheckInRecord {
                    ticket_id: "T-1".to_string(),
                    gate: Some("North".to_string()),
                    checked_in_at: Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap(),
                    attendee_name: None,
                },
                CheckInRecord {
                    ticket_id: "T-2".to_string(),
                    gate: None,
                    checked_in_at: Utc.with_ymd_and_hms(2026, 6, 1, 18, 5, 0).unwrap(),
                    attendee_name: None,
                },
            ])
        }
    }

    fn fetcher(source: FakeSource) -> SnapshotFetcher {
        SnapshotFetcher::new(Arc::new(source))
    }

    #[tokio::test]
    async fn test_complete_snapshot() {
        let snapshot = fetcher(FakeSource::default())
            .fetch_snapshot("evt1")
            .await
            .unwrap();

        assert_eq!(snapshot.event_id, "evt1");
        assert_eq!(snapshot.title, "Harbour Nights");
        assert_eq!(snapshot.capacity, 100);
        assert_eq!(snapshot.total_check_ins, 40);
        assert_eq!(snapshot.revenue, Decimal::new(2500, 0));
        assert_eq!(snapshot.gate_stats.len(), 2);
        assert!(snapshot.is_complete());
        // Newest first
        assert_eq!(snapshot.recent_check_ins[0].ticket_id, "T-2");
    }

    #[tokio::test]
    async fn test_metadata_failure_is_fatal() {
        let source = FakeSource {
            fail_event: true,
            ..Default::default()
        };
        let err = fetcher(source).fetch_snapshot("evt1").await.unwrap_err();
        assert!(matches!(err, Error::EventNotFound(ref id) if id == "evt1"));
    }

    #[tokio::test]
    async fn test_metadata_for_another_event_is_rejected() {
        let source = FakeSource {
            returned_id: Some("other".to_string()),
            ..Default::default()
        };
        let err = fetcher(source).fetch_snapshot("evt1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::EventMismatch { ref requested, ref returned }
                if requested == "evt1" && returned == "other"
        ));
    }

    #[tokio::test]
    async fn test_secondary_failures_degrade_independently() {
        let source = FakeSource {
            fail_gates: true,
            fail_orders: true,
            ..Default::default()
        };
        let snapshot = fetcher(source).fetch_snapshot("evt1").await.unwrap();

        assert_eq!(snapshot.capacity, 100);
        assert_eq!(snapshot.total_check_ins, 0);
        assert!(snapshot.gate_stats.is_empty());
        assert_eq!(snapshot.revenue, Decimal::ZERO);
        assert_eq!(snapshot.recent_check_ins.len(), 2);
        assert_eq!(
            snapshot.degraded,
            vec![SnapshotField::GateStats, SnapshotField::Revenue]
        );
    }

    #[tokio::test]
    async fn test_check_in_failure_degrades() {
        let source = FakeSource {
            fail_check_ins: true,
            ..Default::default()
        };
        let snapshot = fetcher(source).fetch_snapshot("evt1").await.unwrap();

        assert!(snapshot.recent_check_ins.is_empty());
        assert_eq!(snapshot.degraded, vec![SnapshotField::RecentCheckIns]);
        assert_eq!(snapshot.total_check_ins, 40);
    }

    #[tokio::test]
    async fn test_repeated_fetches_are_independent() {
        let source = Arc::new(FakeSource::default());
        let fetcher = SnapshotFetcher::new(source.clone()).with_check_in_limit(1);

        let first = fetcher.fetch_snapshot("evt1").await.unwrap();
        let second = fetcher.fetch_snapshot("evt1").await.unwrap();

        assert_eq!(first.total_check_ins, second.total_check_ins);
        assert_eq!(first.recent_check_ins.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
