//! In-memory snapshot source and stream subscriber for tests.

use async_trait::async_trait;
use checkin_stream::{StreamError, StreamMessage, StreamSubscriber, Subscription};
use external_services::{
    CheckInRecord, EventDetails, GateStat, GateStatsResponse, Order, SnapshotSource, TicketTier,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Event with capacity 100, one gate and a configurable total.
#[derive(Default)]
pub struct FakeSource {
    pub fail_event: AtomicBool,
    pub total: AtomicU64,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total: AtomicU64::new(total),
            ..Default::default()
        })
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn get_event(&self, event_id: &str) -> external_services::Result<EventDetails> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_event.load(Ordering::SeqCst) {
            return Err(external_services::Error::EventNotFound(event_id.to_string()));
        }
        Ok(EventDetails {
            id: event_id.to_string(),
            title: "Summer Fest".to_string(),
            venue: None,
            starts_at: None,
            ticket_tiers: vec![TicketTier {
                id: "ga".to_string(),
                name: None,
                initial_quantity: 100,
                price: None,
            }],
        })
    }

    async fn get_gate_stats(&self, _event_id: &str) -> external_services::Result<GateStatsResponse> {
        let total = self.total.load(Ordering::SeqCst);
        Ok(GateStatsResponse {
            total_check_ins: Some(total),
            gates: vec![GateStat::new("A", total)],
        })
    }

    async fn get_event_orders(&self, _event_id: &str) -> external_services::Result<Vec<Order>> {
        Ok(vec![Order {
            id: "o1".to_string(),
            total: Decimal::new(2500, 0),
            status: None,
        }])
    }

    async fn get_event_check_ins(
        &self,
        _event_id: &str,
        _limit: usize,
    ) -> external_services::Result<Vec<CheckInRecord>> {
        Ok(Vec::new())
    }
}

/// Hands out detached subscriptions and keeps the producing side per event.
#[derive(Default)]
pub struct FakeSubscriber {
    pub fail: AtomicBool,
    senders: Mutex<HashMap<String, mpsc::Sender<StreamMessage>>>,
}

impl FakeSubscriber {
    pub fn sender(&self, event_id: &str) -> Option<mpsc::Sender<StreamMessage>> {
        self.senders.lock().unwrap().get(event_id).cloned()
    }
}

impl StreamSubscriber for FakeSubscriber {
    fn subscribe(&self, event_id: &str) -> checkin_stream::Result<Subscription> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StreamError::SubscriptionFailed("stream offline".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders
            .lock()
            .unwrap()
            .insert(event_id.to_string(), tx);
        Ok(Subscription::from_receiver(event_id, rx))
    }
}
