//! Event stream client and subscription handles.

use crate::error::{Result, StreamError};
use crate::handler::CheckInChannelHandler;
use crate::messages::StreamMessage;
use common::{ControlCommand, WsManager, WsManagerConfig};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default capacity of a subscription's message queue.
pub const DEFAULT_STREAM_BUFFER: usize = 1024;

/// Configuration for the event stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint of the live event channel (`ws://` or `wss://`).
    pub url: String,
    /// Capacity of each subscription's message queue.
    pub buffer: usize,
    /// How long unsubscribe waits for the transport to close before aborting it.
    pub shutdown_timeout: Duration,
    /// Transport settings.
    pub ws: WsManagerConfig,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            buffer: DEFAULT_STREAM_BUFFER,
            shutdown_timeout: Duration::from_secs(5),
            ws: WsManagerConfig {
                channel_label: "checkin".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

/// Anything that can open a [`Subscription`] for an event.
pub trait StreamSubscriber: Send + Sync {
    fn subscribe(&self, event_id: &str) -> Result<Subscription>;
}

/// Opens one transport per subscription.
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    config: StreamConfig,
    worker_counter: Arc<AtomicU64>,
}

impl EventStreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            worker_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Join the channel of `event_id`. Must be called inside a tokio runtime.
    pub fn subscribe(&self, event_id: &str) -> Result<Subscription> {
        if event_id.trim().is_empty() {
            return Err(StreamError::SubscriptionFailed(
                "event id must not be empty".to_string(),
            ));
        }
        if !(self.config.url.starts_with("ws://") || self.config.url.starts_with("wss://")) {
            return Err(StreamError::SubscriptionFailed(format!(
                "unsupported stream URL: {}",
                self.config.url
            )));
        }

        let n = self.worker_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let worker_id = format!("checkin-{}-{}", event_id, n);

        info!("[{}] Subscribing to event {}", worker_id, event_id);

        let (tx, rx) = mpsc::channel(self.config.buffer);
        let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(8);

        let handler =
            CheckInChannelHandler::new(self.config.url.clone(), event_id, tx, worker_id.clone());
        let manager = WsManager::new(handler, self.config.ws.clone(), command_rx, worker_id);

        let join_handle = tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("Stream worker failed: {:?}", e);
            }
        });

        counter!("stream_subscriptions_total").increment(1);
        gauge!("stream_active_subscriptions").increment(1.0);

        Ok(Subscription {
            event_id: event_id.to_string(),
            messages: rx,
            transport: Some(Transport {
                command_tx,
                join_handle,
                shutdown_timeout: self.config.shutdown_timeout,
            }),
            closed: false,
        })
    }

    /// Release a subscription. Same as [`Subscription::unsubscribe`].
    pub async fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe().await;
    }
}

impl StreamSubscriber for EventStreamClient {
    fn subscribe(&self, event_id: &str) -> Result<Subscription> {
        EventStreamClient::subscribe(self, event_id)
    }
}

struct Transport {
    command_tx: mpsc::Sender<ControlCommand>,
    join_handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

/// Cancellable, ordered sequence of messages for one event.
pub struct Subscription {
    event_id: String,
    messages: mpsc::Receiver<StreamMessage>,
    transport: Option<Transport>,
    closed: bool,
}

impl Subscription {
    /// Wrap a plain receiver, for producers that are not a WebSocket.
    pub fn from_receiver(event_id: impl Into<String>, messages: mpsc::Receiver<StreamMessage>) -> Self {
        Self {
            event_id: event_id.into(),
            messages,
            transport: None,
            closed: false,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next message in delivery order. `None` once unsubscribed or when the
    /// producer is gone.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if self.closed {
            return None;
        }
        self.messages.recv().await
    }

    /// A message that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<StreamMessage> {
        if self.closed {
            return None;
        }
        self.messages.try_recv().ok()
    }

    /// Leave the channel and release the transport.
    ///
    /// Idempotent, and safe when the transport is already disconnected. No
    /// message is delivered after this returns.
    pub async fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.messages.close();
        let mut discarded = 0usize;
        while self.messages.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(
                "Discarded {} undelivered messages for event {}",
                discarded, self.event_id
            );
        }

        if let Some(transport) = self.transport.take() {
            let Transport {
                command_tx,
                mut join_handle,
                shutdown_timeout,
            } = transport;
            let event_id = self.event_id.clone();

            let graceful = tokio::time::timeout(shutdown_timeout, async {
                // Send errors mean the worker already stopped.
                let _ = command_tx.send(ControlCommand::Leave(event_id)).await;
                let _ = command_tx.send(ControlCommand::Shutdown).await;
                let _ = (&mut join_handle).await;
            })
            .await;

            if graceful.is_err() {
                warn!(
                    "Stream worker for event {} did not stop in {:?}, aborting",
                    self.event_id, shutdown_timeout
                );
                join_handle.abort();
            }
            gauge!("stream_active_subscriptions").decrement(1.0);
        }

        info!("Unsubscribed from event {}", self.event_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.join_handle.abort();
            gauge!("stream_active_subscriptions").decrement(1.0);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_id", &self.event_id)
            .field("closed", &self.closed)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_config_defaults() {
        let config = StreamConfig::new("ws://localhost:3000/ws");
        assert_eq!(config.buffer, DEFAULT_STREAM_BUFFER);
        assert_eq!(config.ws.channel_label, "checkin");
        assert_eq!(config.with_buffer(0).buffer, 1);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_input() {
        let client = EventStreamClient::new(StreamConfig::new("ws://localhost:3000/ws"));
        assert!(client.subscribe("  ").is_err());

        let client = EventStreamClient::new(StreamConfig::new("http://localhost:3000"));
        assert!(matches!(
            client.subscribe("evt1"),
            Err(StreamError::SubscriptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_detached_unsubscribe_discards_pending() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::from_receiver("evt1", rx);

        tx.send(StreamMessage::Stats(Default::default())).await.unwrap();
        sub.unsubscribe().await;
        sub.unsubscribe().await;

        assert!(sub.is_closed());
        assert!(sub.recv().await.is_none());
        assert!(tx.send(StreamMessage::Stats(Default::default())).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_when_server_unreachable() {
        let mut config = StreamConfig::new("ws://127.0.0.1:1/ws");
        config.ws.connect_timeout = Duration::from_millis(200);
        config.shutdown_timeout = Duration::from_secs(2);
        let client = EventStreamClient::new(config);

        let mut sub = client.subscribe("evt1").unwrap();
        tokio::time::timeout(Duration::from_secs(5), sub.unsubscribe())
            .await
            .expect("unsubscribe should finish");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();

            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(text) = msg {
                    let is_join = text.contains("joinEvent");
                    let _ = seen_tx.send(text.to_string());
                    if is_join {
                        let _ = write
                            .send(Message::Text(
                                r#"{"type":"checkInUpdate","data":{"ticketId":"T-1","gate":"A"}}"#
                                    .to_string(),
                            ))
                            .await;
                        let _ = write
                            .send(Message::Text(r#"{"type":"bogus"}"#.to_string()))
                            .await;
                        let _ = write
                            .send(Message::Text(
                                r#"{"type":"statsUpdate","data":{"revenue":250}}"#.to_string(),
                            ))
                            .await;
                    }
                }
            }
        });

        let client = EventStreamClient::new(StreamConfig::new(format!("ws://{}/ws", addr)));
        let mut sub = client.subscribe("evt1").unwrap();
        let wait = Duration::from_secs(5);

        let first = tokio::time::timeout(wait, sub.recv()).await.unwrap().unwrap();
        match first {
            StreamMessage::CheckIn(event) => {
                assert_eq!(event.ticket_id, "T-1");
                assert_eq!(event.gate.as_deref(), Some("A"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let second = tokio::time::timeout(wait, sub.recv()).await.unwrap().unwrap();
        assert!(matches!(second, StreamMessage::Stats(ref s) if s.revenue.is_some()));

        sub.unsubscribe().await;
        assert!(sub.recv().await.is_none());
        sub.unsubscribe().await;

        let join = tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().unwrap();
        assert!(join.contains("joinEvent") && join.contains("evt1"));
        let leave = tokio::time::timeout(wait, seen_rx.recv()).await.unwrap().unwrap();
        assert!(leave.contains("leaveEvent") && leave.contains("evt1"));
    }
}
