//! Live check-in channel handler.
//!
//! This handler:
//! 1. Joins the event channel on every (re)connect
//! 2. Decodes inbound frames into [`StreamMessage`]s, stamping receipt time
//! 3. Forwards them to the subscription's bounded queue
//!
//! Undecodable frames are dropped here and never reach the consumer.

use crate::messages::{decode_frame, StreamMessage};
use async_trait::async_trait;
use chrono::Utc;
use common::error::Result;
use common::{ControlCommand, WsHandler};
use external_services::ticketing::{build_join_message, build_leave_message};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// WebSocket handler scoped to one event's channel.
pub struct CheckInChannelHandler {
    url: String,
    event_id: String,
    /// False once the channel has been left; reconnects then skip the join.
    joined: AtomicBool,
    tx: mpsc::Sender<StreamMessage>,
    /// Worker ID for logging.
    worker_id: String,
}

impl CheckInChannelHandler {
    pub fn new(
        url: impl Into<String>,
        event_id: impl Into<String>,
        tx: mpsc::Sender<StreamMessage>,
        worker_id: String,
    ) -> Self {
        Self {
            url: url.into(),
            event_id: event_id.into(),
            joined: AtomicBool::new(true),
            tx,
            worker_id,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    fn reconnect_status(&self) -> String {
        if self.is_joined() {
            format!("Connected, joined channel for event {}", self.event_id)
        } else {
            format!(
                "Connected, channel for event {} already left, not re-joining",
                self.event_id
            )
        }
    }
}

#[async_trait]
impl WsHandler for CheckInChannelHandler {
    fn url(&self) -> &str {
        &self.url
    }

    fn on_connect_message(&self) -> Option<String> {
        self.is_joined()
            .then(|| build_join_message(&self.event_id))
    }

    async fn on_message(&self, msg: &str) -> Result<()> {
        let received_at = Utc::now();

        debug!("[{}] Received frame: {}", self.worker_id, msg);

        let message = match decode_frame(msg, received_at) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("[{}] Ignoring frame of unknown type", self.worker_id);
                return Ok(());
            }
            Err(e) => {
                warn!("[{}] Dropping malformed frame: {}", self.worker_id, e);
                counter!("stream_messages_dropped_total", "reason" => "malformed").increment(1);
                return Ok(());
            }
        };

        if self.tx.send(message).await.is_err() {
            // Subscription already released; nothing left to deliver to.
            debug!("[{}] Subscriber gone, dropping message", self.worker_id);
            counter!("stream_messages_dropped_total", "reason" => "unsubscribed").increment(1);
            return Ok(());
        }

        counter!("stream_messages_delivered_total").increment(1);
        Ok(())
    }

    async fn on_disconnect(&self) {
        warn!(
            "[{}] Channel for event {} lost, will re-join on reconnect",
            self.worker_id, self.event_id
        );
    }

    async fn on_reconnect(&self) {
        info!("[{}] {}", self.worker_id, self.reconnect_status());
    }

    async fn handle_command(&self, cmd: ControlCommand) -> Option<String> {
        match cmd {
            ControlCommand::Leave(event_id) if event_id == self.event_id => {
                if self.joined.swap(false, Ordering::SeqCst) {
                    info!("[{}] Leaving channel for event {}", self.worker_id, event_id);
                    Some(build_leave_message(&event_id))
                } else {
                    None
                }
            }
            ControlCommand::Leave(other) => {
                warn!(
                    "[{}] Ignoring leave for {}, handler is scoped to {}",
                    self.worker_id, other, self.event_id
                );
                None
            }
            ControlCommand::Shutdown => None,
        }
    }
}
