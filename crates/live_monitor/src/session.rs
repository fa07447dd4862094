//! Monitoring session: one actor task per monitored event.
//!
//! The task owns the event's [`LiveAggregator`] and its stream
//! [`Subscription`]. Stream messages, snapshot results and control commands
//! all arrive over channels into one `select!` loop, so mutations are applied
//! one at a time in arrival order. Snapshot fetches run in a separate task
//! (at most one in flight) and report back over a channel, keeping the stream
//! flowing while a fetch is outstanding.
//!
//! Every state change is published as a fresh [`LiveView`] on a watch channel.

use crate::aggregator::LiveAggregator;
use crate::error::{MonitorError, Result};
use crate::state::{LiveView, MonitorStatus};
use checkin_stream::{StreamMessage, StreamSubscriber, Subscription};
use external_services::{EventSnapshot, SnapshotFetcher};
use metrics::{counter, gauge};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Fallback timer period when periodic refresh is disabled; the tick is never
/// acted on in that case.
const IDLE_TICK: Duration = Duration::from_secs(3600);

/// Most already-queued stream messages folded into one published view.
const MAX_COALESCED_MESSAGES: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Snapshot refresh period while `Live`; `None` disables periodic refresh.
    pub refresh_interval: Option<Duration>,
    /// Capacity of the command channel.
    pub command_buffer: usize,
    /// How long `shutdown` waits for the task before aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Some(Duration::from_secs(30)),
            command_buffer: 16,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval.filter(|d| !d.is_zero());
        self
    }
}

/// Commands accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Re-enter `Loading` after a failed first load.
    Retry,
    /// Fetch a snapshot now instead of waiting for the timer.
    Refresh,
    Shutdown,
}

/// Cloneable command side of a session.
#[derive(Debug, Clone)]
pub struct SessionCommands {
    event_id: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionCommands {
    pub async fn retry(&self) -> Result<()> {
        self.send(SessionCommand::Retry).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.send(SessionCommand::Refresh).await
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| MonitorError::SessionClosed(self.event_id.clone()))
    }
}

/// Owner-side handle of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: SessionCommands,
    view_rx: watch::Receiver<LiveView>,
    join_handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl SessionHandle {
    pub fn event_id(&self) -> &str {
        &self.commands.event_id
    }

    /// Latest published view.
    pub fn view(&self) -> LiveView {
        self.view_rx.borrow().clone()
    }

    /// Change-notified view stream.
    pub fn watch(&self) -> watch::Receiver<LiveView> {
        self.view_rx.clone()
    }

    pub fn commands(&self) -> SessionCommands {
        self.commands.clone()
    }

    pub async fn retry(&self) -> Result<()> {
        self.commands.retry().await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.commands.refresh().await
    }

    /// Stop the session: unsubscribe and discard its state.
    pub async fn shutdown(self) {
        let Self {
            commands,
            mut join_handle,
            shutdown_timeout,
            ..
        } = self;

        let _ = commands.tx.send(SessionCommand::Shutdown).await;
        if tokio::time::timeout(shutdown_timeout, &mut join_handle)
            .await
            .is_err()
        {
            warn!(
                "[{}] Session did not stop in {:?}, aborting",
                commands.event_id, shutdown_timeout
            );
            join_handle.abort();
        }
    }
}

type FetchResult = std::result::Result<EventSnapshot, String>;

/// Session actor state. Lives inside the spawned task.
pub struct MonitorSession {
    aggregator: LiveAggregator,
    subscription: Subscription,
    fetcher: SnapshotFetcher,
    config: SessionConfig,
    view_tx: watch::Sender<LiveView>,
    command_rx: mpsc::Receiver<SessionCommand>,
    fetch_tx: mpsc::Sender<FetchResult>,
    fetch_rx: mpsc::Receiver<FetchResult>,
    fetch_task: Option<JoinHandle<()>>,
}

impl MonitorSession {
    /// Subscribe to the event's stream, then start the first load in a new
    /// task. Messages arriving before the first snapshot are dropped.
    pub fn spawn(
        event_id: &str,
        fetcher: SnapshotFetcher,
        subscriber: &dyn StreamSubscriber,
        config: SessionConfig,
    ) -> Result<SessionHandle> {
        let event_id = event_id.trim();
        if event_id.is_empty() {
            return Err(MonitorError::InvalidEventId(event_id.to_string()));
        }

        let subscription = subscriber.subscribe(event_id)?;

        let mut aggregator = LiveAggregator::new(event_id);
        aggregator.begin_loading();

        let (view_tx, view_rx) = watch::channel(aggregator.view());
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (fetch_tx, fetch_rx) = mpsc::channel(1);
        let shutdown_timeout = config.shutdown_timeout;

        let session = MonitorSession {
            aggregator,
            subscription,
            fetcher,
            config,
            view_tx,
            command_rx,
            fetch_tx,
            fetch_rx,
            fetch_task: None,
        };

        let join_handle = tokio::spawn(session.run());

        Ok(SessionHandle {
            commands: SessionCommands {
                event_id: event_id.to_string(),
                tx: command_tx,
            },
            view_rx,
            join_handle,
            shutdown_timeout,
        })
    }

    async fn run(mut self) {
        let event_id = self.aggregator.event_id().to_string();
        info!("[{}] Monitoring session started", event_id);
        gauge!("live_monitor_active_sessions").increment(1.0);

        self.start_fetch();

        let period = self.config.refresh_interval.unwrap_or(IDLE_TICK);
        let mut refresh_timer = interval_at(Instant::now() + period, period);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let periodic_refresh = self.config.refresh_interval.is_some();

        let mut stream_open = true;

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(SessionCommand::Retry) => self.retry(),
                    Some(SessionCommand::Refresh) => self.manual_refresh(),
                },

                Some(result) = self.fetch_rx.recv() => {
                    self.fetch_task = None;
                    self.on_fetch_result(result);
                }

                message = self.subscription.recv(), if stream_open => match message {
                    Some(message) => {
                        if self.apply_burst(message) {
                            self.publish();
                        }
                    }
                    None => {
                        warn!("[{}] Event stream ended, continuing on snapshots only", event_id);
                        stream_open = false;
                    }
                },

                _ = refresh_timer.tick(), if periodic_refresh => {
                    if self.aggregator.is_live() {
                        self.start_fetch();
                    }
                }
            }
        }

        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        self.subscription.unsubscribe().await;

        gauge!("live_monitor_active_sessions").decrement(1.0);
        info!("[{}] Monitoring session stopped", event_id);
    }

    /// Apply `first` plus whatever the stream has already queued behind it,
    /// so a burst costs one view rebuild instead of one per message.
    fn apply_burst(&mut self, first: StreamMessage) -> bool {
        let mut changed = self.aggregator.apply_stream_message(&first);
        let mut applied = 1;
        while applied < MAX_COALESCED_MESSAGES {
            let Some(message) = self.subscription.try_recv() else {
                break;
            };
            changed |= self.aggregator.apply_stream_message(&message);
            applied += 1;
        }
        counter!("live_monitor_stream_messages_total").increment(applied as u64);
        if applied > 1 {
            debug!(
                "[{}] Coalesced {} stream messages into one view",
                self.aggregator.event_id(),
                applied
            );
        }
        changed
    }

    fn retry(&mut self) {
        if self.aggregator.status() != MonitorStatus::Error {
            debug!(
                "[{}] Retry ignored while {:?}",
                self.aggregator.event_id(),
                self.aggregator.status()
            );
            return;
        }
        info!("[{}] Retrying initial load", self.aggregator.event_id());
        if self.aggregator.begin_loading() {
            self.publish();
        }
        self.start_fetch();
    }

    fn manual_refresh(&mut self) {
        if self.aggregator.is_live() {
            self.start_fetch();
        } else {
            debug!(
                "[{}] Refresh ignored while {:?}",
                self.aggregator.event_id(),
                self.aggregator.status()
            );
        }
    }

    fn start_fetch(&mut self) {
        if self.fetch_task.is_some() {
            debug!(
                "[{}] Snapshot fetch already in flight",
                self.aggregator.event_id()
            );
            return;
        }

        let fetcher = self.fetcher.clone();
        let tx = self.fetch_tx.clone();
        let event_id = self.aggregator.event_id().to_string();

        self.fetch_task = Some(tokio::spawn(async move {
            let result = fetcher
                .fetch_snapshot(&event_id)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(result).await;
        }));
    }

    fn on_fetch_result(&mut self, result: FetchResult) {
        let changed = match result {
            Ok(snapshot) => self.aggregator.apply_snapshot(snapshot),
            Err(e) => {
                if !self.aggregator.is_live() {
                    error!(
                        "[{}] Could not load event: {}",
                        self.aggregator.event_id(),
                        e
                    );
                }
                self.aggregator.apply_fetch_failure(e)
            }
        };
        if changed {
            self.publish();
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.aggregator.view());
    }
}
