//! Live aggregator: the single owner of one event's [`LiveState`].
//!
//! Merge rule: snapshots overwrite the authoritative fields (total check-ins,
//! revenue, gate stats, capacity) wholesale; stream messages are incremental
//! corrections and only apply while `Live`.
//!
//! Every `apply_*` method is synchronous, does no I/O and returns whether the
//! state changed, so callers only publish a new view on real changes.

use crate::state::{ActivityLogEntry, LiveState, LiveView, MonitorStatus};
use checkin_stream::{CheckInEvent, StatsUpdate, StreamMessage};
use external_services::EventSnapshot;
use metrics::counter;
use tracing::{debug, info, warn};

pub struct LiveAggregator {
    event_id: String,
    status: MonitorStatus,
    state: LiveState,
    load_error: Option<String>,
    last_refresh_error: Option<String>,
    version: u64,
}

impl LiveAggregator {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            status: MonitorStatus::Uninitialized,
            state: LiveState::default(),
            load_error: None,
            last_refresh_error: None,
            version: 0,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status == MonitorStatus::Live
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Enter `Loading` from `Uninitialized` or `Error`. No-op otherwise.
    pub fn begin_loading(&mut self) -> bool {
        match self.status {
            MonitorStatus::Uninitialized | MonitorStatus::Error => {
                debug!("[{}] {:?} -> Loading", self.event_id, self.status);
                self.status = MonitorStatus::Loading;
                self.load_error = None;
                self.bump();
                true
            }
            MonitorStatus::Loading | MonitorStatus::Live => false,
        }
    }

    /// Overwrite the authoritative fields with `snapshot` and enter `Live`.
    ///
    /// The first snapshot also seeds the activity log from its recent
    /// check-ins; later snapshots leave the log alone.
    pub fn apply_snapshot(&mut self, snapshot: EventSnapshot) -> bool {
        if snapshot.event_id != self.event_id {
            warn!(
                "[{}] Ignoring snapshot for other event {}",
                self.event_id, snapshot.event_id
            );
            return false;
        }

        let first_load = !self.is_live();

        self.state.total_check_ins = snapshot.total_check_ins;
        self.state.revenue = snapshot.revenue;
        self.state.gate_stats = snapshot.gate_stats.clone();
        self.state.capacity = snapshot.capacity;

        if first_load {
            self.state.log.clear();
            // Oldest first so the newest ends up at the front.
            for record in snapshot.recent_check_ins.iter().rev() {
                self.state.log.push(ActivityLogEntry::from_record(record));
            }
            info!(
                "[{}] Live: {}/{} checked in, {} recent check-ins seeded",
                self.event_id,
                self.state.total_check_ins,
                self.state.capacity,
                self.state.log.len()
            );
        }

        self.status = MonitorStatus::Live;
        self.load_error = None;
        self.last_refresh_error = None;
        self.state.snapshot = Some(snapshot);

        counter!("live_monitor_snapshots_applied_total").increment(1);
        self.bump();
        true
    }

    /// Record a failed snapshot fetch.
    ///
    /// Before the first snapshot this moves to `Error`; once `Live` the state
    /// is kept and the failure is only remembered until the next success.
    pub fn apply_fetch_failure(&mut self, error: impl Into<String>) -> bool {
        let error = error.into();
        if self.is_live() {
            warn!(
                "[{}] Snapshot refresh failed, keeping live state: {}",
                self.event_id, error
            );
            self.last_refresh_error = Some(error);
        } else {
            warn!("[{}] Initial load failed: {}", self.event_id, error);
            self.status = MonitorStatus::Error;
            self.load_error = Some(error);
        }
        self.bump();
        true
    }

    /// Count one check-in and log it.
    ///
    /// An authoritative total on the event is adopted as is; otherwise the
    /// total grows by exactly one. Duplicates are not suppressed.
    pub fn apply_check_in(&mut self, event: &CheckInEvent) -> bool {
        if !self.is_live() {
            self.ignore("checkInUpdate");
            return false;
        }

        self.state.total_check_ins = match event.total_check_ins {
            Some(total) => total,
            None => self.state.total_check_ins.saturating_add(1),
        };
        self.state.log.push(ActivityLogEntry::from_check_in(event));

        counter!("live_monitor_check_ins_applied_total").increment(1);
        self.bump();
        true
    }

    /// Overwrite only the fields present in `update`.
    pub fn apply_stats_update(&mut self, update: &StatsUpdate) -> bool {
        if !self.is_live() {
            self.ignore("statsUpdate");
            return false;
        }
        if update.is_empty() {
            return false;
        }

        if let Some(total) = update.total_check_ins {
            self.state.total_check_ins = total;
        }
        if let Some(revenue) = update.revenue {
            self.state.revenue = revenue;
        }
        if let Some(gate_stats) = &update.gate_stats {
            self.state.gate_stats = gate_stats.clone();
        }

        counter!("live_monitor_stats_updates_applied_total").increment(1);
        self.bump();
        true
    }

    pub fn apply_stream_message(&mut self, message: &StreamMessage) -> bool {
        match message {
            StreamMessage::CheckIn(event) => self.apply_check_in(event),
            StreamMessage::Stats(update) => self.apply_stats_update(update),
        }
    }

    pub fn view(&self) -> LiveView {
        let snapshot = self.state.snapshot.as_ref();
        LiveView {
            event_id: self.event_id.clone(),
            title: snapshot.map(|s| s.title.clone()),
            status: self.status,
            total_check_ins: self.state.total_check_ins,
            capacity: self.state.capacity,
            capacity_percentage: self.state.capacity_percentage(),
            revenue: self.state.revenue,
            gate_stats: self.state.gate_stats.clone(),
            activity: self.state.log.to_vec(),
            last_snapshot_at: snapshot.map(|s| s.fetched_at),
            error: self.load_error.clone(),
            last_refresh_error: self.last_refresh_error.clone(),
            degraded: snapshot.map(|s| s.degraded.clone()).unwrap_or_default(),
            version: self.version,
        }
    }

    fn ignore(&self, kind: &'static str) {
        debug!(
            "[{}] Dropping {} received while {:?}",
            self.event_id, kind, self.status
        );
        counter!("live_monitor_stream_messages_ignored_total", "kind" => kind).increment(1);
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}
