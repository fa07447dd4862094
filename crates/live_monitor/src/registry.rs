//! Registry of running monitor sessions, keyed by event id.
//!
//! Uses DashMap so HTTP handlers can look sessions up concurrently. Each
//! session is fully independent; stopping one never touches another.

use crate::error::{MonitorError, Result};
use crate::session::{MonitorSession, SessionCommands, SessionConfig, SessionHandle};
use crate::state::LiveView;
use checkin_stream::StreamSubscriber;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use external_services::SnapshotFetcher;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct MonitorRegistry {
    sessions: DashMap<String, SessionHandle>,
    fetcher: SnapshotFetcher,
    subscriber: Arc<dyn StreamSubscriber>,
    config: SessionConfig,
}

impl MonitorRegistry {
    pub fn new(
        fetcher: SnapshotFetcher,
        subscriber: Arc<dyn StreamSubscriber>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            fetcher,
            subscriber,
            config,
        }
    }

    /// Start monitoring `event_id`. Idempotent: an existing session is kept
    /// and its current view returned.
    pub fn start(&self, event_id: &str) -> Result<LiveView> {
        let event_id = normalize(event_id)?;

        match self.sessions.entry(event_id.clone()) {
            Entry::Occupied(entry) => {
                debug!("Event {} already monitored", event_id);
                Ok(entry.get().view())
            }
            Entry::Vacant(entry) => {
                let handle = MonitorSession::spawn(
                    &event_id,
                    self.fetcher.clone(),
                    self.subscriber.as_ref(),
                    self.config.clone(),
                )?;
                let view = handle.view();
                entry.insert(handle);
                info!("Started monitoring event {}", event_id);
                Ok(view)
            }
        }
    }

    /// Stop monitoring `event_id`, unsubscribing and discarding its state.
    pub async fn stop(&self, event_id: &str) -> Result<()> {
        let event_id = normalize(event_id)?;
        let (_, handle) = self
            .sessions
            .remove(&event_id)
            .ok_or_else(|| MonitorError::NotMonitored(event_id.clone()))?;

        handle.shutdown().await;
        info!("Stopped monitoring event {}", event_id);
        Ok(())
    }

    /// Replace the session for `old` with a fresh one for `new`. Nothing is
    /// carried over. Switching to the same id keeps the running session.
    pub async fn switch(&self, old: &str, new: &str) -> Result<LiveView> {
        let old = normalize(old)?;
        let new = normalize(new)?;
        if old == new {
            return self.start(&new);
        }

        match self.stop(&old).await {
            Ok(()) | Err(MonitorError::NotMonitored(_)) => {}
            Err(e) => return Err(e),
        }
        info!("Switched monitoring from {} to {}", old, new);
        self.start(&new)
    }

    pub fn get(&self, event_id: &str) -> Option<LiveView> {
        self.sessions.get(event_id.trim()).map(|h| h.view())
    }

    pub fn watch(&self, event_id: &str) -> Option<watch::Receiver<LiveView>> {
        self.sessions.get(event_id.trim()).map(|h| h.watch())
    }

    pub async fn retry(&self, event_id: &str) -> Result<()> {
        self.commands(event_id)?.retry().await
    }

    pub async fn refresh(&self, event_id: &str) -> Result<()> {
        self.commands(event_id)?.refresh().await
    }

    // Cloned out of the map so no shard lock is held across an await.
    fn commands(&self, event_id: &str) -> Result<SessionCommands> {
        let event_id = normalize(event_id)?;
        self.sessions
            .get(&event_id)
            .map(|h| h.commands())
            .ok_or(MonitorError::NotMonitored(event_id))
    }

    /// Monitored event ids, sorted.
    pub fn event_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session.
    pub async fn shutdown_all(&self) {
        for event_id in self.event_ids() {
            if let Some((_, handle)) = self.sessions.remove(&event_id) {
                handle.shutdown().await;
            }
        }
    }
}

fn normalize(event_id: &str) -> Result<String> {
    let trimmed = event_id.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(MonitorError::InvalidEventId(event_id.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MonitorStatus;
    use crate::testing::{FakeSource, FakeSubscriber};
    use std::time::Duration;

    fn registry() -> (MonitorRegistry, Arc<FakeSubscriber>) {
        let source = FakeSource::new(40);
        let subscriber = Arc::new(FakeSubscriber::default());
        let registry = MonitorRegistry::new(
            SnapshotFetcher::new(source),
            subscriber.clone(),
            SessionConfig::default().with_refresh_interval(None),
        );
        (registry, subscriber)
    }

    async fn wait_live(registry: &MonitorRegistry, event_id: &str) -> LiveView {
        let mut rx = registry.watch(event_id).unwrap();
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|v| v.status == MonitorStatus::Live),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        view
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (registry, _subscriber) = registry();

        let first = registry.start("evt1").unwrap();
        assert_eq!(first.event_id, "evt1");
        wait_live(&registry, "evt1").await;

        let again = registry.start(" evt1 ").unwrap();
        assert_eq!(again.status, MonitorStatus::Live);
        assert_eq!(registry.len(), 1);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_event() {
        let (registry, _subscriber) = registry();
        assert!(matches!(
            registry.stop("nope").await,
            Err(MonitorError::NotMonitored(_))
        ));
        assert!(matches!(
            registry.retry("nope").await,
            Err(MonitorError::NotMonitored(_))
        ));
        assert!(matches!(
            registry.start(""),
            Err(MonitorError::InvalidEventId(_))
        ));
    }

    #[tokio::test]
    async fn test_switch_discards_old_session() {
        let (registry, subscriber) = registry();
        registry.start("evt1").unwrap();
        wait_live(&registry, "evt1").await;
        let old_tx = subscriber.sender("evt1").unwrap();

        let view = registry.switch("evt1", "evt2").await.unwrap();
        assert_eq!(view.event_id, "evt2");
        assert_eq!(view.total_check_ins, 0);
        assert_eq!(registry.event_ids(), vec!["evt2"]);
        assert!(old_tx.is_closed());
        assert!(registry.get("evt1").is_none());

        let live = wait_live(&registry, "evt2").await;
        assert_eq!(live.total_check_ins, 40);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_switch_to_same_event_keeps_session() {
        let (registry, subscriber) = registry();
        registry.start("evt1").unwrap();
        wait_live(&registry, "evt1").await;
        let tx = subscriber.sender("evt1").unwrap();

        let view = registry.switch("evt1", " evt1 ").await.unwrap();
        assert_eq!(view.status, MonitorStatus::Live);
        assert_eq!(view.total_check_ins, 40);
        assert!(!tx.is_closed());
        assert_eq!(registry.event_ids(), vec!["evt1"]);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_switch_from_unmonitored_event_starts_new() {
        let (registry, _subscriber) = registry();

        let view = registry.switch("nope", "evt2").await.unwrap();
        assert_eq!(view.event_id, "evt2");
        assert_eq!(registry.event_ids(), vec!["evt2"]);
        assert_eq!(wait_live(&registry, "evt2").await.total_check_ins, 40);

        assert!(matches!(
            registry.switch("", "evt3").await,
            Err(MonitorError::InvalidEventId(_))
        ));
        assert_eq!(registry.len(), 1);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (registry, _subscriber) = registry();
        registry.start("evt1").unwrap();
        registry.start("evt2").unwrap();
        wait_live(&registry, "evt1").await;
        wait_live(&registry, "evt2").await;

        registry.stop("evt1").await.unwrap();
        assert_eq!(registry.get("evt2").unwrap().status, MonitorStatus::Live);
        registry.refresh("evt2").await.unwrap();

        registry.shutdown_all().await;
    }
}
