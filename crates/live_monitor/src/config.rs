//! Service configuration from environment variables.

use crate::error::{MonitorError, Result};
use crate::session::SessionConfig;
use checkin_stream::StreamConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Ticketing REST API base URL.
    pub api_base_url: String,
    /// Bearer token for the REST API.
    pub api_token: Option<String>,
    /// Live event channel endpoint.
    pub stream_url: String,
    pub http_port: u16,
    pub metrics_port: u16,
    /// Snapshot refresh period; `None` disables periodic refresh.
    pub refresh_interval: Option<Duration>,
    /// Per-subscription stream queue capacity.
    pub stream_buffer: usize,
    /// Events monitored from startup.
    pub event_ids: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            api_token: None,
            stream_url: "ws://localhost:3000/ws".to_string(),
            http_port: 8085,
            metrics_port: 9095,
            refresh_interval: Some(Duration::from_secs(30)),
            stream_buffer: checkin_stream::client::DEFAULT_STREAM_BUFFER,
            event_ids: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let refresh_secs: u64 = parse_or(&get, "REFRESH_INTERVAL_SECS", 30)?;

        Ok(Self {
            api_base_url: get("API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_token: get("API_TOKEN"),
            stream_url: get("STREAM_URL").unwrap_or(defaults.stream_url),
            http_port: parse_or(&get, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_or(&get, "METRICS_PORT", defaults.metrics_port)?,
            refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
            stream_buffer: parse_or(&get, "STREAM_BUFFER", defaults.stream_buffer)?,
            event_ids: get("EVENT_IDS")
                .map(|ids| {
                    ids.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(self.stream_url.clone()).with_buffer(self.stream_buffer)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_refresh_interval(self.refresh_interval)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MonitorError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
