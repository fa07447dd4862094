//! Ticketing REST API client.

use crate::error::{Error, Result};
use crate::snapshot::SnapshotSource;
use crate::ticketing::types::{ApiEnvelope, CheckInRecord, EventDetails, GateStatsResponse, Order};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default request timeout for snapshot reads.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ticketing REST API client.
#[derive(Debug, Clone)]
pub struct TicketingClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl TicketingClient {
    /// Create a new client for the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/events/{event_id}[/{resource}]`, with the id percent-encoded
    /// as a single path segment.
    fn event_url(&self, event_id: &str, resource: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidUrl(self.base_url.clone()))?;
            segments.pop_if_empty().push("events").push(event_id);
            if let Some(resource) = resource {
                segments.push(resource);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!("Fetching {}", url);
        let path = url.path().to_string();

        let mut request = self.http.get(url).query(query);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(Error::EventNotFound(path));
        }
        if !status.is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        let body: ApiEnvelope<T> = response.json().await?;
        Ok(body.into_inner())
    }
}

#[async_trait]
impl SnapshotSource for TicketingClient {
    async fn get_event(&self, event_id: &str) -> Result<EventDetails> {
        self.get_json(self.event_url(event_id, None)?, &[])
            .await
            .map_err(|e| match e {
                Error::EventNotFound(_) => Error::EventNotFound(event_id.to_string()),
                other => other,
            })
    }

    async fn get_gate_stats(&self, event_id: &str) -> Result<GateStatsResponse> {
        self.get_json(self.event_url(event_id, Some("gate-stats"))?, &[])
            .await
    }

    async fn get_event_orders(&self, event_id: &str) -> Result<Vec<Order>> {
        self.get_json(self.event_url(event_id, Some("orders"))?, &[])
            .await
    }

    async fn get_event_check_ins(
        &self,
        event_id: &str,
        limit: usize,
    ) -> Result<Vec<CheckInRecord>> {
        self.get_json(
            self.event_url(event_id, Some("check-ins"))?,
            &[("limit", limit.to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = TicketingClient::new("https://tickets.example.com/api/");
        assert_eq!(client.base_url(), "https://tickets.example.com/api");
        assert!(client.api_token.is_none());
    }

    #[test]
    fn test_client_with_token() {
        let client = TicketingClient::new("http://localhost:3000").with_token("secret");
        assert_eq!(client.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_event_url_encodes_id_as_one_segment() {
        let client = TicketingClient::new("https://tickets.example.com/api/");
        let url = client.event_url("a#b?c/d", Some("orders")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://tickets.example.com/api/events/a%23b%3Fc%2Fd/orders"
        );
        assert!(url.fragment().is_none());
        assert!(url.query().is_none());

        let bare = TicketingClient::new("http://localhost:3000");
        assert_eq!(
            bare.event_url("evt1", None).unwrap().as_str(),
            "http://localhost:3000/events/evt1"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let client = TicketingClient::new("not a url");
        assert!(matches!(
            client.event_url("evt1", None),
            Err(Error::InvalidUrl(_))
        ));
    }

    /// Answer exactly one request with a canned response.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        serve_once_recording(status_line, body).await.0
    }

    /// Like `serve_once`, also handing back the request line that was received.
    async fn serve_once_recording(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);
            let _ = request_tx.send(request.lines().next().unwrap_or_default().to_string());
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        (format!("http://{}", addr), request_rx)
    }

    #[tokio::test]
    async fn test_event_id_with_reserved_characters_stays_in_path() {
        let (base, request) = serve_once_recording(
            "200 OK",
            r#"{"data":{"id":"a#b","title":"Hash Party","ticketTiers":[]}}"#,
        )
        .await;

        let event = TicketingClient::new(base).get_event("a#b").await.unwrap();
        assert_eq!(event.id, "a#b");
        assert_eq!(request.await.unwrap(), "GET /events/a%23b HTTP/1.1");
    }

    #[tokio::test]
    async fn test_get_event_unwraps_envelope() {
        let base = serve_once(
            "200 OK",
            r#"{"data":{"id":"evt1","title":"Summer Fest","ticketTiers":[{"id":"ga","initialQuantity":250}]}}"#,
        )
        .await;

        let event = TicketingClient::new(base).get_event("evt1").await.unwrap();
        assert_eq!(event.title, "Summer Fest");
        assert_eq!(event.capacity(), 250);
    }

    #[tokio::test]
    async fn test_missing_event_maps_to_not_found() {
        let base = serve_once("404 Not Found", r#"{"error":"not found"}"#).await;

        let err = TicketingClient::new(base).get_event("evt1").await.unwrap_err();
        assert!(matches!(err, Error::EventNotFound(ref id) if id == "evt1"));
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let base = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;

        let err = TicketingClient::new(base)
            .get_event_orders("evt1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_an_error() {
        // Port 1 is never listening; the request fails at connect time.
        let client = TicketingClient::new("http://127.0.0.1:1");
        let err = client.get_event("evt1").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
