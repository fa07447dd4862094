//! WebSocket connection manager with ping/pong, reconnection, and runtime control commands.

use crate::error::{Error, Result};
use crate::messages::ControlCommand;
use crate::ws_handler::WsHandler;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WebSocket manager.
#[derive(Debug, Clone)]
pub struct WsManagerConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Extra time allowed past a ping interval without any inbound frame.
    pub pong_timeout: Duration,
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
    /// Initial delay before reconnection attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay (for exponential backoff).
    pub max_reconnect_delay: Duration,
    /// Label for metrics (e.g., "checkin").
    pub channel_label: String,
}

impl Default for WsManagerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            channel_label: "unknown".to_string(),
        }
    }
}

/// WebSocket connection manager.
/// Handles connection lifecycle, ping/pong, reconnection, and control commands.
pub struct WsManager<H: WsHandler> {
    handler: Arc<H>,
    config: WsManagerConfig,
    command_rx: mpsc::Receiver<ControlCommand>,
    worker_id: String,
}

impl<H: WsHandler> WsManager<H> {
    /// Create a new WebSocket manager.
    pub fn new(
        handler: H,
        config: WsManagerConfig,
        command_rx: mpsc::Receiver<ControlCommand>,
        worker_id: String,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            command_rx,
            worker_id,
        }
    }

    /// Run the WebSocket manager. Reconnects on disconnection until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            match self.connect().await {
                Ok(ws_stream) => {
                    reconnect_delay = self.config.reconnect_delay;
                    gauge!("stream_active_connections", "channel" => self.config.channel_label.clone())
                        .increment(1.0);
                    let outcome = self.run_connection(ws_stream).await;
                    gauge!("stream_active_connections", "channel" => self.config.channel_label.clone())
                        .decrement(1.0);

                    match outcome {
                        Ok(()) => {
                            info!("[{}] WebSocket closed gracefully", self.worker_id);
                            return Ok(());
                        }
                        Err(e) => {
                            counter!("stream_errors_total", "channel" => self.config.channel_label.clone(), "error_type" => "disconnect").increment(1);
                            warn!(
                                "[{}] WebSocket disconnected: {:?}, reconnecting in {:?}",
                                self.worker_id, e, reconnect_delay
                            );
                        }
                    }
                }
                Err(e) => {
                    counter!("stream_errors_total", "channel" => self.config.channel_label.clone(), "error_type" => "connect").increment(1);
                    warn!(
                        "[{}] WebSocket connect failed: {:?}, retrying in {:?}",
                        self.worker_id, e, reconnect_delay
                    );
                }
            }

            self.handler.on_disconnect().await;

            if self.wait_before_reconnect(reconnect_delay).await {
                info!("[{}] Shutdown requested while disconnected", self.worker_id);
                return Ok(());
            }

            // Exponential backoff
            reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
        }
    }

    /// Sleep for the backoff delay while still serving commands.
    /// Returns true if shutdown was requested.
    async fn wait_before_reconnect(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.command_rx.recv() => match cmd {
                    Some(ControlCommand::Shutdown) | None => return true,
                    // No socket to write to; the handler's connect message
                    // reflects the change on the next connection.
                    Some(cmd) => {
                        let _ = self.handler.handle_command(cmd).await;
                    }
                }
            }
        }
    }

    /// Resolve, connect and perform the WebSocket handshake.
    async fn connect(&self) -> Result<WsStream> {
        let url_str = self.handler.url();
        info!("[{}] Connecting to WebSocket: {}", self.worker_id, url_str);

        let url = Url::parse(url_str)?;
        let (default_port, tls) = match url.scheme() {
            "ws" => (80, false),
            "wss" => (443, true),
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::Connect("No host in URL".to_string()))?;
        let port = url.port().unwrap_or(default_port);
        let addr_str = format!("{}:{}", host, port);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::Connect(format!("DNS resolution failed: {}", e)))?
            .collect();

        // Try IPv4 addresses first, then IPv6
        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        debug!(
            "[{}] Resolved addresses (IPv4 first): {:?}",
            self.worker_id, sorted_addrs
        );

        let mut tcp_stream = None;
        for addr in &sorted_addrs {
            debug!("[{}] Trying to connect to {}", self.worker_id, addr);
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    debug!("[{}] TCP connected to {}", self.worker_id, addr);
                    tcp_stream = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.worker_id, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.worker_id, addr);
                }
            }
        }

        let tcp_stream = tcp_stream
            .ok_or_else(|| Error::Connect("All connection attempts failed".to_string()))?;

        let connector = if tls {
            Self::tls_connector()?
        } else {
            Connector::Plain
        };

        let (ws_stream, response) =
            client_async_tls_with_config(url_str, tcp_stream, None, Some(connector)).await?;

        debug!(
            "[{}] WebSocket handshake complete, status: {:?}",
            self.worker_id,
            response.status()
        );

        Ok(ws_stream)
    }

    fn tls_connector() -> Result<Connector> {
        let mut root_store = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            let _ = root_store.add(cert);
        }

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Connector::Rustls(Arc::new(config)))
    }

    /// Drive one established connection. Returns Ok(()) only on requested shutdown.
    async fn run_connection(&mut self, ws_stream: WsStream) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();
        info!("[{}] WebSocket connected", self.worker_id);

        if let Some(init_msg) = self.handler.on_connect_message() {
            debug!("[{}] Sending connect frame: {}", self.worker_id, init_msg);
            write.send(Message::Text(init_msg)).await?;
        }

        self.handler.on_reconnect().await;

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset(); // Don't fire immediately
        let mut last_seen = Instant::now();
        let liveness_window = self.config.ping_interval + self.config.pong_timeout;

        loop {
            tokio::select! {
                msg = read.next() => {
                    if msg.is_some() {
                        last_seen = Instant::now();
                    }
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counter!("stream_frames_received_total", "channel" => self.config.channel_label.clone()).increment(1);
                            if let Err(e) = self.handler.on_message(&text).await {
                                error!("[{}] Error handling message: {:?}", self.worker_id, e);
                                counter!("stream_errors_total", "channel" => self.config.channel_label.clone(), "error_type" => "handler").increment(1);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Err(e) = self.handler.on_binary_message(&data).await {
                                error!("[{}] Error handling binary message: {:?}", self.worker_id, e);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("[{}] Received ping, sending pong", self.worker_id);
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("[{}] Received pong", self.worker_id);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[{}] Received close frame: {:?}", self.worker_id, frame);
                            return Err(Error::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!("[{}] WebSocket error: {:?}", self.worker_id, e);
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("[{}] WebSocket stream ended", self.worker_id);
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::Shutdown) | None => {
                            info!("[{}] Shutting down connection", self.worker_id);
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Shutdown".into(),
                            };
                            let _ = write.send(Message::Close(Some(close_frame))).await;
                            return Ok(());
                        }
                        Some(cmd) => {
                            if let Some(msg) = self.handler.handle_command(cmd).await {
                                debug!("[{}] Sending control frame: {}", self.worker_id, msg);
                                write.send(Message::Text(msg)).await?;
                            }
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if last_seen.elapsed() > liveness_window {
                        warn!("[{}] No frames for {:?}, dropping connection", self.worker_id, last_seen.elapsed());
                        return Err(Error::ConnectionClosed);
                    }
                    debug!("[{}] Sending ping", self.worker_id);
                    write.send(Message::Ping(vec![])).await?;
                }
            }
        }
    }
}
