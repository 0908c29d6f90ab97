//! WebSocket connection management with cancellable reconnection

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{sleep_or_cancel, Backoff};
use crate::{IngestError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection states for the feed lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected, auth and subscription sent
    Subscribed,
    /// At least one data message received on this connection
    Streaming,
    /// Waiting out a backoff delay
    Reconnecting,
}

/// Reason for disconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Connect failed or timed out
    ConnectFailed,
    /// Network error while streaming
    NetworkError,
    /// Server sent a close frame or ended the stream
    ClosedByServer,
    /// No frame, pongs included, within the message timeout
    MessageTimeout,
}

impl From<&IngestError> for DisconnectReason {
    fn from(error: &IngestError) -> Self {
        match error {
            IngestError::ConnectionFailed { .. } | IngestError::ConnectionTimeout { .. } => {
                DisconnectReason::ConnectFailed
            }
            IngestError::MessageTimeout { .. } => DisconnectReason::MessageTimeout,
            IngestError::ConnectionClosed { .. } => DisconnectReason::ClosedByServer,
            _ => DisconnectReason::NetworkError,
        }
    }
}

/// Configuration for connection management
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Message timeout (no frame of any kind received)
    pub message_timeout: Duration,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Base backoff time for reconnection
    pub base_backoff_ms: u64,
    /// Maximum backoff time
    pub max_backoff_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(15),
            base_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

impl From<(&service_config::PolygonConfig, &service_config::ConnectionSettings)> for ConnectionConfig {
    fn from(
        (feed, connection): (&service_config::PolygonConfig, &service_config::ConnectionSettings),
    ) -> Self {
        Self {
            url: feed.url.clone(),
            connect_timeout: connection.connect_timeout(),
            message_timeout: connection.message_timeout(),
            ping_interval: connection.ping_interval(),
            base_backoff_ms: connection.reconnect_base_delay_ms,
            max_backoff_ms: connection.reconnect_max_delay_ms,
        }
    }
}

/// Counters shared between the source and whoever monitors it
#[derive(Debug)]
pub struct SourceStats {
    state: RwLock<ConnectionState>,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    messages: AtomicU64,
    bars: AtomicU64,
    malformed: AtomicU64,
}

impl Default for SourceStats {
    fn default() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            connect_attempts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            bars: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatsSnapshot {
    pub state: ConnectionState,
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub messages: u64,
    pub bars: u64,
    pub malformed: u64,
}

impl SourceStats {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            state: self.state(),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            bars: self.bars.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub(crate) fn record_bars(&self, count: usize) {
        self.bars.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a receive call
#[derive(Debug)]
pub enum Received {
    /// Text or binary payload
    Message(Message),
    /// Server closed the connection
    Closed(Option<String>),
    /// Cancellation requested while waiting
    Cancelled,
}

/// What woke a receive wait
enum Wakeup {
    Frame(Option<std::result::Result<Message, tungstenite::Error>>),
    Ping,
    Idle,
}

/// WebSocket connection manager
///
/// Owns at most one live socket. Every await point races the caller's
/// cancellation token.
pub struct ConnectionManager {
    config: ConnectionConfig,
    websocket: Option<WsStream>,
    backoff: Backoff,
    stats: Arc<SourceStats>,
    has_connected: bool,
    data_seen: bool,
    last_seen: Instant,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, stats: Arc<SourceStats>) -> Self {
        let backoff = Backoff::new(config.base_backoff_ms, config.max_backoff_ms);
        Self {
            config,
            websocket: None,
            backoff,
            stats,
            has_connected: false,
            data_seen: false,
            last_seen: Instant::now(),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn is_open(&self) -> bool {
        self.websocket.is_some()
    }

    pub fn stats(&self) -> &Arc<SourceStats> {
        &self.stats
    }

    /// Connect to the WebSocket endpoint; `Ok(false)` when cancelled
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<bool> {
        self.stats.set_state(ConnectionState::Connecting);
        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        info!(url = %self.config.url, "Connecting to feed");

        let attempt = timeout(self.config.connect_timeout, connect_async(&self.config.url));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.stats.set_state(ConnectionState::Disconnected);
                return Ok(false);
            }
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(Ok((ws_stream, response))) => {
                info!(status = ?response.status(), "Connected to feed");
                self.websocket = Some(ws_stream);
                self.data_seen = false;
                self.last_seen = Instant::now();
                if self.has_connected {
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                }
                self.has_connected = true;
                Ok(true)
            }
            Ok(Err(e)) => {
                error!(url = %self.config.url, error = %e, "WebSocket connection error");
                self.stats.set_state(ConnectionState::Disconnected);
                Err(IngestError::ConnectionFailed {
                    url: self.config.url.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                error!(
                    url = %self.config.url,
                    "Connection timeout after {:?}",
                    self.config.connect_timeout
                );
                self.stats.set_state(ConnectionState::Disconnected);
                Err(IngestError::ConnectionTimeout {
                    timeout_ms: self.config.connect_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a message; `Ok(false)` when cancelled
    pub async fn send(&mut self, message: Message, cancel: &CancellationToken) -> Result<bool> {
        let ws = self.websocket.as_mut().ok_or_else(|| IngestError::ConnectionFailed {
            url: self.config.url.clone(),
            reason: "Not connected".to_string(),
        })?;

        tokio::select! {
            _ = cancel.cancelled() => Ok(false),
            sent = ws.send(message) => {
                sent?;
                Ok(true)
            }
        }
    }

    /// Mark the connection subscribed once auth and subscribe are sent
    pub fn mark_subscribed(&self) {
        self.stats.set_state(ConnectionState::Subscribed);
    }

    /// Receive the next payload
    ///
    /// Pings the server every `ping_interval` while waiting. Any frame,
    /// pongs included, counts as liveness; the connection is declared dead
    /// only after `message_timeout` without one.
    pub async fn receive(&mut self, cancel: &CancellationToken) -> Result<Received> {
        let message_timeout = self.config.message_timeout;
        let ping_interval = self.config.ping_interval.max(Duration::from_millis(1));
        let ws = self.websocket.as_mut().ok_or_else(|| IngestError::ConnectionFailed {
            url: self.config.url.clone(),
            reason: "Not connected".to_string(),
        })?;

        let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wakeup = tokio::select! {
                _ = cancel.cancelled() => return Ok(Received::Cancelled),
                _ = sleep_until(self.last_seen + message_timeout) => Wakeup::Idle,
                _ = keepalive.tick() => Wakeup::Ping,
                next = ws.next() => Wakeup::Frame(next),
            };

            let next = match wakeup {
                Wakeup::Idle => {
                    warn!(
                        "Message timeout ({}ms without any frame)",
                        message_timeout.as_millis()
                    );
                    return Err(IngestError::MessageTimeout {
                        idle_ms: message_timeout.as_millis() as u64,
                    });
                }
                Wakeup::Ping => {
                    debug!("Sending keepalive ping");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Received::Cancelled),
                        sent = ws.send(Message::Ping(Vec::new())) => sent?,
                    }
                    continue;
                }
                Wakeup::Frame(next) => next,
            };

            self.last_seen = Instant::now();
            match next {
                None => return Ok(Received::Closed(None)),
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    return Err(IngestError::WebSocket(e));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Received::Closed(frame.map(|f| f.reason.into_owned())));
                }
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    self.stats.messages.fetch_add(1, Ordering::Relaxed);
                    return Ok(Received::Message(msg));
                }
                // Ping/pong and raw frames count toward liveness only
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Reset backoff after the first data message on a connection
    pub fn mark_data_received(&mut self) {
        if !self.data_seen {
            self.data_seen = true;
            self.backoff.reset();
            self.stats.set_state(ConnectionState::Streaming);
        }
    }

    /// Drop the socket and wait out the backoff delay
    ///
    /// Returns `false` if cancelled during the wait.
    pub async fn handle_disconnection(
        &mut self,
        reason: DisconnectReason,
        cancel: &CancellationToken,
    ) -> bool {
        self.websocket = None;
        self.stats.set_state(ConnectionState::Reconnecting);

        let delay = self.backoff.next_delay();
        warn!(
            ?reason,
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Disconnected from feed, will reconnect"
        );

        if sleep_or_cancel(delay, cancel).await {
            true
        } else {
            debug!("Cancelled during reconnect backoff");
            self.stats.set_state(ConnectionState::Disconnected);
            false
        }
    }

    /// Close the connection gracefully
    pub async fn close(&mut self) {
        if let Some(mut ws) = self.websocket.take() {
            ws.close(None).await.ok();
        }
        self.stats.set_state(ConnectionState::Disconnected);
    }
}
