//! Polygon-style aggregate feed client
//!
//! Sends `auth` then `subscribe` on every (re)connect and turns `AM`
//! aggregate events into [`FeedBar`]s. Events arrive as JSON arrays; a bad
//! event is skipped without dropping its neighbours.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionConfig, ConnectionManager, DisconnectReason, Received, SourceStats};
use super::{BarSource, FeedBar};
use crate::{IngestError, Result};

const AGGREGATE_MINUTE: &str = "AM";
const STATUS: &str = "status";

/// Aggregate bar event
#[derive(Debug, Deserialize)]
struct AggregateEvent {
    sym: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    /// Session VWAP
    #[serde(default)]
    a: Option<f64>,
    /// Bar VWAP
    #[serde(default)]
    vw: Option<f64>,
    /// Average trade size
    #[serde(default)]
    z: Option<f64>,
    #[serde(default)]
    n: Option<u64>,
    /// Bar end, Unix milliseconds
    e: i64,
}

#[derive(Debug, Deserialize)]
struct StatusEvent {
    status: String,
    #[serde(default)]
    message: String,
}

fn decimal(field: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(IngestError::InvalidMessage(format!(
            "{} is not finite: {}",
            field, value
        )));
    }
    Decimal::from_f64(value).ok_or_else(|| {
        IngestError::InvalidMessage(format!("{} out of range: {}", field, value))
    })
}

fn optional_decimal(field: &str, value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(|v| decimal(field, v)).transpose()
}

impl AggregateEvent {
    fn into_feed_bar(self) -> Result<FeedBar> {
        if self.sym.trim().is_empty() {
            return Err(IngestError::MissingField {
                field: "sym".to_string(),
            });
        }
        if !self.v.is_finite() || self.v < 0.0 {
            return Err(IngestError::InvalidMessage(format!(
                "invalid volume {} for {}",
                self.v, self.sym
            )));
        }
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.e).ok_or_else(|| {
            IngestError::InvalidMessage(format!("end timestamp out of range: {}", self.e))
        })?;

        Ok(FeedBar {
            ticker: self.sym.trim().to_uppercase(),
            timestamp,
            open: decimal("o", self.o)?,
            high: decimal("h", self.h)?,
            low: decimal("l", self.l)?,
            close: decimal("c", self.c)?,
            volume: self.v.round() as u64,
            vwap: optional_decimal("a", self.a.or(self.vw))?,
            avg_trade_size: optional_decimal("z", self.z)?,
            trade_count: self.n,
        })
    }
}

/// Events decoded from one frame
#[derive(Debug, Default)]
pub struct ParsedFrame {
    pub bars: Vec<FeedBar>,
    /// First permanent failure reported by a status event
    pub rejection: Option<IngestError>,
}

/// Parse one text frame into bars
///
/// Malformed events are logged, counted and skipped. A rejected-credentials
/// status is carried in [`ParsedFrame::rejection`] alongside any bars from
/// the same frame. Fails only when the whole frame is unreadable.
pub fn parse_frame(text: &str, stats: &SourceStats) -> Result<ParsedFrame> {
    let value: Value = serde_json::from_str(text)?;
    let events = match value {
        Value::Array(events) => events,
        single @ Value::Object(_) => vec![single],
        other => {
            return Err(IngestError::InvalidMessage(format!(
                "expected event array, got {}",
                other
            )))
        }
    };

    let mut bars = Vec::with_capacity(events.len());
    let mut rejection = None;
    for event in events {
        match event.get("ev").and_then(|ev| ev.as_str()) {
            Some(AGGREGATE_MINUTE) => {
                let parsed = serde_json::from_value::<AggregateEvent>(event)
                    .map_err(IngestError::from)
                    .and_then(AggregateEvent::into_feed_bar);
                match parsed {
                    Ok(bar) => bars.push(bar),
                    Err(e) => {
                        stats.record_malformed();
                        warn!(error = %e, "Skipping malformed aggregate event");
                    }
                }
            }
            Some(STATUS) => {
                if let Err(e) = handle_status(event) {
                    rejection.get_or_insert(e);
                }
            }
            Some(other) => debug!(ev = other, "Ignoring feed event"),
            None => {
                stats.record_malformed();
                warn!("Skipping event without 'ev' field");
            }
        }
    }
    stats.record_bars(bars.len());
    Ok(ParsedFrame { bars, rejection })
}

fn handle_status(event: Value) -> Result<()> {
    let status: StatusEvent = match serde_json::from_value(event) {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "Unreadable status event");
            return Ok(());
        }
    };
    match status.status.as_str() {
        "auth_failed" => {
            error!(message = %status.message, "Feed rejected credentials");
            Err(IngestError::AuthenticationFailed {
                message: status.message,
            })
        }
        "auth_success" | "connected" | "success" => {
            info!(status = %status.status, message = %status.message, "Feed status");
            Ok(())
        }
        _ => {
            warn!(status = %status.status, message = %status.message, "Feed status");
            Ok(())
        }
    }
}

/// Reconnecting aggregate-bar source
pub struct PolygonSource {
    connection: ConnectionManager,
    api_key: String,
    subscription: String,
    pending: VecDeque<FeedBar>,
    rejection: Option<IngestError>,
}

impl PolygonSource {
    pub fn new(
        config: ConnectionConfig,
        api_key: impl Into<String>,
        subscription: impl Into<String>,
        stats: Arc<SourceStats>,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(config, stats),
            api_key: api_key.into(),
            subscription: subscription.into(),
            pending: VecDeque::new(),
            rejection: None,
        }
    }

    pub fn from_config(config: &service_config::IngestorConfig, stats: Arc<SourceStats>) -> Self {
        Self::new(
            ConnectionConfig::from((&config.polygon, &config.connection)),
            config.polygon.api_key.clone(),
            config.subscription_params(),
            stats,
        )
    }

    pub fn stats(&self) -> &Arc<SourceStats> {
        self.connection.stats()
    }

    /// Connect, authenticate and subscribe; `Ok(false)` when cancelled
    async fn establish(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if !self.connection.connect(cancel).await? {
            return Ok(false);
        }

        let auth = json!({ "action": "auth", "params": self.api_key });
        if !self.connection.send(Message::Text(auth.to_string()), cancel).await? {
            return Ok(false);
        }

        let subscribe = json!({ "action": "subscribe", "params": self.subscription });
        if !self
            .connection
            .send(Message::Text(subscribe.to_string()), cancel)
            .await?
        {
            return Ok(false);
        }

        self.connection.mark_subscribed();
        info!(subscription = %self.subscription, "Subscribed to feed");
        Ok(true)
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data)
                .map_err(|e| IngestError::InvalidMessage(format!("Invalid UTF-8 data: {}", e)))?,
            _ => return Ok(()),
        };
        let frame = parse_frame(&text, self.connection.stats())?;
        if !frame.bars.is_empty() {
            self.connection.mark_data_received();
        }
        self.pending.extend(frame.bars);
        if let Some(rejection) = frame.rejection {
            self.rejection.get_or_insert(rejection);
        }
        Ok(())
    }

    async fn reconnect(&mut self, reason: DisconnectReason, cancel: &CancellationToken) -> bool {
        self.connection.handle_disconnection(reason, cancel).await
    }
}

#[async_trait]
impl BarSource for PolygonSource {
    async fn next_bar(&mut self, cancel: &CancellationToken) -> Result<Option<FeedBar>> {
        loop {
            if let Some(bar) = self.pending.pop_front() {
                return Ok(Some(bar));
            }
            if let Some(rejection) = self.rejection.take() {
                self.connection.close().await;
                return Err(rejection);
            }
            if cancel.is_cancelled() {
                self.connection.close().await;
                return Ok(None);
            }

            if !self.connection.is_open() {
                match self.establish(cancel).await {
                    Ok(true) => {}
                    Ok(false) => {
                        self.connection.close().await;
                        return Ok(None);
                    }
                    Err(e) if e.is_permanent() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "Failed to establish feed connection");
                        if !self.reconnect(DisconnectReason::from(&e), cancel).await {
                            return Ok(None);
                        }
                        continue;
                    }
                }
            }

            match self.connection.receive(cancel).await {
                Ok(Received::Message(message)) => match self.handle_message(message) {
                    Ok(()) => {}
                    Err(e) => {
                        self.connection.stats().record_malformed();
                        warn!(error = %e, "Skipping malformed feed message");
                    }
                },
                Ok(Received::Cancelled) => {
                    self.connection.close().await;
                    return Ok(None);
                }
                Ok(Received::Closed(reason)) => {
                    info!(?reason, "Feed closed connection");
                    if !self.reconnect(DisconnectReason::ClosedByServer, cancel).await {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    if !self.reconnect(DisconnectReason::from(&e), cancel).await {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
