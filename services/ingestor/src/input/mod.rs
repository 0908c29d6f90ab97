//! Feed input: bar sources and the WebSocket plumbing behind them

pub mod backoff;
pub mod connection;
pub mod polygon;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use types::{Bar, SymbolId, TimeframeId};

use crate::Result;

pub use backoff::Backoff;
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, DisconnectReason, SourceStats,
    SourceStatsSnapshot,
};
pub use polygon::{parse_frame, ParsedFrame, PolygonSource};

/// Aggregate bar as received from the feed, still addressed by ticker
#[derive(Debug, Clone, PartialEq)]
pub struct FeedBar {
    pub ticker: String,
    /// Bar end time
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub vwap: Option<Decimal>,
    pub avg_trade_size: Option<Decimal>,
    pub trade_count: Option<u64>,
}

impl FeedBar {
    /// Attach resolved identifiers
    pub fn into_bar(self, symbol_id: SymbolId, timeframe: TimeframeId) -> Bar {
        Bar {
            symbol_id,
            timeframe,
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap,
            avg_trade_size: self.avg_trade_size,
            trade_count: self.trade_count,
        }
    }
}

/// Ordered stream of feed bars
///
/// `Ok(None)` ends the stream after cancellation. Transient failures are
/// handled inside the source; only permanent ones surface as errors.
#[async_trait]
pub trait BarSource: Send {
    async fn next_bar(&mut self, cancel: &CancellationToken) -> Result<Option<FeedBar>>;
}
