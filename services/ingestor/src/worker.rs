//! Ingestion loop
//!
//! ```text
//! BarSource ──(reader task)──► mpsc ──► resolve ticker ─► resolve metadata
//!                                           │ (single-flight caches)
//!                                           ▼
//!                                  IndicatorEngine::process
//!                                           │
//!                                           ▼
//!                         PendingWrites ──(size / interval)──► sinks
//! ```
//!
//! One consumer processes bars in arrival order. Sink writes retry
//! recoverable failures with capped backoff; anything still failing stays
//! buffered. The sink backoff carries across flushes, so during an outage
//! further flushes wait for its deadline instead of running on every bar.

use async_trait::async_trait;
use futures_util::future::join_all;
use indicators::IndicatorEngine;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::{Bar, IndicatorValue, SymbolId, SymbolMetadata, TimeframeId};

use crate::cache::SingleFlightCache;
use crate::input::backoff::{sleep_or_cancel, Backoff};
use crate::input::{BarSource, FeedBar};
use crate::sinks::{BarSink, IndicatorSink, SymbolRegistry};
use crate::{IngestError, Result, SinkError};

/// Settings for [`IngestionLoop`]
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Timeframe stamped on every incoming bar
    pub timeframe: TimeframeId,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Retained buffer bound, in batches
    pub max_buffered_batches: usize,
    pub channel_capacity: usize,
    /// Attempts per sink write, including the first
    pub sink_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Reload metadata older than this; `None` keeps it for the process lifetime
    pub metadata_ttl: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&service_config::IngestorConfig::default())
    }
}

impl From<&service_config::IngestorConfig> for LoopConfig {
    fn from(config: &service_config::IngestorConfig) -> Self {
        let ingestion = &config.ingestion;
        Self {
            timeframe: ingestion.timeframe(),
            batch_size: ingestion.batch_size,
            flush_interval: ingestion.flush_interval(),
            max_buffered_batches: ingestion.max_buffered_batches,
            channel_capacity: ingestion.channel_capacity,
            sink_retry_attempts: ingestion.sink_retry_attempts,
            retry_base_delay_ms: config.connection.reconnect_base_delay_ms,
            retry_max_delay_ms: config.connection.reconnect_max_delay_ms,
            metadata_ttl: ingestion.metadata_ttl(),
        }
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub bars_received: u64,
    pub bars_processed: u64,
    pub indicators_emitted: u64,
    pub unresolved_symbols: u64,
    pub invalid_bars: u64,
    pub bars_written: u64,
    pub indicators_written: u64,
    pub flush_failures: u64,
    pub dropped_bars: u64,
    pub dropped_indicators: u64,
}

/// Buffered rows awaiting persistence, bounded with drop-oldest
struct PendingWrites {
    bars: VecDeque<Bar>,
    indicators: VecDeque<IndicatorValue>,
    limit: usize,
    dropped_bars: u64,
    dropped_indicators: u64,
}

impl PendingWrites {
    fn new(limit: usize) -> Self {
        Self {
            bars: VecDeque::new(),
            indicators: VecDeque::new(),
            limit,
            dropped_bars: 0,
            dropped_indicators: 0,
        }
    }

    fn push(&mut self, bar: Bar, values: Vec<IndicatorValue>) {
        self.bars.push_back(bar);
        while self.bars.len() > self.limit {
            self.bars.pop_front();
            self.dropped_bars += 1;
        }
        self.indicators.extend(values);
        while self.indicators.len() > self.limit {
            self.indicators.pop_front();
            self.dropped_indicators += 1;
        }
    }

    fn is_empty(&self) -> bool {
        self.bars.is_empty() && self.indicators.is_empty()
    }

    fn is_due(&self, batch_size: usize) -> bool {
        self.bars.len() >= batch_size || self.indicators.len() >= batch_size
    }

    fn take_dropped(&mut self) -> (u64, u64) {
        (
            std::mem::take(&mut self.dropped_bars),
            std::mem::take(&mut self.dropped_indicators),
        )
    }
}

/// Sink backoff shared by consecutive flushes
struct FlushSchedule {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl FlushSchedule {
    fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            backoff: Backoff::new(base_ms, max_ms),
            retry_at: None,
        }
    }

    /// Whether a flush may run at `now`
    fn is_open(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    fn succeeded(&mut self) {
        self.backoff.reset();
        self.retry_at = None;
    }

    /// Hold further flushes for the next backoff delay
    fn failed(&mut self, now: Instant) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(now + delay);
        delay
    }
}

/// Feed-to-sink pipeline around one [`IndicatorEngine`]
pub struct IngestionLoop {
    config: LoopConfig,
    engine: Arc<IndicatorEngine>,
    registry: Arc<dyn SymbolRegistry>,
    bar_sink: Arc<dyn BarSink>,
    indicator_sink: Arc<dyn IndicatorSink>,
    symbols: SingleFlightCache<String, SymbolId, SinkError>,
    metadata: SingleFlightCache<SymbolId, Option<Arc<SymbolMetadata>>, SinkError>,
}

impl IngestionLoop {
    pub fn new(
        config: LoopConfig,
        engine: Arc<IndicatorEngine>,
        registry: Arc<dyn SymbolRegistry>,
        bar_sink: Arc<dyn BarSink>,
        indicator_sink: Arc<dyn IndicatorSink>,
    ) -> Self {
        let metadata = SingleFlightCache::with_ttl(config.metadata_ttl);
        Self {
            config,
            engine,
            registry,
            bar_sink,
            indicator_sink,
            symbols: SingleFlightCache::new(),
            metadata,
        }
    }

    pub fn engine(&self) -> &Arc<IndicatorEngine> {
        &self.engine
    }

    /// Resolve configured tickers and their metadata before streaming
    ///
    /// Returns the number of tickers resolved; failures are logged and
    /// retried lazily when their first bar arrives.
    pub async fn warm_up(&self, tickers: &[String]) -> usize {
        let resolved = join_all(tickers.iter().map(|ticker| async move {
            let symbol_id = match self.resolve_symbol(ticker).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(symbol = %ticker, error = %e, "Warm-up failed to resolve symbol");
                    return false;
                }
            };
            if let Err(e) = self.resolve_metadata(symbol_id).await {
                warn!(symbol = %ticker, error = %e, "Warm-up failed to load metadata");
            }
            true
        }))
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count();

        info!("Warmed up {}/{} symbols", resolved, tickers.len());
        resolved
    }

    /// Stream bars from `source` until it ends or `cancel` fires
    ///
    /// Performs a best-effort final flush on the way out. Only a permanent
    /// source failure is returned as an error.
    pub async fn run<S>(&self, source: S, cancel: CancellationToken) -> Result<IngestionSummary>
    where
        S: BarSource + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<FeedBar>(self.config.channel_capacity.max(1));
        let reader = tokio::spawn(read_source(source, tx, cancel.clone()));

        let mut summary = IngestionSummary::default();
        let mut pending =
            PendingWrites::new(self.config.batch_size.max(1) * self.config.max_buffered_batches.max(1));
        let attempts = self.config.sink_retry_attempts;
        let mut schedule =
            FlushSchedule::new(self.config.retry_base_delay_ms, self.config.retry_max_delay_ms);
        let mut flush_timer =
            tokio::time::interval(self.config.flush_interval.max(Duration::from_millis(1)));
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_timer.tick().await;

        info!(
            timeframe = %self.config.timeframe,
            batch_size = self.config.batch_size,
            "Ingestion loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping ingestion loop");
                    break;
                }
                received = rx.recv() => match received {
                    Some(feed_bar) => {
                        self.handle_bar(feed_bar, &mut pending, &mut summary).await;
                        if pending.is_due(self.config.batch_size.max(1))
                            && schedule.is_open(Instant::now())
                        {
                            self.flush(&mut pending, &mut summary, &mut schedule, &cancel, attempts)
                                .await;
                        }
                    }
                    None => {
                        debug!("Bar source finished");
                        break;
                    }
                },
                _ = flush_timer.tick() => {
                    if !pending.is_empty() && schedule.is_open(Instant::now()) {
                        self.flush(&mut pending, &mut summary, &mut schedule, &cancel, attempts)
                            .await;
                    }
                }
            }
        }

        drop(rx);
        if !pending.is_empty() {
            self.flush(&mut pending, &mut summary, &mut schedule, &cancel, 1).await;
            if !pending.is_empty() {
                warn!(
                    bars = pending.bars.len(),
                    indicators = pending.indicators.len(),
                    "Final flush incomplete, discarding buffered rows"
                );
            }
        }

        let source_result = reader
            .await
            .map_err(|e| IngestError::Internal(format!("bar reader task failed: {}", e)))?;

        info!(
            bars = summary.bars_processed,
            indicators = summary.indicators_emitted,
            bars_written = summary.bars_written,
            indicators_written = summary.indicators_written,
            "Ingestion loop stopped"
        );

        source_result.map(|()| summary)
    }

    async fn handle_bar(
        &self,
        feed_bar: FeedBar,
        pending: &mut PendingWrites,
        summary: &mut IngestionSummary,
    ) {
        summary.bars_received += 1;

        let symbol_id = match self.resolve_symbol(&feed_bar.ticker).await {
            Ok(id) => id,
            Err(e) => {
                summary.unresolved_symbols += 1;
                warn!(symbol = %feed_bar.ticker, error = %e, "Dropping bar for unresolved symbol");
                return;
            }
        };

        let metadata = match self.resolve_metadata(symbol_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    symbol = %feed_bar.ticker,
                    error = %e,
                    "Metadata unavailable, processing without it"
                );
                None
            }
        };

        let bar = feed_bar.into_bar(symbol_id, self.config.timeframe);
        if let Err(e) = bar.validate() {
            summary.invalid_bars += 1;
            warn!(symbol = %bar.symbol_id, timestamp = %bar.timestamp, "Dropping invalid bar: {}", e);
            return;
        }

        let values = self.engine.process(&bar, metadata);
        summary.bars_processed += 1;
        summary.indicators_emitted += values.len() as u64;
        pending.push(bar, values);
    }

    async fn resolve_symbol(&self, ticker: &str) -> std::result::Result<SymbolId, Arc<SinkError>> {
        let registry = Arc::clone(&self.registry);
        let owned = ticker.to_string();
        self.symbols
            .get_or_load(ticker.to_string(), move || async move {
                registry.get_or_create_symbol(&owned).await
            })
            .await
    }

    async fn resolve_metadata(
        &self,
        symbol_id: SymbolId,
    ) -> std::result::Result<Option<Arc<SymbolMetadata>>, Arc<SinkError>> {
        let registry = Arc::clone(&self.registry);
        self.metadata
            .get_or_load(symbol_id, move || async move {
                registry
                    .get_metadata(symbol_id)
                    .await
                    .map(|metadata| metadata.map(Arc::new))
            })
            .await
    }

    async fn flush(
        &self,
        pending: &mut PendingWrites,
        summary: &mut IngestionSummary,
        schedule: &mut FlushSchedule,
        cancel: &CancellationToken,
        attempts: u32,
    ) {
        let (dropped_bars, dropped_indicators) = pending.take_dropped();
        if dropped_bars > 0 || dropped_indicators > 0 {
            summary.dropped_bars += dropped_bars;
            summary.dropped_indicators += dropped_indicators;
            warn!(
                bars = dropped_bars,
                indicators = dropped_indicators,
                "Write buffer full, dropped oldest rows"
            );
        }

        let batch_size = self.config.batch_size.max(1);

        let bars = self
            .write_chunks(
                &self.bar_sink,
                &mut pending.bars,
                batch_size,
                &mut schedule.backoff,
                attempts,
                cancel,
            )
            .await;
        summary.bars_written += bars.rows;
        summary.flush_failures += u64::from(bars.failed);

        let indicators = self
            .write_chunks(
                &self.indicator_sink,
                &mut pending.indicators,
                batch_size,
                &mut schedule.backoff,
                attempts,
                cancel,
            )
            .await;
        summary.indicators_written += indicators.rows;
        summary.flush_failures += u64::from(indicators.failed);

        if bars.failed || indicators.failed {
            let delay = schedule.failed(Instant::now());
            warn!(
                delay_ms = delay.as_millis() as u64,
                "Holding further flushes while the sink recovers"
            );
        } else {
            schedule.succeeded();
        }
    }

    /// Write `rows` in `batch_size` chunks, removing what was persisted
    async fn write_chunks<T, W>(
        &self,
        writer: &W,
        rows: &mut VecDeque<T>,
        batch_size: usize,
        backoff: &mut Backoff,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> ChunkOutcome
    where
        T: Sync,
        W: RowWriter<T>,
    {
        let mut outcome = ChunkOutcome::default();
        while !rows.is_empty() {
            let len = rows.len().min(batch_size);
            let result = {
                let chunk = &rows.make_contiguous()[..len];
                self.write_with_retry(writer, chunk, backoff, attempts, cancel).await
            };
            match result {
                Ok(()) => {
                    rows.drain(..len);
                    outcome.rows += len as u64;
                }
                Err(e) => {
                    outcome.failed = true;
                    error!(
                        sink = W::NAME,
                        retained = rows.len(),
                        error = %e,
                        "Flush failed, keeping rows for the next attempt"
                    );
                    break;
                }
            }
        }
        if outcome.rows > 0 {
            debug!(sink = W::NAME, rows = outcome.rows, "Flushed");
        }
        outcome
    }

    async fn write_with_retry<T, W>(
        &self,
        writer: &W,
        chunk: &[T],
        backoff: &mut Backoff,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SinkError>
    where
        T: Sync,
        W: RowWriter<T>,
    {
        let mut attempt: u32 = 1;
        loop {
            match writer.write_rows(chunk).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        sink = W::NAME,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sink write failed, retrying"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Uniform chunk writes over the two sink traits
#[async_trait]
trait RowWriter<T: Sync>: Send + Sync {
    const NAME: &'static str;

    async fn write_rows(&self, rows: &[T]) -> std::result::Result<(), SinkError>;
}

#[async_trait]
impl RowWriter<Bar> for Arc<dyn BarSink> {
    const NAME: &'static str = "bars";

    async fn write_rows(&self, rows: &[Bar]) -> std::result::Result<(), SinkError> {
        self.upsert(rows).await
    }
}

#[async_trait]
impl RowWriter<IndicatorValue> for Arc<dyn IndicatorSink> {
    const NAME: &'static str = "indicators";

    async fn write_rows(&self, rows: &[IndicatorValue]) -> std::result::Result<(), SinkError> {
        self.upsert(rows).await
    }
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    rows: u64,
    failed: bool,
}

async fn read_source<S>(
    mut source: S,
    tx: mpsc::Sender<FeedBar>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: BarSource,
{
    loop {
        match source.next_bar(&cancel).await {
            Ok(Some(bar)) => {
                if tx.send(bar).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) if e.is_permanent() => {
                error!(error = %e, "Bar source failed permanently");
                cancel.cancel();
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "Bar source error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(minute: u32) -> Bar {
        use chrono::TimeZone;
        Bar {
            symbol_id: SymbolId::new(1),
            timeframe: TimeframeId::MINUTE_1,
            timestamp: chrono::Utc
                .with_ymd_and_hms(2024, 3, 5, 14, 30 + minute, 0)
                .unwrap(),
            open: dec!(10),
            high: dec!(10),
            low: dec!(10),
            close: dec!(10),
            volume: 1,
            vwap: None,
            avg_trade_size: None,
            trade_count: None,
        }
    }

    #[test]
    fn test_pending_writes_drop_oldest() {
        let mut pending = PendingWrites::new(3);
        for minute in 0..5 {
            pending.push(bar(minute), Vec::new());
        }
        assert_eq!(pending.bars.len(), 3);
        assert_eq!(pending.bars[0].timestamp, bar(2).timestamp);
        assert_eq!(pending.take_dropped(), (2, 0));
        assert_eq!(pending.take_dropped(), (0, 0));
    }

    #[test]
    fn test_pending_writes_due_at_batch_size() {
        let mut pending = PendingWrites::new(10);
        pending.push(bar(0), Vec::new());
        assert!(!pending.is_due(2));
        pending.push(bar(1), Vec::new());
        assert!(pending.is_due(2));
    }

    #[test]
    fn test_flush_schedule_holds_until_deadline() {
        let mut schedule = FlushSchedule::new(100, 1_000);
        let now = Instant::now();
        assert!(schedule.is_open(now));

        let first = schedule.failed(now);
        assert!(!schedule.is_open(now));
        assert!(schedule.is_open(now + first));

        let second = schedule.failed(now);
        assert!(second >= first);
        assert!(!schedule.is_open(now + first));

        schedule.succeeded();
        assert!(schedule.is_open(now));
        assert_eq!(schedule.backoff.attempt(), 0);
    }

    #[test]
    fn test_loop_config_from_service_config() {
        let config = LoopConfig::default();
        assert_eq!(config.timeframe, TimeframeId::MINUTE_1);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.sink_retry_attempts, 3);
        assert_eq!(config.metadata_ttl, Some(Duration::from_secs(3600)));
    }
}
