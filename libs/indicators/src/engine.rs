//! Session store and calculator dispatch
//!
//! One [`SymbolSession`] exists per `(symbol, timeframe)`. Sessions are
//! created atomically on the first bar for a key, reset in place when the
//! exchange-local trading date advances, and never removed.

use crate::calculator::{IndicatorCalculator, IndicatorWriter};
use crate::calculators::standard_calculators;
use crate::session::{SessionKey, SymbolSession};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{Bar, IndicatorValue, SymbolMetadata};

/// Counters exposed for monitoring
#[derive(Debug, Default)]
pub struct EngineStats {
    bars_processed: AtomicU64,
    sessions_created: AtomicU64,
    rollovers: AtomicU64,
    calculator_failures: AtomicU64,
    rejected_bars: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    pub bars_processed: u64,
    pub sessions_created: u64,
    pub rollovers: u64,
    pub calculator_failures: u64,
    pub rejected_bars: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            bars_processed: self.bars_processed.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            rollovers: self.rollovers.load(Ordering::Relaxed),
            calculator_failures: self.calculator_failures.load(Ordering::Relaxed),
            rejected_bars: self.rejected_bars.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read-only view of a session for observability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_date: NaiveDate,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub has_metadata: bool,
}

pub struct IndicatorEngine {
    sessions: DashMap<SessionKey, Arc<Mutex<SymbolSession>>>,
    calculators: Vec<Box<dyn IndicatorCalculator>>,
    market_tz: Tz,
    stats: EngineStats,
}

impl std::fmt::Debug for IndicatorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorEngine")
            .field("sessions", &self.sessions.len())
            .field(
                "calculators",
                &self.calculators.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("market_tz", &self.market_tz)
            .finish()
    }
}

impl IndicatorEngine {
    /// Engine dispatching to `calculators` in the given order
    pub fn new(market_tz: Tz, calculators: Vec<Box<dyn IndicatorCalculator>>) -> Self {
        Self {
            sessions: DashMap::new(),
            calculators,
            market_tz,
            stats: EngineStats::default(),
        }
    }

    /// Engine with the built-in calculator set
    pub fn standard(market_tz: Tz) -> Self {
        Self::new(market_tz, standard_calculators())
    }

    /// Exchange-local trading date of a UTC instant
    pub fn trading_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.market_tz).date_naive()
    }

    /// Run one bar through every calculator
    ///
    /// Metadata, when supplied, is attached to the session after any
    /// rollover. Late or duplicate bars yield no values and leave the
    /// session untouched.
    pub fn process(
        &self,
        bar: &Bar,
        metadata: Option<Arc<SymbolMetadata>>,
    ) -> Vec<IndicatorValue> {
        let trading_date = self.trading_date(bar.timestamp);
        let handle = self.session_for(bar.key(), trading_date, metadata.as_ref());
        let mut session = handle.lock();

        if trading_date < session.session_date() {
            self.reject(bar, "trading date precedes session date");
            return Vec::new();
        }
        if trading_date > session.session_date() {
            self.rollover(&mut session, trading_date);
        } else if session.last_timestamp().is_some_and(|last| bar.timestamp <= last) {
            self.reject(bar, "timestamp not after last applied bar");
            return Vec::new();
        }
        if let Some(metadata) = metadata {
            session.set_metadata(metadata);
        }

        let mut writer = IndicatorWriter::for_bar(bar);
        for calculator in &self.calculators {
            let mark = writer.len();
            if let Err(e) = calculator.on_bar(bar, &mut session, &mut writer) {
                writer.truncate(mark);
                EngineStats::bump(&self.stats.calculator_failures);
                warn!(
                    calculator = calculator.name(),
                    symbol = %bar.symbol_id,
                    timeframe = %bar.timeframe,
                    "Calculator failed, output discarded for this bar: {}",
                    e
                );
            }
        }
        session.mark_applied(bar.timestamp);
        EngineStats::bump(&self.stats.bars_processed);

        writer.into_values()
    }

    // Get-or-create under the map's shard lock so the session hooks run
    // exactly once and before any other caller can see the session.
    fn session_for(
        &self,
        key: SessionKey,
        trading_date: NaiveDate,
        metadata: Option<&Arc<SymbolMetadata>>,
    ) -> Arc<Mutex<SymbolSession>> {
        if let Some(existing) = self.sessions.get(&key) {
            return Arc::clone(existing.value());
        }

        let entry = self.sessions.entry(key).or_insert_with(|| {
            let mut session = SymbolSession::new(key, trading_date);
            if let Some(metadata) = metadata {
                session.set_metadata(Arc::clone(metadata));
            }
            for calculator in &self.calculators {
                calculator.on_session_started(&mut session);
            }
            EngineStats::bump(&self.stats.sessions_created);
            debug!(symbol = %key.0, timeframe = %key.1, "Created session for {}", trading_date);
            Arc::new(Mutex::new(session))
        });
        Arc::clone(entry.value())
    }

    fn rollover(&self, session: &mut SymbolSession, trading_date: NaiveDate) {
        let (symbol, timeframe) = session.key();
        info!(
            symbol = %symbol,
            timeframe = %timeframe,
            "Trading day rollover {} -> {}, resetting session",
            session.session_date(),
            trading_date
        );
        session.reset(trading_date);
        for calculator in &self.calculators {
            calculator.on_session_started(session);
        }
        EngineStats::bump(&self.stats.rollovers);
    }

    fn reject(&self, bar: &Bar, reason: &str) {
        EngineStats::bump(&self.stats.rejected_bars);
        warn!(
            symbol = %bar.symbol_id,
            timeframe = %bar.timeframe,
            timestamp = %bar.timestamp,
            "Rejected out-of-order bar: {}",
            reason
        );
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_snapshot(&self, key: SessionKey) -> Option<SessionSnapshot> {
        self.with_session(key, |s| SessionSnapshot {
            session_date: s.session_date(),
            last_timestamp: s.last_timestamp(),
            has_metadata: s.metadata().is_some(),
        })
    }

    /// Inspect a session under its lock
    pub fn with_session<R>(&self, key: SessionKey, f: impl FnOnce(&SymbolSession) -> R) -> Option<R> {
        let handle = self.sessions.get(&key).map(|e| Arc::clone(e.value()))?;
        let session = handle.lock();
        Some(f(&session))
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn market_timezone(&self) -> Tz {
        self.market_tz
    }
}
