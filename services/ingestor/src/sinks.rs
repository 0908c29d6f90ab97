//! Storage and reference-data boundaries
//!
//! The ingestion loop only sees these traits. The in-memory implementations
//! back the binary until a database sink is wired in and serve as fakes in
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use types::indicator::IndicatorKey;
use types::{Bar, IndicatorValue, SymbolId, SymbolMetadata, TimeframeId};

use crate::SinkError;

/// Idempotent bar store keyed by `(symbol, timeframe, timestamp)`
#[async_trait]
pub trait BarSink: Send + Sync {
    async fn upsert(&self, bars: &[Bar]) -> Result<(), SinkError>;
}

/// Idempotent indicator store keyed by `(symbol, timeframe, timestamp, metric, period)`
#[async_trait]
pub trait IndicatorSink: Send + Sync {
    async fn upsert(&self, values: &[IndicatorValue]) -> Result<(), SinkError>;
}

/// Ticker resolution and per-symbol reference data
#[async_trait]
pub trait SymbolRegistry: Send + Sync {
    async fn get_or_create_symbol(&self, ticker: &str) -> Result<SymbolId, SinkError>;

    async fn get_metadata(&self, symbol_id: SymbolId) -> Result<Option<SymbolMetadata>, SinkError>;
}

type BarKey = (SymbolId, TimeframeId, DateTime<Utc>);

#[derive(Debug, Default)]
pub struct MemoryBarSink {
    rows: DashMap<BarKey, Bar>,
    writes: AtomicU64,
}

impl MemoryBarSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &BarKey) -> Option<Bar> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    /// Successful `upsert` calls
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BarSink for MemoryBarSink {
    async fn upsert(&self, bars: &[Bar]) -> Result<(), SinkError> {
        for bar in bars {
            self.rows
                .insert((bar.symbol_id, bar.timeframe, bar.timestamp), bar.clone());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryIndicatorSink {
    rows: DashMap<IndicatorKey, IndicatorValue>,
    writes: AtomicU64,
}

impl MemoryIndicatorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// All stored values for one symbol and metric, oldest first
    pub fn series(&self, symbol_id: SymbolId, metric_code: &str) -> Vec<IndicatorValue> {
        let mut values: Vec<IndicatorValue> = self
            .rows
            .iter()
            .filter(|row| row.symbol_id == symbol_id && row.metric_code == metric_code)
            .map(|row| row.value().clone())
            .collect();
        values.sort_by_key(|v| v.timestamp);
        values
    }
}

#[async_trait]
impl IndicatorSink for MemoryIndicatorSink {
    async fn upsert(&self, values: &[IndicatorValue]) -> Result<(), SinkError> {
        for value in values {
            self.rows.insert(value.key(), value.clone());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Registry assigning sequential ids on first sight of a ticker
#[derive(Debug)]
pub struct InMemoryRegistry {
    ids: DashMap<String, SymbolId>,
    metadata: DashMap<SymbolId, SymbolMetadata>,
    next_id: AtomicU32,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self {
            ids: DashMap::new(),
            metadata: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with configured reference data
    pub fn from_reference<'a>(
        reference: impl IntoIterator<Item = (&'a String, &'a service_config::SymbolReference)>,
    ) -> Self {
        let registry = Self::new();
        for (ticker, data) in reference {
            registry.seed(ticker, data.float_shares, data.avg_daily_volume_3m);
        }
        registry
    }

    /// Register `ticker` with reference data, replacing any previous values
    pub fn seed(
        &self,
        ticker: &str,
        float_shares: Option<u64>,
        avg_daily_volume_3m: Option<u64>,
    ) -> SymbolId {
        let ticker = normalize(ticker);
        let symbol_id = self.id_for(&ticker);
        self.metadata.insert(
            symbol_id,
            SymbolMetadata {
                symbol_id,
                ticker,
                float_shares,
                avg_daily_volume_3m,
            },
        );
        symbol_id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn id_for(&self, ticker: &str) -> SymbolId {
        *self
            .ids
            .entry(ticker.to_string())
            .or_insert_with(|| SymbolId::new(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }
}

fn normalize(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

#[async_trait]
impl SymbolRegistry for InMemoryRegistry {
    async fn get_or_create_symbol(&self, ticker: &str) -> Result<SymbolId, SinkError> {
        let ticker = normalize(ticker);
        if ticker.is_empty() {
            return Err(SinkError::Registry {
                ticker,
                reason: "empty ticker".to_string(),
            });
        }
        let symbol_id = self.id_for(&ticker);
        self.metadata
            .entry(symbol_id)
            .or_insert_with(|| SymbolMetadata {
                symbol_id,
                ticker,
                float_shares: None,
                avg_daily_volume_3m: None,
            });
        Ok(symbol_id)
    }

    async fn get_metadata(&self, symbol_id: SymbolId) -> Result<Option<SymbolMetadata>, SinkError> {
        Ok(self.metadata.get(&symbol_id).map(|m| m.value().clone()))
    }
}
