//! Per-symbol, per-timeframe, per-trading-day calculator state

use crate::calculators::{FlowState, InstitutionalFlowState, MomentumState, TradeSizeState};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use types::{SymbolId, SymbolMetadata, TimeframeId};

/// Session identity
pub type SessionKey = (SymbolId, TimeframeId);

/// One typed slot per calculator family
///
/// A slot is `None` until its calculator's session hook or first bar fills
/// it, and is cleared on rollover.
#[derive(Debug, Default)]
pub struct CalculatorState {
    pub trade_size: Option<TradeSizeState>,
    pub flow: Option<FlowState>,
    pub momentum: Option<MomentumState>,
    pub institutional_flow: Option<InstitutionalFlowState>,
}

#[derive(Debug)]
pub struct SymbolSession {
    key: SessionKey,
    session_date: NaiveDate,
    last_timestamp: Option<DateTime<Utc>>,
    metadata: Option<Arc<SymbolMetadata>>,
    pub state: CalculatorState,
}

impl SymbolSession {
    pub fn new(key: SessionKey, session_date: NaiveDate) -> Self {
        Self {
            key,
            session_date,
            last_timestamp: None,
            metadata: None,
            state: CalculatorState::default(),
        }
    }

    #[inline]
    pub fn key(&self) -> SessionKey {
        self.key
    }

    #[inline]
    pub fn session_date(&self) -> NaiveDate {
        self.session_date
    }

    /// Timestamp of the last bar applied in this trading day
    #[inline]
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn metadata(&self) -> Option<&SymbolMetadata> {
        self.metadata.as_deref()
    }

    pub fn set_metadata(&mut self, metadata: Arc<SymbolMetadata>) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn mark_applied(&mut self, timestamp: DateTime<Utc>) {
        self.last_timestamp = Some(timestamp);
    }

    /// Start a new trading day: calculator state and metadata are dropped
    pub(crate) fn reset(&mut self, session_date: NaiveDate) {
        self.session_date = session_date;
        self.last_timestamp = None;
        self.metadata = None;
        self.state = CalculatorState::default();
    }
}
