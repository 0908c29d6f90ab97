//! Indicator output values

use crate::identifiers::{SymbolId, TimeframeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One computed metric for one bar
///
/// Identity for idempotent persistence is
/// `(symbol_id, timeframe, timestamp, metric_code, period)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub symbol_id: SymbolId,
    pub timeframe: TimeframeId,
    pub timestamp: DateTime<Utc>,
    pub metric_code: Cow<'static, str>,
    /// Window length, 0 for instantaneous metrics
    pub period: u16,
    pub value: Decimal,
    pub params_json: Option<String>,
}

/// Upsert key for an indicator value
pub type IndicatorKey = (SymbolId, TimeframeId, DateTime<Utc>, Cow<'static, str>, u16);

impl IndicatorValue {
    pub fn key(&self) -> IndicatorKey {
        (
            self.symbol_id,
            self.timeframe,
            self.timestamp,
            self.metric_code.clone(),
            self.period,
        )
    }
}
