//! Calculator plug-in contract and the per-bar output collector

use crate::error::{CalculatorError, Result};
use crate::session::SymbolSession;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::borrow::Cow;
use types::{Bar, IndicatorValue};

/// Decimal places kept when converting floating-point statistics
const F64_SCALE: u32 = 10;

/// A family of indicators computed bar by bar
///
/// Implementations are pure CPU: no I/O, no blocking, no awaiting. State
/// lives in the session's typed slot for the calculator, never in `self`.
pub trait IndicatorCalculator: Send + Sync {
    /// Name used in logs when the calculator fails
    fn name(&self) -> &'static str;

    /// Called when a session is created or rolled over to a new trading day
    fn on_session_started(&self, session: &mut SymbolSession);

    /// Consume one bar, appending zero or more values to `writer`
    fn on_bar(
        &self,
        bar: &Bar,
        session: &mut SymbolSession,
        writer: &mut IndicatorWriter,
    ) -> Result<()>;
}

/// Collects the indicator values produced for a single bar
#[derive(Debug)]
pub struct IndicatorWriter {
    template: BarContext,
    values: Vec<IndicatorValue>,
}

#[derive(Debug, Clone, Copy)]
struct BarContext {
    symbol_id: types::SymbolId,
    timeframe: types::TimeframeId,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl IndicatorWriter {
    pub fn for_bar(bar: &Bar) -> Self {
        Self {
            template: BarContext {
                symbol_id: bar.symbol_id,
                timeframe: bar.timeframe,
                timestamp: bar.timestamp,
            },
            values: Vec::with_capacity(16),
        }
    }

    pub fn emit(&mut self, metric_code: &'static str, period: u16, value: Decimal) {
        self.values.push(IndicatorValue {
            symbol_id: self.template.symbol_id,
            timeframe: self.template.timeframe,
            timestamp: self.template.timestamp,
            metric_code: Cow::Borrowed(metric_code),
            period,
            value,
            params_json: None,
        });
    }

    /// Emit a floating-point statistic, failing on NaN or infinity
    pub fn emit_f64(&mut self, metric_code: &'static str, period: u16, value: f64) -> Result<()> {
        let decimal = to_decimal(metric_code, value)?;
        self.emit(metric_code, period, decimal);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop everything emitted after `len`
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn values(&self) -> &[IndicatorValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<IndicatorValue> {
        self.values
    }
}

pub(crate) fn to_decimal(metric: &'static str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(CalculatorError::NonFinite { metric, value });
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(F64_SCALE).normalize())
        .ok_or(CalculatorError::NonFinite { metric, value })
}

pub(crate) fn decimal_to_f64(metric: &'static str, value: Decimal) -> Result<f64> {
    value.to_f64().ok_or_else(|| CalculatorError::Arithmetic {
        metric,
        message: format!("{} not representable as f64", value),
    })
}

pub(crate) fn checked_div(metric: &'static str, num: Decimal, den: Decimal) -> Result<Decimal> {
    num.checked_div(den).ok_or_else(|| CalculatorError::Arithmetic {
        metric,
        message: format!("{} / {}", num, den),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use types::{SymbolId, TimeframeId};

    fn bar() -> Bar {
        Bar {
            symbol_id: SymbolId::new(3),
            timeframe: TimeframeId::MINUTE_1,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap(),
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: 1,
            vwap: None,
            avg_trade_size: None,
            trade_count: None,
        }
    }

    #[test]
    fn test_emit_copies_bar_identity() {
        let mut writer = IndicatorWriter::for_bar(&bar());
        writer.emit("ATS", 0, dec!(12.5));
        let v = &writer.values()[0];
        assert_eq!(v.symbol_id, SymbolId::new(3));
        assert_eq!(v.metric_code, "ATS");
        assert_eq!(v.value, dec!(12.5));
    }

    #[test]
    fn test_emit_f64_rejects_nan() {
        let mut writer = IndicatorWriter::for_bar(&bar());
        let err = writer.emit_f64("ATS_Z_15", 15, f64::NAN).unwrap_err();
        assert!(matches!(err, CalculatorError::NonFinite { metric: "ATS_Z_15", .. }));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_truncate_discards_partial_output() {
        let mut writer = IndicatorWriter::for_bar(&bar());
        writer.emit("R", 0, dec!(1));
        let mark = writer.len();
        writer.emit("EFF", 0, dec!(2));
        writer.truncate(mark);
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_checked_div_by_zero() {
        assert!(checked_div("R", dec!(1), Decimal::ZERO).is_err());
        assert_eq!(checked_div("R", dec!(3), dec!(2)).unwrap(), dec!(1.5));
    }
}
