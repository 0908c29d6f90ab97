//! Bars and per-symbol reference data

use crate::errors::TypesError;
use crate::identifiers::{SymbolId, TimeframeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV aggregate for a symbol over a fixed interval
///
/// `timestamp` is the bar-close time. Produced once per vendor event and
/// consumed exactly once by the indicator engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol_id: SymbolId,
    pub timeframe: TimeframeId,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub vwap: Option<Decimal>,
    /// Feed-supplied average trade size
    pub avg_trade_size: Option<Decimal>,
    pub trade_count: Option<u64>,
}

impl Bar {
    /// Session key this bar belongs to
    #[inline]
    pub fn key(&self) -> (SymbolId, TimeframeId) {
        (self.symbol_id, self.timeframe)
    }

    /// Check `low <= open, close <= high`
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.low > self.high {
            return Err(TypesError::InconsistentPrices(format!(
                "low {} above high {}",
                self.low, self.high
            )));
        }
        for (name, price) in [("open", self.open), ("close", self.close)] {
            if price < self.low || price > self.high {
                return Err(TypesError::InconsistentPrices(format!(
                    "{} {} outside [{}, {}]",
                    name, price, self.low, self.high
                )));
            }
        }
        Ok(())
    }

    /// VWAP if present and strictly positive
    #[inline]
    pub fn positive_vwap(&self) -> Option<Decimal> {
        self.vwap.filter(|v| *v > Decimal::ZERO)
    }
}

/// Reference data for a symbol, shared read-only between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub symbol_id: SymbolId,
    pub ticker: String,
    pub float_shares: Option<u64>,
    /// Three-month average daily volume
    pub avg_daily_volume_3m: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar() -> Bar {
        Bar {
            symbol_id: SymbolId::new(1),
            timeframe: TimeframeId::MINUTE_1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 31, 0).unwrap(),
            open: dec!(10.00),
            high: dec!(10.50),
            low: dec!(9.90),
            close: dec!(10.20),
            volume: 1_000,
            vwap: Some(dec!(10.10)),
            avg_trade_size: None,
            trade_count: None,
        }
    }

    #[test]
    fn test_validate_accepts_consistent_bar() {
        assert!(bar().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_close_above_high() {
        let mut b = bar();
        b.close = dec!(11);
        assert!(matches!(
            b.validate(),
            Err(TypesError::InconsistentPrices(_))
        ));
    }

    #[test]
    fn test_positive_vwap_filters_zero() {
        let mut b = bar();
        assert_eq!(b.positive_vwap(), Some(dec!(10.10)));
        b.vwap = Some(Decimal::ZERO);
        assert_eq!(b.positive_vwap(), None);
    }
}
