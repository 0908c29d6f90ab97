//! Bar fixtures shared by unit tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use types::{Bar, SymbolId, TimeframeId};

/// 09:30 America/New_York on 2024-03-05
pub fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
}

pub struct BarBuilder {
    bar: Bar,
}

impl BarBuilder {
    pub fn minute(offset: i64) -> Self {
        let price = Decimal::from(10);
        Self {
            bar: Bar {
                symbol_id: SymbolId::new(1),
                timeframe: TimeframeId::MINUTE_1,
                timestamp: session_open() + Duration::minutes(offset),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1_000,
                vwap: None,
                avg_trade_size: None,
                trade_count: None,
            },
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.bar.timestamp = timestamp;
        self
    }

    pub fn symbol(mut self, id: u32) -> Self {
        self.bar.symbol_id = SymbolId::new(id);
        self
    }

    pub fn open(mut self, open: Decimal) -> Self {
        self.bar.open = open;
        self.widen(open);
        self
    }

    pub fn close(mut self, close: Decimal) -> Self {
        self.bar.close = close;
        self.widen(close);
        self
    }

    pub fn high(mut self, high: Decimal) -> Self {
        self.bar.high = high;
        self.widen(high);
        self
    }

    pub fn volume(mut self, volume: u64) -> Self {
        self.bar.volume = volume;
        self
    }

    pub fn vwap(mut self, vwap: Decimal) -> Self {
        self.bar.vwap = Some(vwap);
        self
    }

    pub fn ats(mut self, ats: Decimal) -> Self {
        self.bar.avg_trade_size = Some(ats);
        self
    }

    pub fn trades(mut self, count: u64) -> Self {
        self.bar.trade_count = Some(count);
        self
    }

    pub fn build(self) -> Bar {
        self.bar
    }

    fn widen(&mut self, price: Decimal) {
        self.bar.high = self.bar.high.max(price);
        self.bar.low = self.bar.low.min(price);
    }
}
