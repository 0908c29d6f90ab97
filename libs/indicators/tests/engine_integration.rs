//! Integration tests for the indicator engine
//!
//! These tests drive full trading sessions through the standard calculator set.

use chrono::{DateTime, Duration, TimeZone, Utc};
use indicators::IndicatorEngine;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use types::{metrics, Bar, IndicatorValue, SymbolId, SymbolMetadata, TimeframeId};

fn open_bell() -> DateTime<Utc> {
    // 09:30 New York, daylight saving time
    Utc.with_ymd_and_hms(2024, 6, 3, 13, 30, 0).unwrap()
}

fn bar(minute: i64, close: Decimal, volume: u64) -> Bar {
    let open = close - dec!(0.05);
    Bar {
        symbol_id: SymbolId::new(42),
        timeframe: TimeframeId::MINUTE_1,
        timestamp: open_bell() + Duration::minutes(minute),
        open,
        high: close + dec!(0.10),
        low: open - dec!(0.10),
        close,
        volume,
        vwap: Some(dec!(20)),
        avg_trade_size: None,
        trade_count: Some(volume / 50),
    }
}

fn metadata() -> Arc<SymbolMetadata> {
    Arc::new(SymbolMetadata {
        symbol_id: SymbolId::new(42),
        ticker: "ACME".to_string(),
        float_shares: Some(5_000_000),
        avg_daily_volume_3m: Some(10_000_000),
    })
}

fn codes(values: &[IndicatorValue]) -> HashSet<String> {
    values.iter().map(|v| v.metric_code.to_string()).collect()
}

#[test]
fn test_full_session_emits_every_metric() {
    let engine = IndicatorEngine::standard(chrono_tz::America::New_York);
    let mut seen = HashSet::new();

    for minute in 0..90 {
        let close = dec!(20) + Decimal::new((minute % 7) - 3, 2);
        let values = engine.process(&bar(minute, close, 10_000 + minute as u64 * 100), Some(metadata()));
        for v in &values {
            assert_eq!(v.symbol_id, SymbolId::new(42));
            assert_eq!(v.timestamp, open_bell() + Duration::minutes(minute));
        }
        seen.extend(codes(&values));
    }

    for code in metrics::ALL {
        assert!(seen.contains(code), "missing {}", code);
    }
    assert_eq!(engine.stats().bars_processed, 90);
    assert_eq!(engine.stats().calculator_failures, 0);
}

#[test]
fn test_first_bar_output_set() {
    let engine = IndicatorEngine::standard(chrono_tz::America::New_York);
    let values = engine.process(&bar(0, dec!(20.10), 10_000), Some(metadata()));
    let codes = codes(&values);

    // Trade size (raw only) plus the five flow metrics; momentum only seeds.
    let expected: HashSet<String> = ["ATS", "VWAP_DEV", "R", "RVOL_63", "EFF", "BACKSIDE"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(codes, expected);
}

#[test]
fn test_periods_match_metric_windows() {
    let engine = IndicatorEngine::standard(chrono_tz::America::New_York);
    let mut last = Vec::new();
    for minute in 0..61 {
        last = engine.process(&bar(minute, dec!(20) + Decimal::new(minute % 3, 2), 10_000), None);
    }
    for v in &last {
        let expected = match &*v.metric_code {
            "ATS_MA_15" | "ATS_Z_15" => 15,
            "ATS_MA_60" | "ATS_Z_60" | "IFI_60" => 60,
            "RVOL_63" => 63,
            "RSI_14" => 14,
            "CVD_1M" => 1,
            _ => 0,
        };
        assert_eq!(v.period, expected, "{}", v.metric_code);
    }
}

#[test]
fn test_next_day_starts_fresh() {
    let engine = IndicatorEngine::standard(chrono_tz::America::New_York);
    for minute in 0..20 {
        engine.process(&bar(minute, dec!(20.01), 10_000), Some(metadata()));
    }

    let mut tomorrow = bar(0, dec!(20.01), 10_000);
    tomorrow.timestamp = open_bell() + Duration::days(1);
    let values = engine.process(&tomorrow, None);

    let codes = codes(&values);
    assert!(!codes.contains("ATS_MA_15"));
    assert!(!codes.contains("OBV_D"));
    let r = values.iter().find(|v| v.metric_code == "R").unwrap();
    assert_eq!(r.value, Decimal::ZERO);
}
