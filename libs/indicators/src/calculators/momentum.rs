//! RSI, on-balance volume and cumulative volume delta

use crate::calculator::{decimal_to_f64, IndicatorCalculator, IndicatorWriter};
use crate::error::{CalculatorError, Result};
use crate::rsi::{WilderRsi, RSI_PERIOD};
use crate::session::SymbolSession;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use types::{metrics, Bar};

#[derive(Debug, Clone, Default)]
pub struct MomentumState {
    prev_close: Option<Decimal>,
    rsi: WilderRsi,
    obv: i64,
    cvd: i64,
}

impl MomentumState {
    pub fn obv(&self) -> i64 {
        self.obv
    }

    pub fn cvd(&self) -> i64 {
        self.cvd
    }
}

#[derive(Debug, Default)]
pub struct MomentumCalculator;

impl IndicatorCalculator for MomentumCalculator {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn on_session_started(&self, session: &mut SymbolSession) {
        session.state.momentum = Some(MomentumState::default());
    }

    fn on_bar(
        &self,
        bar: &Bar,
        session: &mut SymbolSession,
        writer: &mut IndicatorWriter,
    ) -> Result<()> {
        let state = session.state.momentum.get_or_insert_with(Default::default);

        let Some(prev_close) = state.prev_close else {
            state.prev_close = Some(bar.close);
            return Ok(());
        };

        let volume = i64::try_from(bar.volume)
            .map_err(|_| CalculatorError::Overflow { metric: metrics::OBV_D })?;

        let delta = decimal_to_f64(metrics::RSI_14, bar.close - prev_close)?;
        let mut rsi = state.rsi.clone();
        rsi.update(delta);

        let obv = match bar.close.cmp(&prev_close) {
            Ordering::Greater => state.obv.checked_add(volume),
            Ordering::Less => state.obv.checked_sub(volume),
            Ordering::Equal => Some(state.obv),
        }
        .ok_or(CalculatorError::Overflow { metric: metrics::OBV_D })?;

        let cvd = if bar.close >= bar.open {
            state.cvd.checked_add(volume)
        } else {
            state.cvd.checked_sub(volume)
        }
        .ok_or(CalculatorError::Overflow { metric: metrics::CVD_1M })?;

        if let Some(value) = rsi.value() {
            writer.emit_f64(metrics::RSI_14, RSI_PERIOD, value)?;
        }
        writer.emit(metrics::OBV_D, 0, Decimal::from(obv));
        writer.emit(metrics::CVD_1M, 1, Decimal::from(cvd));

        state.prev_close = Some(bar.close);
        state.rsi = rsi;
        state.obv = obv;
        state.cvd = cvd;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BarBuilder;
    use rust_decimal_macros::dec;

    fn session() -> SymbolSession {
        let bar = BarBuilder::minute(0).build();
        let mut s = SymbolSession::new(bar.key(), bar.timestamp.date_naive());
        MomentumCalculator.on_session_started(&mut s);
        s
    }

    fn run(s: &mut SymbolSession, bar: &Bar) -> IndicatorWriter {
        let mut writer = IndicatorWriter::for_bar(bar);
        MomentumCalculator.on_bar(bar, s, &mut writer).unwrap();
        writer
    }

    fn get(writer: &IndicatorWriter, code: &str) -> Option<Decimal> {
        writer
            .values()
            .iter()
            .find(|v| v.metric_code == code)
            .map(|v| v.value)
    }

    #[test]
    fn test_first_bar_only_seeds() {
        let mut s = session();
        let writer = run(&mut s, &BarBuilder::minute(0).close(dec!(10)).build());
        assert!(writer.is_empty());
    }

    #[test]
    fn test_obv_scenario() {
        let mut s = session();
        let closes = [dec!(10), dec!(11), dec!(10), dec!(9)];
        let volumes = [500u64, 1_200, 700, 400];
        let mut last = None;
        for (i, (close, volume)) in closes.into_iter().zip(volumes).enumerate() {
            let bar = BarBuilder::minute(i as i64).open(close).close(close).volume(volume).build();
            last = Some(run(&mut s, &bar));
        }
        let expected = 1_200i64 - 700 - 400;
        assert_eq!(get(&last.unwrap(), "OBV_D"), Some(Decimal::from(expected)));
        assert_eq!(s.state.momentum.as_ref().unwrap().obv(), expected);
    }

    #[test]
    fn test_flat_close_leaves_obv() {
        let mut s = session();
        run(&mut s, &BarBuilder::minute(0).close(dec!(10)).build());
        let up = run(&mut s, &BarBuilder::minute(1).close(dec!(11)).volume(300).build());
        let flat = run(&mut s, &BarBuilder::minute(2).close(dec!(11)).volume(900).build());
        assert_eq!(get(&up, "OBV_D"), get(&flat, "OBV_D"));
    }

    #[test]
    fn test_cvd_sign_follows_candle_body() {
        let mut s = session();
        run(&mut s, &BarBuilder::minute(0).build());
        let green = run(
            &mut s,
            &BarBuilder::minute(1).open(dec!(10)).close(dec!(10.5)).volume(200).build(),
        );
        assert_eq!(get(&green, "CVD_1M"), Some(dec!(200)));
        let red = run(
            &mut s,
            &BarBuilder::minute(2).open(dec!(10.5)).close(dec!(10.1)).volume(50).build(),
        );
        assert_eq!(get(&red, "CVD_1M"), Some(dec!(150)));
    }

    #[test]
    fn test_rsi_rising_series_is_100() {
        let mut s = session();
        let mut writer = None;
        for i in 0..5 {
            let close = Decimal::from(10 + i);
            writer = Some(run(&mut s, &BarBuilder::minute(i).close(close).build()));
        }
        assert_eq!(get(&writer.unwrap(), "RSI_14"), Some(dec!(100)));
    }
}
