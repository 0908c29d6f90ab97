//! Institutional Flow Index
//!
//! Directional composite of how unusual the current bar is over the last 60
//! bars: `sign(dev) * (0.5 * |z(dev)| + 0.3 * z(volume) + 0.2 * z(ats))`
//! where `dev` is the close's relative distance from VWAP.

use crate::calculator::{checked_div, decimal_to_f64, IndicatorCalculator, IndicatorWriter};
use crate::calculators::trade_size::trade_size_sample;
use crate::error::Result;
use crate::rolling::RollingWindow;
use crate::session::SymbolSession;
use std::num::NonZeroUsize;
use types::{metrics, Bar};

const WINDOW: NonZeroUsize = match NonZeroUsize::new(60) {
    Some(n) => n,
    None => panic!("window length must be non-zero"),
};

const DEV_WEIGHT: f64 = 0.5;
const VOLUME_WEIGHT: f64 = 0.3;
const ATS_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct InstitutionalFlowState {
    ats60: RollingWindow,
    vol60: RollingWindow,
    dev60: RollingWindow,
}

impl Default for InstitutionalFlowState {
    fn default() -> Self {
        Self {
            ats60: RollingWindow::new(WINDOW),
            vol60: RollingWindow::new(WINDOW),
            dev60: RollingWindow::new(WINDOW),
        }
    }
}

#[derive(Debug, Default)]
pub struct InstitutionalFlowCalculator;

/// Sign with zero mapped to zero
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl IndicatorCalculator for InstitutionalFlowCalculator {
    fn name(&self) -> &'static str {
        "institutional_flow"
    }

    fn on_session_started(&self, session: &mut SymbolSession) {
        session.state.institutional_flow = Some(InstitutionalFlowState::default());
    }

    fn on_bar(
        &self,
        bar: &Bar,
        session: &mut SymbolSession,
        writer: &mut IndicatorWriter,
    ) -> Result<()> {
        let ats = trade_size_sample(bar)?
            .map(|a| decimal_to_f64(metrics::IFI_60, a))
            .transpose()?;
        let dev = bar
            .positive_vwap()
            .map(|vwap| checked_div(metrics::IFI_60, bar.close - vwap, vwap))
            .transpose()?
            .map(|d| decimal_to_f64(metrics::IFI_60, d))
            .transpose()?;
        let volume = bar.volume as f64;

        let state = session
            .state
            .institutional_flow
            .get_or_insert_with(Default::default);
        state.vol60.add(volume);
        if let Some(a) = ats {
            state.ats60.add(a);
        }
        if let Some(d) = dev {
            state.dev60.add(d);
        }

        let (Some(ats), Some(dev)) = (ats, dev) else {
            return Ok(());
        };
        if state.ats60.count() < 2 || state.vol60.count() < 2 || state.dev60.count() < 2 {
            return Ok(());
        }

        let magnitude = DEV_WEIGHT * state.dev60.z_score(dev).abs()
            + VOLUME_WEIGHT * state.vol60.z_score(volume)
            + ATS_WEIGHT * state.ats60.z_score(ats);
        writer.emit_f64(metrics::IFI_60, 60, sign(dev) * magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BarBuilder;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn session() -> SymbolSession {
        let bar = BarBuilder::minute(0).build();
        let mut s = SymbolSession::new(bar.key(), bar.timestamp.date_naive());
        InstitutionalFlowCalculator.on_session_started(&mut s);
        s
    }

    fn run(s: &mut SymbolSession, bar: &Bar) -> Option<Decimal> {
        let mut writer = IndicatorWriter::for_bar(bar);
        InstitutionalFlowCalculator.on_bar(bar, s, &mut writer).unwrap();
        writer.values().first().map(|v| v.value)
    }

    #[test]
    fn test_sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(2.5), 1.0);
        assert_eq!(sign(-2.5), -1.0);
    }

    #[test]
    fn test_requires_two_samples() {
        let mut s = session();
        let bar = BarBuilder::minute(0).close(dec!(10.2)).vwap(dec!(10)).ats(dec!(100)).build();
        assert_eq!(run(&mut s, &bar), None);
    }

    #[test]
    fn test_missing_vwap_emits_nothing() {
        let mut s = session();
        for minute in 0..5 {
            let bar = BarBuilder::minute(minute).ats(dec!(100)).build();
            assert_eq!(run(&mut s, &bar), None);
        }
    }

    #[test]
    fn test_heavy_bar_above_vwap_is_positive() {
        let mut s = session();
        let quiet = [dec!(10.01), dec!(9.99), dec!(10.02), dec!(9.98), dec!(10.00)];
        for (minute, close) in quiet.into_iter().enumerate() {
            let bar = BarBuilder::minute(minute as i64)
                .close(close)
                .vwap(dec!(10))
                .ats(dec!(100))
                .volume(1_000 + minute as u64 * 10)
                .build();
            run(&mut s, &bar);
        }
        let heavy = BarBuilder::minute(5)
            .close(dec!(10.40))
            .vwap(dec!(10))
            .ats(dec!(500))
            .volume(20_000)
            .build();
        let ifi = run(&mut s, &heavy).unwrap();
        assert!(ifi > Decimal::ZERO, "ifi = {}", ifi);
    }

    #[test]
    fn test_heavy_bar_below_vwap_is_negative() {
        let mut s = session();
        let quiet = [dec!(10.01), dec!(9.99), dec!(10.02), dec!(9.98)];
        for (minute, close) in quiet.into_iter().enumerate() {
            let bar = BarBuilder::minute(minute as i64)
                .close(close)
                .vwap(dec!(10))
                .ats(Decimal::from(100 + minute as i64))
                .volume(1_000 + minute as u64 * 10)
                .build();
            run(&mut s, &bar);
        }
        let heavy = BarBuilder::minute(4)
            .close(dec!(9.50))
            .vwap(dec!(10))
            .ats(dec!(500))
            .volume(20_000)
            .build();
        assert!(run(&mut s, &heavy).unwrap() < Decimal::ZERO);
    }
}
