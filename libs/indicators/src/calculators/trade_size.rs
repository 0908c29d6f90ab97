//! Average trade size: raw value, moving averages and z-scores

use crate::calculator::{checked_div, decimal_to_f64, IndicatorCalculator, IndicatorWriter};
use crate::error::Result;
use crate::rolling::RollingWindow;
use crate::session::SymbolSession;
use rust_decimal::Decimal;
use std::num::NonZeroUsize;
use types::{metrics, Bar};

const SHORT: NonZeroUsize = match NonZeroUsize::new(15) {
    Some(n) => n,
    None => panic!("window length must be non-zero"),
};
const LONG: NonZeroUsize = match NonZeroUsize::new(60) {
    Some(n) => n,
    None => panic!("window length must be non-zero"),
};

#[derive(Debug, Clone)]
pub struct TradeSizeState {
    ma15: RollingWindow,
    stats15: RollingWindow,
    stats60: RollingWindow,
}

impl Default for TradeSizeState {
    fn default() -> Self {
        Self {
            ma15: RollingWindow::new(SHORT),
            stats15: RollingWindow::new(SHORT),
            stats60: RollingWindow::new(LONG),
        }
    }
}

/// Average trade size for a bar
///
/// The feed value wins when positive; otherwise it is derived from volume
/// and trade count. `None` when neither is available.
pub fn trade_size_sample(bar: &Bar) -> Result<Option<Decimal>> {
    if let Some(ats) = bar.avg_trade_size.filter(|a| *a > Decimal::ZERO) {
        return Ok(Some(ats));
    }
    match bar.trade_count {
        Some(n) if n > 0 => {
            checked_div(metrics::ATS, Decimal::from(bar.volume), Decimal::from(n)).map(Some)
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct TradeSizeCalculator;

impl IndicatorCalculator for TradeSizeCalculator {
    fn name(&self) -> &'static str {
        "trade_size"
    }

    fn on_session_started(&self, session: &mut SymbolSession) {
        session.state.trade_size = Some(TradeSizeState::default());
    }

    fn on_bar(
        &self,
        bar: &Bar,
        session: &mut SymbolSession,
        writer: &mut IndicatorWriter,
    ) -> Result<()> {
        let Some(ats) = trade_size_sample(bar)? else {
            return Ok(());
        };
        let sample = decimal_to_f64(metrics::ATS, ats)?;

        let state = session.state.trade_size.get_or_insert_with(Default::default);
        state.ma15.add(sample);
        state.stats15.add(sample);
        state.stats60.add(sample);

        writer.emit(metrics::ATS, 0, ats);

        if state.ma15.is_full() {
            writer.emit_f64(metrics::ATS_MA_15, 15, state.ma15.mean())?;
        }
        if state.stats60.is_full() {
            writer.emit_f64(metrics::ATS_MA_60, 60, state.stats60.mean())?;
        }
        if state.stats15.count() >= 2 {
            writer.emit_f64(metrics::ATS_Z_15, 15, state.stats15.z_score(sample))?;
        }
        if state.stats60.count() >= 2 {
            writer.emit_f64(metrics::ATS_Z_60, 60, state.stats60.z_score(sample))?;
        }
        Ok(())
    }
}
