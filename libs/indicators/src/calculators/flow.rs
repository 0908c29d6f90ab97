//! Session flow and exhaustion signals
//!
//! Emits, on every bar:
//! - `VWAP_DEV`: relative distance of the close from VWAP
//! - `R`: float rotations, cumulative session volume over free float
//! - `RVOL_63`: cumulative session volume over 3-month average daily volume
//! - `EFF`: session move per rotation
//! - `BACKSIDE`: 1 when a heavily rotated name is fading below VWAP on
//!   declining relative volume without a fresh high, else 0

use crate::calculator::{checked_div, IndicatorCalculator, IndicatorWriter};
use crate::error::Result;
use crate::session::SymbolSession;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use types::{metrics, Bar};

/// Minutes without a new session high before a fade counts as backside
pub const NO_NEW_HIGH_MINUTES: i64 = 10;

/// Float rotations required before backside can trigger
const MIN_ROTATIONS: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

#[derive(Debug, Clone, Default)]
pub struct FlowState {
    session_open: Option<Decimal>,
    session_high: Decimal,
    last_high_at: Option<DateTime<Utc>>,
    cum_volume: u64,
    peak_rvol: Decimal,
}

impl FlowState {
    /// Cumulative session volume
    pub fn cum_volume(&self) -> u64 {
        self.cum_volume
    }

    pub fn session_high(&self) -> Decimal {
        self.session_high
    }
}

#[derive(Debug, Default)]
pub struct FlowCalculator;

impl IndicatorCalculator for FlowCalculator {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn on_session_started(&self, session: &mut SymbolSession) {
        session.state.flow = Some(FlowState::default());
    }

    fn on_bar(
        &self,
        bar: &Bar,
        session: &mut SymbolSession,
        writer: &mut IndicatorWriter,
    ) -> Result<()> {
        let (float_shares, adv) = session
            .metadata()
            .map(|m| (m.float_shares, m.avg_daily_volume_3m))
            .unwrap_or((None, None));
        let state = session.state.flow.get_or_insert_with(Default::default);

        let session_open = *state.session_open.get_or_insert(bar.open);
        state.cum_volume = state.cum_volume.saturating_add(bar.volume);
        if bar.high > state.session_high {
            state.session_high = bar.high;
            state.last_high_at = Some(bar.timestamp);
        }
        let cum_volume = Decimal::from(state.cum_volume);

        let vwap_dev = match bar.positive_vwap() {
            Some(vwap) => checked_div(metrics::VWAP_DEV, bar.close - vwap, vwap)?,
            None => Decimal::ZERO,
        };

        let r = match float_shares.filter(|f| *f > 0) {
            Some(float) => checked_div(metrics::R, cum_volume, Decimal::from(float))?,
            None => Decimal::ZERO,
        };

        let rvol = match adv.filter(|a| *a > 0) {
            Some(adv) => checked_div(metrics::RVOL_63, cum_volume, Decimal::from(adv))?,
            None => Decimal::ZERO,
        };

        let eff = if r > Decimal::ZERO && !session_open.is_zero() {
            let pct_move = checked_div(metrics::EFF, bar.close, session_open)? - Decimal::ONE;
            checked_div(metrics::EFF, pct_move, r)?
        } else {
            Decimal::ZERO
        };

        let no_new_high = state.last_high_at.map_or(true, |at| {
            bar.timestamp - at >= Duration::minutes(NO_NEW_HIGH_MINUTES)
        });
        let below_vwap = bar.vwap.is_some_and(|vwap| bar.close < vwap);
        let backside = r >= MIN_ROTATIONS && below_vwap && no_new_high && rvol < state.peak_rvol;

        state.peak_rvol = state.peak_rvol.max(rvol);

        writer.emit(metrics::VWAP_DEV, 0, vwap_dev);
        writer.emit(metrics::R, 0, r);
        writer.emit(metrics::RVOL_63, 63, rvol);
        writer.emit(metrics::EFF, 0, eff);
        writer.emit(
            metrics::BACKSIDE,
            0,
            if backside { Decimal::ONE } else { Decimal::ZERO },
        );
        Ok(())
    }
}
