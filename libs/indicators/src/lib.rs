//! # Streaming Indicator Engine
//!
//! Turns a stream of bars into indicator values one bar at a time, with
//! bounded memory per `(symbol, timeframe)`.
//!
//! ## Architecture
//!
//! ```text
//! Bar ──► IndicatorEngine::process
//!            │  get-or-create / rollover SymbolSession (DashMap + Mutex)
//!            ▼
//!         [TradeSize, Flow, Momentum, InstitutionalFlow]  (fixed order)
//!            │  each mutates its typed state slot, appends to IndicatorWriter
//!            ▼
//!         Vec<IndicatorValue>
//! ```
//!
//! Calculators are synchronous and side-effect free apart from their
//! session slot. A failing calculator loses only its own output for the bar.

pub mod calculator;
pub mod calculators;
pub mod engine;
pub mod error;
pub mod rolling;
pub mod rsi;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use calculator::{IndicatorCalculator, IndicatorWriter};
pub use calculators::{
    standard_calculators, FlowCalculator, InstitutionalFlowCalculator, MomentumCalculator,
    TradeSizeCalculator,
};
pub use engine::{EngineStatsSnapshot, IndicatorEngine, SessionSnapshot};
pub use error::{CalculatorError, WindowError};
pub use rolling::{RollingWindow, Z_EPSILON};
pub use rsi::WilderRsi;
pub use session::{CalculatorState, SessionKey, SymbolSession};

/// Re-exported for callers configuring the exchange timezone
pub use chrono_tz::Tz;
