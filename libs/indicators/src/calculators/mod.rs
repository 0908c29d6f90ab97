//! Built-in calculator families

pub mod flow;
pub mod institutional_flow;
pub mod momentum;
pub mod trade_size;

pub use flow::{FlowCalculator, FlowState};
pub use institutional_flow::{InstitutionalFlowCalculator, InstitutionalFlowState};
pub use momentum::{MomentumCalculator, MomentumState};
pub use trade_size::{trade_size_sample, TradeSizeCalculator, TradeSizeState};

use crate::calculator::IndicatorCalculator;

/// The standard calculator set in dispatch order
pub fn standard_calculators() -> Vec<Box<dyn IndicatorCalculator>> {
    vec![
        Box::new(TradeSizeCalculator),
        Box::new(FlowCalculator),
        Box::new(MomentumCalculator),
        Box::new(InstitutionalFlowCalculator),
    ]
}
