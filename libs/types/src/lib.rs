//! # Barflow Shared Types
//!
//! Market data types shared by the indicator engine and the ingestion service.
//!
//! ## Design Philosophy
//!
//! - **Type Safety**: symbol and timeframe identifiers are distinct newtypes
//! - **No Precision Loss**: prices, VWAP and indicator outputs are `Decimal`
//! - **Plain Values**: a [`Bar`] is immutable once produced and consumed exactly once
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{Bar, SymbolId, TimeframeId};
//! use chrono::{TimeZone, Utc};
//! use rust_decimal::Decimal;
//!
//! let bar = Bar {
//!     symbol_id: SymbolId::new(7),
//!     timeframe: TimeframeId::MINUTE_1,
//!     timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 15, 31, 0).unwrap(),
//!     open: Decimal::new(1010, 2),
//!     high: Decimal::new(1025, 2),
//!     low: Decimal::new(1001, 2),
//!     close: Decimal::new(1020, 2),
//!     volume: 12_500,
//!     vwap: Some(Decimal::new(1012, 2)),
//!     avg_trade_size: None,
//!     trade_count: Some(125),
//! };
//! assert_eq!(bar.key(), (SymbolId::new(7), TimeframeId::MINUTE_1));
//! ```

pub mod errors;
pub mod identifiers;
pub mod indicator;
pub mod market;
pub mod metrics;

pub use errors::TypesError;
pub use identifiers::{SymbolId, TimeframeId};
pub use indicator::IndicatorValue;
pub use market::{Bar, SymbolMetadata};

/// Result type for type-level validation
pub type Result<T> = std::result::Result<T, TypesError>;
