//! Metric code catalogue
//!
//! Codes are stable strings used as part of the indicator persistence key.

pub const ATS: &str = "ATS";
pub const ATS_MA_15: &str = "ATS_MA_15";
pub const ATS_MA_60: &str = "ATS_MA_60";
pub const ATS_Z_15: &str = "ATS_Z_15";
pub const ATS_Z_60: &str = "ATS_Z_60";

pub const VWAP_DEV: &str = "VWAP_DEV";
pub const R: &str = "R";
pub const RVOL_63: &str = "RVOL_63";
pub const EFF: &str = "EFF";
pub const BACKSIDE: &str = "BACKSIDE";

pub const RSI_14: &str = "RSI_14";
pub const OBV_D: &str = "OBV_D";
pub const CVD_1M: &str = "CVD_1M";

pub const IFI_60: &str = "IFI_60";

/// Every code the engine can emit
pub const ALL: [&str; 14] = [
    ATS, ATS_MA_15, ATS_MA_60, ATS_Z_15, ATS_Z_60, VWAP_DEV, R, RVOL_63, EFF, BACKSIDE, RSI_14,
    OBV_D, CVD_1M, IFI_60,
];
