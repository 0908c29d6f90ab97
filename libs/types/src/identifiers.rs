//! # Typed Identifiers
//!
//! Zero-cost wrappers around the registry-assigned symbol id and the
//! timeframe catalogue id. Function signatures taking `(SymbolId, TimeframeId)`
//! cannot have their arguments swapped by accident.

use crate::errors::TypesError;
use std::time::Duration;

macro_rules! define_typed_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Create a new typed ID
            #[inline(always)]
            pub const fn new(id: $inner) -> Self {
                Self(id)
            }

            /// Create a new typed ID, rejecting zero
            #[inline]
            pub fn new_validated(id: $inner) -> Result<Self, TypesError> {
                if id == 0 {
                    return Err(TypesError::NullId);
                }
                Ok(Self(id))
            }

            /// Extract the inner value
            #[inline(always)]
            pub const fn inner(&self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline(always)]
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $inner {
            #[inline(always)]
            fn from(id: $name) -> $inner {
                id.0
            }
        }

        // Serializes as the raw integer
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                <$inner>::deserialize(deserializer).map(Self)
            }
        }
    };
}

define_typed_id!(
    /// Registry-assigned identifier for a tradable symbol
    SymbolId, u32
);

define_typed_id!(
    /// Catalogue identifier for a bar interval
    TimeframeId, u8
);

impl TimeframeId {
    pub const MINUTE_1: Self = Self(1);
    pub const MINUTE_5: Self = Self(2);
    pub const MINUTE_15: Self = Self(3);
    pub const MINUTE_30: Self = Self(4);
    pub const HOUR_1: Self = Self(6);
    pub const DAY_1: Self = Self(7);
    pub const WEEK_1: Self = Self(8);
    pub const MONTH_1: Self = Self(9);

    const CATALOGUE: [(Self, &'static str); 8] = [
        (Self::MINUTE_1, "1m"),
        (Self::MINUTE_5, "5m"),
        (Self::MINUTE_15, "15m"),
        (Self::MINUTE_30, "30m"),
        (Self::HOUR_1, "1h"),
        (Self::DAY_1, "1d"),
        (Self::WEEK_1, "1w"),
        (Self::MONTH_1, "1mo"),
    ];

    /// Short label such as `"1m"`, `None` for ids outside the catalogue
    pub fn label(&self) -> Option<&'static str> {
        Self::CATALOGUE
            .iter()
            .find(|(id, _)| id == self)
            .map(|(_, label)| *label)
    }

    /// Parse a short label such as `"5m"` or `"1d"`
    pub fn from_label(label: &str) -> Result<Self, TypesError> {
        Self::CATALOGUE
            .iter()
            .find(|(_, l)| *l == label)
            .map(|(id, _)| *id)
            .ok_or_else(|| TypesError::UnknownTimeframe(label.to_string()))
    }

    /// Nominal interval length; months are approximated as 30 days
    pub fn nominal_duration(&self) -> Option<Duration> {
        let minutes: u64 = match *self {
            Self::MINUTE_1 => 1,
            Self::MINUTE_5 => 5,
            Self::MINUTE_15 => 15,
            Self::MINUTE_30 => 30,
            Self::HOUR_1 => 60,
            Self::DAY_1 => 60 * 24,
            Self::WEEK_1 => 60 * 24 * 7,
            Self::MONTH_1 => 60 * 24 * 30,
            _ => return None,
        };
        Some(Duration::from_secs(minutes * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_id_validation() {
        assert_eq!(SymbolId::new_validated(0), Err(TypesError::NullId));
        assert_eq!(SymbolId::new_validated(42).unwrap().inner(), 42);
    }

    #[test]
    fn test_timeframe_labels() {
        assert_eq!(TimeframeId::MINUTE_1.label(), Some("1m"));
        assert_eq!(TimeframeId::from_label("1h").unwrap(), TimeframeId::HOUR_1);
        assert!(TimeframeId::from_label("2h").is_err());
        assert_eq!(TimeframeId::new(5).label(), None);
    }

    #[test]
    fn test_nominal_duration() {
        assert_eq!(
            TimeframeId::MINUTE_5.nominal_duration(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(TimeframeId::new(0).nominal_duration(), None);
    }

    #[test]
    fn test_serializes_as_raw_integer() {
        let json = serde_json::to_string(&SymbolId::new(17)).unwrap();
        assert_eq!(json, "17");
        let back: TimeframeId = serde_json::from_str("3").unwrap();
        assert_eq!(back, TimeframeId::MINUTE_15);
    }
}
