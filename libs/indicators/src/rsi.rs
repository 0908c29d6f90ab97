//! Relative Strength Index with Wilder smoothing

/// Default RSI lookback
pub const RSI_PERIOD: u16 = 14;

/// Incremental RSI fed with close-to-close deltas
///
/// The first delta seeds both averages directly. Subsequent deltas update
/// them as `avg = (avg * (period - 1) + component) / period`.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: f64,
    avg_gain: f64,
    avg_loss: f64,
    initialized: bool,
}

impl Default for WilderRsi {
    fn default() -> Self {
        Self::new(RSI_PERIOD)
    }
}

impl WilderRsi {
    pub fn new(period: u16) -> Self {
        Self {
            period: f64::from(period.max(1)),
            avg_gain: 0.0,
            avg_loss: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, delta: f64) {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if !self.initialized {
            self.avg_gain = gain;
            self.avg_loss = loss;
            self.initialized = true;
            return;
        }

        self.avg_gain = (self.avg_gain * (self.period - 1.0) + gain) / self.period;
        self.avg_loss = (self.avg_loss * (self.period - 1.0) + loss) / self.period;
    }

    /// Current RSI in [0, 100], `None` before the first delta
    pub fn value(&self) -> Option<f64> {
        if !self.initialized {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_has_no_value() {
        let rsi = WilderRsi::default();
        assert_eq!(rsi.value(), None);
    }

    #[test]
    fn test_only_gains_is_exactly_100() {
        let mut rsi = WilderRsi::default();
        for _ in 0..30 {
            rsi.update(0.5);
        }
        assert_eq!(rsi.value(), Some(100.0));
    }

    #[test]
    fn test_flat_series_is_100() {
        let mut rsi = WilderRsi::default();
        rsi.update(0.0);
        assert_eq!(rsi.value(), Some(100.0));
    }

    #[test]
    fn test_only_losses_is_zero() {
        let mut rsi = WilderRsi::default();
        for _ in 0..5 {
            rsi.update(-1.0);
        }
        assert_eq!(rsi.value(), Some(0.0));
    }

    #[test]
    fn test_seed_then_smooth() {
        let mut rsi = WilderRsi::default();
        rsi.update(1.0);
        rsi.update(-1.0);
        // avg_gain = 13/14, avg_loss = 1/14, RS = 13
        let value = rsi.value().unwrap();
        assert!((value - (100.0 - 100.0 / 14.0)).abs() < 1e-9);
    }

    #[test]
    fn test_bounded_for_mixed_series() {
        let mut rsi = WilderRsi::default();
        for (i, d) in [1.2, -0.4, 3.0, -2.2, 0.0, -5.0, 0.7].iter().cycle().take(100).enumerate() {
            rsi.update(*d * (1.0 + i as f64 / 10.0));
            let v = rsi.value().unwrap();
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_reset() {
        let mut rsi = WilderRsi::default();
        rsi.update(2.0);
        rsi.reset();
        assert!(!rsi.is_initialized());
        assert_eq!(rsi.value(), None);
    }
}
