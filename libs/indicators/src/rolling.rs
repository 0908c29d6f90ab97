//! Fixed-capacity rolling window with O(1) mean and sample variance
//!
//! Statistics are maintained with Welford's recurrence. When the window is
//! full the oldest sample is first removed with the inverse recurrence and
//! the new sample is then added, so no operation ever rescans the buffer.

use crate::error::WindowError;
use std::num::NonZeroUsize;

/// Standard deviations at or below this are treated as zero dispersion
pub const Z_EPSILON: f64 = 0.0001;

/// Circular buffer of the `capacity` most recent samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buffer: Vec<f64>,
    capacity: usize,
    /// Index of the oldest sample once the buffer is full
    head: usize,
    mean: f64,
    m2: f64,
}

impl RollingWindow {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Fallible constructor for runtime-provided capacities
    pub fn try_new(capacity: usize) -> Result<Self, WindowError> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or(WindowError::ZeroCapacity)
    }

    /// Insert a sample, evicting the oldest one when full
    pub fn add(&mut self, x: f64) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(x);
            self.push_stats(x);
            return;
        }

        let oldest = std::mem::replace(&mut self.buffer[self.head], x);
        self.head = (self.head + 1) % self.capacity;
        self.pop_stats(oldest);
        self.push_stats(x);
    }

    // Count already includes x.
    fn push_stats(&mut self, x: f64) {
        let n = self.buffer.len() as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    // Count still includes x; the buffer slot has already been overwritten.
    fn pop_stats(&mut self, x: f64) {
        let remaining = (self.buffer.len() - 1) as f64;
        if remaining == 0.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = x - self.mean;
        self.mean -= delta / remaining;
        self.m2 -= delta * (x - self.mean);
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Mean of the retained samples, NaN when empty
    pub fn mean(&self) -> f64 {
        if self.buffer.is_empty() {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample variance (N-1 denominator), NaN below two samples
    pub fn variance_sample(&self) -> f64 {
        let n = self.buffer.len();
        if n < 2 {
            f64::NAN
        } else {
            self.m2 / (n - 1) as f64
        }
    }

    /// Sample standard deviation, NaN below two samples
    pub fn std_sample(&self) -> f64 {
        self.variance_sample().sqrt()
    }

    /// Z-score of `x` against the window
    ///
    /// Returns 0 when the statistics are undefined or the deviation is at or
    /// below [`Z_EPSILON`]. Never NaN or infinite for finite `x`.
    pub fn z_score(&self, x: f64) -> f64 {
        let mean = self.mean();
        let std = self.std_sample();
        if mean.is_nan() || std.is_nan() || std <= Z_EPSILON {
            return 0.0;
        }
        (x - mean) / std
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }

    /// Retained samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (newer, older) = if self.is_full() {
            self.buffer.split_at(self.head)
        } else {
            self.buffer.split_at(0)
        };
        older.iter().chain(newer.iter()).copied()
    }
}
