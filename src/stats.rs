//! Constant-memory running statistics
//!
//! A [`RunningSummary`] keeps count, mean, min and max of a metric without
//! retaining samples. The mean is updated incrementally
//! (`mean += (x - mean) / n`) so long passes neither overflow a running sum
//! nor lose precision to it.

use serde::{Deserialize, Serialize};

/// Snapshot of one metric's summary as handed to presentation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Stat {
    /// Zero-filled value reported for a metric with no samples
    pub const EMPTY: Stat = Stat {
        count: 0,
        avg: 0.0,
        min: 0.0,
        max: 0.0,
    };

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for Stat {
    fn default() -> Self {
        Stat::EMPTY
    }
}

/// Incremental count/mean/min/max accumulator
#[derive(Debug, Clone, PartialEq)]
pub struct RunningSummary {
    count: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl Default for RunningSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningSummary {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Accept one sample. Non-finite values are rejected and leave the
    /// summary untouched; returns whether the sample was accepted.
    pub fn add(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }

        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        true
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current values, or [`Stat::EMPTY`] before the first sample
    pub fn snapshot(&self) -> Stat {
        if self.is_empty() {
            return Stat::EMPTY;
        }
        Stat {
            count: self.count,
            avg: self.mean,
            min: self.min,
            max: self.max,
        }
    }

    /// Return to the empty state
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
