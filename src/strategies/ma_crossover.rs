//! Moving-average crossover
//!
//! Long while the fast SMA sits above the slow SMA, short while below.
//! The classic trend-following baseline.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::indicators::sma;
use crate::{Candle, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaCrossoverParams {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 26,
        }
    }
}

impl MaCrossoverParams {
    pub fn min_window(&self) -> usize {
        self.slow_period + 1
    }

    fn averages(&self, window: &[Candle]) -> Option<(f64, f64)> {
        let close: Vec<f64> = window.iter().map(|c| c.close).collect();
        let fast = sma(&close, self.fast_period).last().copied().flatten()?;
        let slow = sma(&close, self.slow_period).last().copied().flatten()?;
        Some((fast, slow))
    }

    pub fn evaluate(&self, window: &[Candle]) -> Signal {
        match self.averages(window) {
            Some((fast, slow)) if fast > slow => Signal::Buy,
            Some((fast, slow)) if fast < slow => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn explain(&self, window: &[Candle]) -> String {
        match self.averages(window) {
            Some((fast, slow)) => format!(
                "SMA({}) {:.4} vs SMA({}) {:.4}",
                self.fast_period, fast, self.slow_period, slow
            ),
            None => "insufficient window for moving averages".to_string(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let fast_period = rng.gen_range(3..=20);
        let slow_period = rng.gen_range((fast_period + 5)..=60);
        Self {
            fast_period,
            slow_period,
        }
    }
}
