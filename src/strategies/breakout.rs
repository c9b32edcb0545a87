//! Range breakout
//!
//! Buys when the close clears the prior N-bar high, sells when it breaks
//! the prior N-bar low. The current bar is excluded from the range so a
//! candle cannot break out of itself.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::indicators::{rolling_max, rolling_min};
use crate::{Candle, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakoutParams {
    pub lookback: usize,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self { lookback: 20 }
    }
}

impl BreakoutParams {
    pub fn min_window(&self) -> usize {
        self.lookback + 1
    }

    fn range(&self, window: &[Candle]) -> Option<(f64, f64)> {
        if window.len() < self.min_window() {
            return None;
        }
        let prior = &window[..window.len() - 1];
        let highs: Vec<f64> = prior.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = prior.iter().map(|c| c.low).collect();

        let upper = rolling_max(&highs, self.lookback).last().copied().flatten()?;
        let lower = rolling_min(&lows, self.lookback).last().copied().flatten()?;
        Some((upper, lower))
    }

    pub fn evaluate(&self, window: &[Candle]) -> Signal {
        let last_close = match window.last() {
            Some(c) => c.close,
            None => return Signal::Hold,
        };

        match self.range(window) {
            Some((upper, _)) if last_close > upper => Signal::Buy,
            Some((_, lower)) if last_close < lower => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn explain(&self, window: &[Candle]) -> String {
        let last_close = window.last().map(|c| c.close).unwrap_or(0.0);
        match self.range(window) {
            Some((upper, lower)) => format!(
                "close {:.4} vs {}-bar range [{:.4}, {:.4}]",
                last_close, self.lookback, lower, upper
            ),
            None => "insufficient window for breakout range".to_string(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            lookback: rng.gen_range(10..=60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn flat_then_spike(len: usize, spike: f64) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(len as i64);
        (0..len)
            .map(|i| {
                let close = if i == len - 1 { spike } else { 100.0 };
                Candle {
                    datetime: start + Duration::hours(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn upside_break_signals_buy() {
        let params = BreakoutParams { lookback: 10 };
        let candles = flat_then_spike(12, 110.0);
        assert_eq!(params.evaluate(&candles), Signal::Buy);
    }

    #[test]
    fn downside_break_signals_sell() {
        let params = BreakoutParams { lookback: 10 };
        let candles = flat_then_spike(12, 90.0);
        assert_eq!(params.evaluate(&candles), Signal::Sell);
    }

    #[test]
    fn inside_range_holds() {
        let params = BreakoutParams { lookback: 10 };
        let candles = flat_then_spike(12, 100.5);
        assert_eq!(params.evaluate(&candles), Signal::Hold);
    }
}
