//! RSI mean reversion
//!
//! Buys oversold, sells overbought, holds the middle of the range.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::indicators::rsi;
use crate::{Candle, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionParams {
    pub rsi_period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

impl MeanReversionParams {
    pub fn min_window(&self) -> usize {
        self.rsi_period + 1
    }

    fn latest_rsi(&self, window: &[Candle]) -> Option<f64> {
        let close: Vec<f64> = window.iter().map(|c| c.close).collect();
        rsi(&close, self.rsi_period).last().copied().flatten()
    }

    pub fn evaluate(&self, window: &[Candle]) -> Signal {
        match self.latest_rsi(window) {
            Some(value) if value < self.oversold => Signal::Buy,
            Some(value) if value > self.overbought => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn explain(&self, window: &[Candle]) -> String {
        match self.latest_rsi(window) {
            Some(value) => format!(
                "RSI({}) {:.2} vs bands [{:.0}, {:.0}]",
                self.rsi_period, value, self.oversold, self.overbought
            ),
            None => "insufficient window for RSI".to_string(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            rsi_period: rng.gen_range(7..=28),
            oversold: rng.gen_range(15.0..=35.0),
            overbought: rng.gen_range(65.0..=85.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                datetime: start + Duration::hours(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn steady_selloff_signals_buy() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - 2.0 * i as f64).collect();
        let params = MeanReversionParams::default();
        assert_eq!(params.evaluate(&candles_from_closes(&closes)), Signal::Buy);
    }

    #[test]
    fn steady_rally_signals_sell() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + 2.0 * i as f64).collect();
        let params = MeanReversionParams::default();
        assert_eq!(params.evaluate(&candles_from_closes(&closes)), Signal::Sell);
    }

    #[test]
    fn sampled_bands_do_not_overlap() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let p = MeanReversionParams::sample(&mut rng);
            assert!(p.oversold < p.overbought);
        }
    }
}
