//! Backtesting engine
//!
//! Replays an ordered candle sequence through one strategy
//! parameterization and produces an equity curve plus performance
//! metrics.
//!
//! Execution price policy: a signal observed on candle T fills at candle
//! T+1's open. Filling at the next open avoids lookahead bias; this is a
//! deliberate policy choice, not a market model. Any position still open
//! after the last candle is closed at that candle's close.

use statrs::statistics::Statistics;

use crate::error::{EngineError, Result};
use crate::strategies::StrategyParams;
use crate::{Candle, PerformanceMetrics};

/// One realized round trip inside a backtest
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// +1 long, -1 short
    pub direction: i8,
    pub pnl: f64,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    /// One mark-to-market sample per candle; the final sample is realized
    pub equity_curve: Vec<f64>,
    pub trades: Vec<ClosedTrade>,
    pub metrics: PerformanceMetrics,
    /// Fractional-Kelly edge estimate derived from the realized trades
    pub kelly_fraction: f64,
}

pub struct Backtester {
    initial_capital: f64,
}

impl Backtester {
    pub fn new(initial_capital: f64) -> Self {
        Backtester { initial_capital }
    }

    pub fn run(&self, candles: &[Candle], params: &StrategyParams) -> Result<BacktestResult> {
        let min_window = params.min_window();
        // One extra candle so at least one signal can fill at a next open
        let required = min_window + 1;
        if candles.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                available: candles.len(),
            });
        }

        let mut equity = self.initial_capital;
        let mut position = 0.0_f64; // signed quantity
        let mut entry_price = 0.0_f64;
        let mut entry_equity = equity;
        let mut pending: Option<i8> = None;
        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut equity_curve: Vec<f64> = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            // Fill the signal queued on the previous candle at this open
            if let Some(direction) = pending.take() {
                let fill = candle.open;
                if position != 0.0 {
                    equity += realize(&mut trades, position, entry_price, fill);
                }
                let quantity = equity / fill;
                position = f64::from(direction) * quantity;
                entry_price = fill;
                entry_equity = equity;
            }

            let marked = if position != 0.0 {
                entry_equity + (candle.close - entry_price) * position
            } else {
                equity
            };
            equity_curve.push(marked);

            // Evaluate the trailing window; queue a fill for the next open
            // when the directional opinion differs from current exposure.
            if i + 1 >= min_window && i + 1 < candles.len() {
                let window = &candles[i + 1 - min_window..=i];
                let direction = params.evaluate(window).direction();
                if direction != 0 && f64::from(direction) != position.signum() {
                    pending = Some(direction);
                }
            }
        }

        // Settle whatever is still open at the final close
        if position != 0.0 {
            let last_close = candles[candles.len() - 1].close;
            equity += realize(&mut trades, position, entry_price, last_close);
            if let Some(last) = equity_curve.last_mut() {
                *last = equity;
            }
        }

        let metrics = compute_metrics(self.initial_capital, &equity_curve, &trades);
        let kelly_fraction = kelly_fraction(&trades);

        Ok(BacktestResult {
            equity_curve,
            trades,
            metrics,
            kelly_fraction,
        })
    }
}

fn realize(trades: &mut Vec<ClosedTrade>, position: f64, entry_price: f64, exit_price: f64) -> f64 {
    let pnl = (exit_price - entry_price) * position;
    trades.push(ClosedTrade {
        entry_price,
        exit_price,
        quantity: position.abs(),
        direction: if position > 0.0 { 1 } else { -1 },
        pnl,
    });
    pnl
}

fn compute_metrics(
    initial_capital: f64,
    equity_curve: &[f64],
    trades: &[ClosedTrade],
) -> PerformanceMetrics {
    let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
    let total_return_pct = (final_equity - initial_capital) / initial_capital * 100.0;

    let mut peak = f64::NEG_INFINITY;
    let mut max_drawdown_pct = 0.0_f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            if dd > max_drawdown_pct {
                max_drawdown_pct = dd;
            }
        }
    }

    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins as f64 / trades.len() as f64 * 100.0
    };

    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let sharpe = if returns.len() > 1 {
        let mean = Statistics::mean(&returns);
        let stdev = Statistics::std_dev(&returns);
        if stdev > 0.0 && stdev.is_finite() {
            mean / stdev
        } else {
            0.0
        }
    } else {
        0.0
    };

    PerformanceMetrics {
        sharpe,
        win_rate,
        total_return_pct,
        max_drawdown_pct,
        trade_count: trades.len(),
        profit_factor,
    }
}

/// Kelly criterion on realized trades: `w - (1 - w) / payoff_ratio`,
/// clamped to [0, 1]. Taken as a fixed edge estimate downstream, never
/// re-estimated adaptively.
fn kelly_fraction(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }

    let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .collect();

    let w = wins.len() as f64 / trades.len() as f64;
    if losses.is_empty() {
        return w.clamp(0.0, 1.0);
    }
    if wins.is_empty() {
        return 0.0;
    }

    let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
    let avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
    let payoff = avg_win / avg_loss;

    (w - (1.0 - w) / payoff).clamp(0.0, 1.0)
}
