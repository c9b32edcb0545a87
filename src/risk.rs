//! Portfolio risk assessment over the cached equity history
//!
//! All measures are computed from the portfolio time series, not from
//! individual sessions, so hedged exposure nets out before it is scored.

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::PortfolioPoint;

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioRisk {
    pub max_drawdown_pct: f64,
    pub volatility_pct: f64,
    /// Historical one-step value at risk, in equity units (negative
    /// means a loss at the chosen confidence)
    pub value_at_risk: f64,
    pub confidence: f64,
    pub samples: usize,
}

/// Peak-to-trough decline over the curve, as a percentage of the peak.
pub fn max_drawdown_pct(curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &value in curve {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Standard deviation of step-over-step fractional returns, in percent.
/// Returns 0 for curves too short to produce two returns.
pub fn volatility_pct(curve: &[f64]) -> f64 {
    let returns: Vec<f64> = curve
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(&returns) * 100.0
}

/// Historical VaR over first differences of the equity curve. The
/// deltas are sorted ascending and the value at index
/// `floor((1 - confidence) * n)` is returned; fewer than two equity
/// samples yield 0.
pub fn value_at_risk(curve: &[f64], confidence: f64) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let mut deltas: Vec<f64> = curve.windows(2).map(|w| w[1] - w[0]).collect();
    deltas.sort_by(|a, b| a.partial_cmp(b).expect("equity deltas must be comparable"));
    let index = ((1.0 - confidence) * deltas.len() as f64).floor() as usize;
    deltas[index.min(deltas.len() - 1)]
}

/// Score the whole portfolio history at the given confidence level.
pub fn assess(history: &[PortfolioPoint], confidence: f64) -> PortfolioRisk {
    let curve: Vec<f64> = history.iter().map(|p| p.total_equity).collect();
    PortfolioRisk {
        max_drawdown_pct: max_drawdown_pct(&curve),
        volatility_pct: volatility_pct(&curve),
        value_at_risk: value_at_risk(&curve, confidence),
        confidence,
        samples: curve.len(),
    }
}
