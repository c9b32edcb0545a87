//! Strategy families
//!
//! Strategies are a closed tagged variant: each family carries its own
//! typed parameter record and exposes a single capability, evaluating a
//! trailing candle window into a directional signal. No shared base
//! machinery beyond that.

pub mod breakout;
pub mod ma_crossover;
pub mod mean_reversion;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Candle, Signal};

pub use breakout::BreakoutParams;
pub use ma_crossover::MaCrossoverParams;
pub use mean_reversion::MeanReversionParams;

/// The closed set of strategy families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    MaCrossover,
    Breakout,
    MeanReversion,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::MaCrossover,
        StrategyKind::Breakout,
        StrategyKind::MeanReversion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::MaCrossover => "ma_crossover",
            StrategyKind::Breakout => "breakout",
            StrategyKind::MeanReversion => "mean_reversion",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ma_crossover" => Ok(StrategyKind::MaCrossover),
            "breakout" => Ok(StrategyKind::Breakout),
            "mean_reversion" => Ok(StrategyKind::MeanReversion),
            other => Err(format!("unknown strategy type: {other}")),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Variant-specific parameter record, tagged for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyParams {
    MaCrossover(MaCrossoverParams),
    Breakout(BreakoutParams),
    MeanReversion(MeanReversionParams),
}

impl StrategyParams {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyParams::MaCrossover(_) => StrategyKind::MaCrossover,
            StrategyParams::Breakout(_) => StrategyKind::Breakout,
            StrategyParams::MeanReversion(_) => StrategyKind::MeanReversion,
        }
    }

    /// Minimum trailing window length needed before signals are meaningful
    pub fn min_window(&self) -> usize {
        match self {
            StrategyParams::MaCrossover(p) => p.min_window(),
            StrategyParams::Breakout(p) => p.min_window(),
            StrategyParams::MeanReversion(p) => p.min_window(),
        }
    }

    /// Evaluate the trailing window into a directional signal.
    /// Returns Hold when the window is shorter than `min_window`.
    pub fn evaluate(&self, window: &[Candle]) -> Signal {
        if window.len() < self.min_window() {
            return Signal::Hold;
        }
        match self {
            StrategyParams::MaCrossover(p) => p.evaluate(window),
            StrategyParams::Breakout(p) => p.evaluate(window),
            StrategyParams::MeanReversion(p) => p.evaluate(window),
        }
    }

    /// Human-readable explanation of the latest signal, recorded on trades
    pub fn explain(&self, window: &[Candle]) -> String {
        match self {
            StrategyParams::MaCrossover(p) => p.explain(window),
            StrategyParams::Breakout(p) => p.explain(window),
            StrategyParams::MeanReversion(p) => p.explain(window),
        }
    }

    /// Textbook parameterization for a strategy family
    pub fn default_for(kind: StrategyKind) -> StrategyParams {
        match kind {
            StrategyKind::MaCrossover => StrategyParams::MaCrossover(MaCrossoverParams::default()),
            StrategyKind::Breakout => StrategyParams::Breakout(BreakoutParams::default()),
            StrategyKind::MeanReversion => {
                StrategyParams::MeanReversion(MeanReversionParams::default())
            }
        }
    }

    /// Draw one random candidate parameterization for the optimizer search
    pub fn sample<R: Rng + ?Sized>(kind: StrategyKind, rng: &mut R) -> StrategyParams {
        match kind {
            StrategyKind::MaCrossover => {
                StrategyParams::MaCrossover(MaCrossoverParams::sample(rng))
            }
            StrategyKind::Breakout => StrategyParams::Breakout(BreakoutParams::sample(rng)),
            StrategyKind::MeanReversion => {
                StrategyParams::MeanReversion(MeanReversionParams::sample(rng))
            }
        }
    }
}
