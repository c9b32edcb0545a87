//! Core data types shared across the optimizer and paper-trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategies::StrategyParams;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Per-tick directional output of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Target direction: +1 long, -1 short, 0 no directional opinion
    pub fn direction(self) -> i8 {
        match self {
            Signal::Buy => 1,
            Signal::Sell => -1,
            Signal::Hold => 0,
        }
    }
}

/// Trade direction as recorded on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

/// Performance metrics produced by a backtest run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe: f64,
    pub win_rate: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub trade_count: usize,
    pub profit_factor: f64,
}

/// A persisted strategy: parameterization plus its backtest scorecard.
/// Immutable once created, except by explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: Uuid,
    pub name: String,
    pub symbol: String,
    pub interval: String,
    pub params: StrategyParams,
    pub metrics: PerformanceMetrics,
    /// Downsampled equity curve kept for charting; replayable, not restartable
    pub backtest_curve: Vec<f64>,
    /// Fraction of capital the strategy's estimated edge justifies, in [0, 1]
    pub kelly_fraction: f64,
    pub created_at: DateTime<Utc>,
}

impl StrategyRecord {
    pub fn strategy_type(&self) -> &'static str {
        self.params.kind().name()
    }
}

/// Session lifecycle state. Stopped is terminal: resuming requires a
/// fresh session, not a status flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "stopped" => Ok(SessionStatus::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// How a session turns signals into fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Act on the signal on the same tick it is observed
    Sync,
    /// Require the signal to change across two consecutive ticks before
    /// entering, suppressing single-tick whipsaw
    Edge,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Edge => write!(f, "edge"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecutionMode::Sync),
            "edge" => Ok(ExecutionMode::Edge),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Mutable per-session state, owned exclusively by its PaperTradingSession
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub symbol: String,
    pub interval: String,
    pub initial_capital: f64,
    /// Equity basis at the moment the open position was entered
    pub entry_equity: Option<f64>,
    pub current_equity: f64,
    /// Signed size: positive = long, negative = short, zero = flat
    pub current_position: f64,
    pub entry_price: Option<f64>,
    pub status: SessionStatus,
    pub execution_mode: ExecutionMode,
    /// Fraction of portfolio capital this session represents
    pub allocated_weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_flat(&self) -> bool {
        self.current_position.abs() < f64::EPSILON
    }

    /// Mark-to-market equity for a given price while a position is open
    pub fn marked_equity(&self, price: f64) -> f64 {
        match (self.entry_price, self.entry_equity) {
            (Some(entry), Some(basis)) if !self.is_flat() => {
                basis + (price - entry) * self.current_position
            }
            _ => self.current_equity,
        }
    }
}

/// Immutable, append-only trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// None for entries; populated when realizing a position
    pub pnl: Option<f64>,
    /// Human-readable explanation of the triggering signal
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Periodic equity sample for charting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub session_id: Uuid,
    pub equity: f64,
    pub timestamp: DateTime<Utc>,
}

/// One materialized point of the portfolio-level equity rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPoint {
    pub timestamp: DateTime<Utc>,
    pub total_equity: f64,
}
