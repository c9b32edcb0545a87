//! Strategy optimizer and paper-trading engine
//!
//! The pipeline runs in three stages. The optimizer searches randomized
//! strategy parameterizations against exchange history and persists the
//! best performers with their backtest scorecards. The session manager
//! deploys persisted strategies into live paper-trading sessions, with
//! Kelly-proportional capital splits for bulk deployments. A polling
//! loop feeds live candles to the sessions, which trade simulated
//! positions and record every fill, while the portfolio rollup and risk
//! module aggregate session equity into portfolio-level measures.
//!
//! All durable state sits behind the [`store::Datastore`] traits, backed
//! by SQLite. Market data comes through [`market::MarketDataProvider`],
//! paced by a shared [`common::RequestGate`].

pub mod backtest;
pub mod common;
pub mod config;
pub mod error;
pub mod indicators;
pub mod manager;
pub mod market;
pub mod optimizer;
pub mod portfolio;
pub mod risk;
pub mod session;
pub mod store;
pub mod strategies;
pub mod types;

pub use backtest::{BacktestResult, Backtester};
pub use common::{RequestGate, RequestGateConfig};
pub use config::AppConfig;
pub use error::{EngineError, Result};
pub use manager::{DeployReport, SessionManager};
pub use market::{BinanceProvider, MarketDataProvider};
pub use optimizer::{GenerateReport, GenerateRequest, StrategyOptimizer};
pub use session::PaperTradingSession;
pub use store::{Datastore, SqliteStore};
pub use types::{
    Candle, EquitySnapshot, ExecutionMode, PerformanceMetrics, PortfolioPoint, SessionRecord,
    SessionStatus, Side, Signal, StrategyRecord, TradeRecord,
};
