//! Market data collaborators
//!
//! The engine only depends on the `MarketDataProvider` contract; the
//! bundled Binance client is the default implementation. Transport
//! concerns (pagination, authentication) stay behind this seam.

pub mod binance;

use async_trait::async_trait;

use crate::error::Result;
use crate::Candle;

pub use binance::BinanceProvider;

/// Interval codes accepted by the bundled provider
pub const INTERVALS: &[&str] = &[
    "1m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "1d", "3d", "1w",
];

/// Supplies ordered OHLCV candles for a symbol and interval.
///
/// Implementations fail with `SymbolNotFound` for unknown pairs and
/// `RateLimited` when the upstream throttles; both are per-item errors
/// that batch callers skip rather than abort on.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;
}
