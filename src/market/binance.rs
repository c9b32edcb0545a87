//! Binance public klines client
//!
//! No API key required for public market data. Maps provider-level
//! failures onto the engine's error taxonomy: HTTP 429/418 becomes
//! `RateLimited`, unknown symbols become `SymbolNotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::market::MarketDataProvider;
use crate::Candle;

const DEFAULT_BASE_URL: &str = "https://api.binance.com/api/v3";

/// Maximum klines per request (Binance limit)
const MAX_KLINES_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone)]
pub struct BinanceProvider {
    client: Client,
    base_url: String,
}

impl Default for BinanceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at a different endpoint (mirrors, test servers)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self::with_client(client, base_url)
    }

    /// Use a caller-configured http client (timeouts, proxies)
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        BinanceProvider {
            client,
            base_url: base_url.into(),
        }
    }

    fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
        let ms = row.first()?.as_i64()?;
        let field = |idx: usize| row.get(idx)?.as_str()?.parse::<f64>().ok();

        Some(Candle {
            datetime: DateTime::<Utc>::from_timestamp_millis(ms)?,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        })
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    async fn fetch(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/klines", self.base_url);
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);

        debug!(symbol, interval, limit, "fetching klines");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Binance answers invalid symbols/intervals with a 400 and
            // error code -1121 / -1120 in the body
            if status.as_u16() == 400 {
                return Err(EngineError::SymbolNotFound(format!(
                    "{symbol} {interval}: {body}"
                )));
            }
            return Err(EngineError::Transport(format!("HTTP {status}: {body}")));
        }

        let raw: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("malformed kline payload: {e}")))?;

        let mut candles: Vec<Candle> = raw
            .iter()
            .filter_map(|row| Self::parse_kline(row))
            .collect();
        candles.sort_by_key(|c| c.datetime);

        Ok(candles)
    }
}
