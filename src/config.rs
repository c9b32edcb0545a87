//! Runtime configuration
//!
//! Defaults work out of the box; a JSON config file and a couple of
//! environment variables override them. Environment wins over file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::common::RequestGateConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub provider: ProviderConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub max_in_flight: usize,
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between live polling cycles
    pub poll_interval_secs: u64,
    pub persist_retry_attempts: usize,
    pub persist_retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: "papertrader.db".to_string(),
            provider: ProviderConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://api.binance.com/api/v3".to_string(),
            max_in_flight: 4,
            min_interval_ms: 100,
            timeout_secs: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval_secs: 60,
            persist_retry_attempts: 4,
            persist_retry_backoff_ms: 50,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid by the config file if present, then by
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => AppConfig::default(),
        };

        if let Ok(db) = std::env::var("PAPERTRADER_DB") {
            config.database_path = db;
        }
        if let Ok(url) = std::env::var("PAPERTRADER_API_URL") {
            config.provider.base_url = url;
        }
        debug!(db = %config.database_path, api = %config.provider.base_url, "configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Validation(format!("invalid config: {e}")))?;
        Ok(config)
    }

    pub fn gate_config(&self) -> RequestGateConfig {
        RequestGateConfig {
            max_in_flight: self.provider.max_in_flight,
            min_interval: Duration::from_millis(self.provider.min_interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.engine.poll_interval_secs)
    }

    /// Retry attempts and initial backoff for store writes
    pub fn persistence_retry(&self) -> (usize, Duration) {
        (
            self.engine.persist_retry_attempts,
            Duration::from_millis(self.engine.persist_retry_backoff_ms),
        )
    }
}
