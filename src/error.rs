//! Error taxonomy for the optimizer and paper-trading engine
//!
//! Per-item failures (bad symbol, thin history) are recoverable and are
//! collected into batch reports instead of aborting the batch. Validation
//! and persistence failures are surfaced to the caller directly.

use thiserror::Error;
use uuid::Uuid;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The market-data provider does not know the symbol/interval pair
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// The market-data provider throttled us
    #[error("rate limited by market data provider")]
    RateLimited,

    /// Transport-level failure talking to the provider
    #[error("market data transport error: {0}")]
    Transport(String),

    /// Not enough candle history for the strategy's minimum window
    #[error("insufficient candle history: need {required}, have {available}")]
    InsufficientData { required: usize, available: usize },

    /// Request rejected before any work started
    #[error("validation error: {0}")]
    Validation(String),

    /// Datastore failure (after retries, where retries apply)
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("strategy not found: {0}")]
    StrategyNotFound(Uuid),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
}

impl EngineError {
    /// True for the per-item data-fetch family: these skip an item in a
    /// batch rather than failing the whole run.
    pub fn is_data_fetch(&self) -> bool {
        matches!(
            self,
            EngineError::SymbolNotFound(_) | EngineError::RateLimited | EngineError::Transport(_)
        )
    }

    /// True for transient failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::RateLimited | EngineError::Persistence(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(format!("serialization: {e}"))
    }
}
