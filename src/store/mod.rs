//! Durable state behind narrow trait seams
//!
//! Components depend on these traits, not on SQLite. Trade and equity
//! writes are critical for downstream equity reconciliation, so callers
//! wrap them in `with_retry`.

pub mod sqlite;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::{
    EquitySnapshot, PortfolioPoint, SessionRecord, SessionStatus, StrategyRecord, TradeRecord,
};

pub use sqlite::SqliteStore;

pub trait StrategyStore: Send + Sync {
    fn insert_strategy(&self, record: &StrategyRecord) -> Result<()>;
    fn list_strategies(&self) -> Result<Vec<StrategyRecord>>;
    fn get_strategy(&self, id: Uuid) -> Result<StrategyRecord>;
    fn delete_strategy(&self, id: Uuid) -> Result<()>;
    fn delete_all_strategies(&self) -> Result<()>;
}

pub trait SessionStore: Send + Sync {
    fn insert_session(&self, record: &SessionRecord) -> Result<()>;
    fn update_session(&self, record: &SessionRecord) -> Result<()>;
    fn get_session(&self, id: Uuid) -> Result<SessionRecord>;
    fn list_sessions(&self) -> Result<Vec<SessionRecord>>;
    fn active_sessions(&self) -> Result<Vec<SessionRecord>>;
    fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<()>;
}

/// Append-only trade history; records are never mutated or deleted
pub trait TradeLedger: Send + Sync {
    fn append_trade(&self, trade: &TradeRecord) -> Result<()>;
    fn trades_for_session(&self, session_id: Uuid) -> Result<Vec<TradeRecord>>;
}

pub trait EquityStore: Send + Sync {
    fn append_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()>;
    fn snapshots_for_session(&self, session_id: Uuid) -> Result<Vec<EquitySnapshot>>;
    /// All snapshots across sessions, ordered by timestamp ascending
    fn all_snapshots(&self) -> Result<Vec<EquitySnapshot>>;
}

pub trait PortfolioStore: Send + Sync {
    fn replace_portfolio_cache(&self, points: &[PortfolioPoint]) -> Result<()>;
    fn portfolio_history(&self, since: DateTime<Utc>) -> Result<Vec<PortfolioPoint>>;
}

/// Everything the engine persists, behind one object-safe seam
pub trait Datastore:
    StrategyStore + SessionStore + TradeLedger + EquityStore + PortfolioStore
{
}

impl<T> Datastore for T where
    T: StrategyStore + SessionStore + TradeLedger + EquityStore + PortfolioStore
{
}

/// Retry a persistence operation with exponential backoff. Only
/// transient errors are retried; anything else surfaces immediately.
pub fn with_retry<T>(
    attempts: usize,
    initial_backoff: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut backoff = initial_backoff;
    let mut last_err = None;

    for attempt in 1..=attempts.max(1) {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(attempt, error = %e, "transient persistence failure, retrying");
                std::thread::sleep(backoff);
                backoff *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.expect("with_retry requires at least one attempt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(3, Duration::from_millis(1), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::Persistence("busy".into()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_exhausting_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Persistence("down".into()))
        });

        assert!(matches!(result, Err(EngineError::Persistence(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Validation("bad".into()))
        });

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
