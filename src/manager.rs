//! Deployment and lifecycle of paper-trading sessions
//!
//! The manager owns the in-memory registry of live sessions. Each
//! session sits behind its own lock so ticks for different symbols
//! never contend; the registry lock is held only to look sessions up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::session::PaperTradingSession;
use crate::store::Datastore;
use crate::strategies::StrategyParams;
use crate::{Candle, EquitySnapshot, ExecutionMode, SessionRecord, SessionStatus};

pub struct SessionManager {
    store: Arc<dyn Datastore>,
    registry: Mutex<HashMap<Uuid, Arc<Mutex<PaperTradingSession>>>>,
    persistence_retry: Option<(usize, Duration)>,
}

#[derive(Debug, Default)]
pub struct DeployReport {
    pub started: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Kelly-proportional capital split. Weights are the fractions
/// normalized by a leverage ratio that caps gross exposure at 1x:
/// if the fractions sum to at most 1 they are used as-is, otherwise
/// every allocation is scaled down by the sum.
pub fn kelly_allocations(fractions: &[f64], total_capital: f64) -> (f64, Vec<f64>) {
    let gross: f64 = fractions.iter().sum();
    let leverage = if gross > 1.0 { 1.0 / gross } else { 1.0 };
    let allocations = fractions
        .iter()
        .map(|f| f * leverage * total_capital)
        .collect();
    (leverage, allocations)
}

impl SessionManager {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        SessionManager {
            store,
            registry: Mutex::new(HashMap::new()),
            persistence_retry: None,
        }
    }

    /// Persistence retry tuning applied to every session this manager
    /// creates; sessions keep their built-in defaults otherwise.
    pub fn with_persistence_retry(mut self, attempts: usize, backoff: Duration) -> Self {
        self.persistence_retry = Some((attempts, backoff));
        self
    }

    pub fn store(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.store)
    }

    /// Deploy one strategy into a live session with the given capital.
    pub fn deploy(
        &self,
        strategy_id: Uuid,
        capital: f64,
        mode: ExecutionMode,
    ) -> Result<Uuid> {
        self.deploy_weighted(strategy_id, capital, 1.0, mode)
    }

    fn deploy_weighted(
        &self,
        strategy_id: Uuid,
        capital: f64,
        weight: f64,
        mode: ExecutionMode,
    ) -> Result<Uuid> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(EngineError::Validation(format!(
                "initial capital must be positive, got {capital}"
            )));
        }
        let strategy = self.store.get_strategy(strategy_id)?;

        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            strategy_id,
            symbol: strategy.symbol.clone(),
            interval: strategy.interval.clone(),
            initial_capital: capital,
            entry_equity: None,
            current_equity: capital,
            current_position: 0.0,
            entry_price: None,
            status: SessionStatus::Active,
            execution_mode: mode,
            allocated_weight: weight,
            created_at: now,
            last_update: now,
        };
        self.store.insert_session(&record)?;
        // The portfolio rollup only sees sessions with equity history, so
        // a flat session must start with a snapshot of its capital.
        self.store.append_snapshot(&EquitySnapshot {
            session_id: record.id,
            equity: capital,
            timestamp: now,
        })?;

        let session_id = record.id;
        let session = self.build_session(record, strategy.params);
        self.register(session);
        info!(
            %session_id,
            %strategy_id,
            symbol = %strategy.symbol,
            capital,
            %mode,
            "deployed session"
        );
        Ok(session_id)
    }

    /// Deploy several strategies at once, splitting `total_capital` by
    /// each strategy's Kelly fraction. One bad strategy does not abort
    /// the rest.
    pub fn deploy_bulk(
        &self,
        strategy_ids: &[Uuid],
        total_capital: f64,
        mode: ExecutionMode,
    ) -> Result<DeployReport> {
        if strategy_ids.is_empty() {
            return Err(EngineError::Validation(
                "bulk deploy requires at least one strategy".into(),
            ));
        }
        if !total_capital.is_finite() || total_capital <= 0.0 {
            return Err(EngineError::Validation(format!(
                "total capital must be positive, got {total_capital}"
            )));
        }

        let mut fractions = Vec::with_capacity(strategy_ids.len());
        for &id in strategy_ids {
            let fraction = match self.store.get_strategy(id) {
                Ok(s) => s.kelly_fraction.max(0.0),
                Err(e) => {
                    warn!(strategy = %id, error = %e, "skipping unknown strategy");
                    fractions.push(None);
                    continue;
                }
            };
            fractions.push(Some(fraction));
        }

        let known: Vec<f64> = fractions.iter().filter_map(|f| *f).collect();
        if known.iter().all(|f| *f == 0.0) {
            // Nothing allocatable; report every id instead of failing the batch
            let mut report = DeployReport::default();
            for (&id, fraction) in strategy_ids.iter().zip(fractions.iter()) {
                let reason = match fraction {
                    None => "strategy not found",
                    Some(_) => "zero Kelly allocation",
                };
                report.failed.push((id, reason.into()));
            }
            return Ok(report);
        }
        let (leverage, allocations) = kelly_allocations(&known, total_capital);

        let mut report = DeployReport::default();
        let mut alloc_iter = allocations.into_iter().zip(known.iter());
        for (&id, fraction) in strategy_ids.iter().zip(fractions.iter()) {
            let Some(fraction) = fraction else {
                report.failed.push((id, "strategy not found".into()));
                continue;
            };
            let (capital, _) = alloc_iter.next().expect("allocation per known strategy");
            if capital <= 0.0 {
                report
                    .failed
                    .push((id, "zero Kelly allocation".into()));
                continue;
            }
            match self.deploy_weighted(id, capital, fraction * leverage, mode) {
                Ok(session_id) => report.started.push(session_id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Pre-fill a live session's strategy window from history.
    pub fn seed_session(&self, session_id: Uuid, candles: &[Candle]) -> Result<()> {
        let session = self.lookup(session_id)?;
        let mut guard = session.lock().expect("session lock poisoned");
        guard.seed(candles);
        Ok(())
    }

    /// The trailing candle window a live session is tracking.
    pub fn session_window(&self, session_id: Uuid) -> Result<Vec<Candle>> {
        let session = self.lookup(session_id)?;
        let guard = session.lock().expect("session lock poisoned");
        Ok(guard.window())
    }

    pub fn stop(&self, session_id: Uuid) -> Result<()> {
        let maybe = {
            let registry = self.registry.lock().expect("registry lock poisoned");
            registry.get(&session_id).map(Arc::clone)
        };
        match maybe {
            Some(session) => {
                session
                    .lock()
                    .expect("session lock poisoned")
                    .stop()?;
                self.registry
                    .lock()
                    .expect("registry lock poisoned")
                    .remove(&session_id);
                Ok(())
            }
            // Not live in this process; flip the stored status directly
            None => self
                .store
                .set_session_status(session_id, SessionStatus::Stopped),
        }
    }

    /// Stop every active session, both in-process and any rows left
    /// active by a previous process. Returns the number stopped.
    pub fn reset_all(&self) -> Result<usize> {
        let live: Vec<Arc<Mutex<PaperTradingSession>>> = {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            registry.drain().map(|(_, s)| s).collect()
        };
        let mut stopped = 0usize;
        for session in live {
            session.lock().expect("session lock poisoned").stop()?;
            stopped += 1;
        }
        for record in self.store.active_sessions()? {
            self.store
                .set_session_status(record.id, SessionStatus::Stopped)?;
            stopped += 1;
        }
        info!(stopped, "reset all sessions");
        Ok(stopped)
    }

    /// Rebuild the live registry from sessions stored as active. Used
    /// at startup so a restart resumes where the last run left off.
    pub fn restore(&self) -> Result<usize> {
        let records = self.store.active_sessions()?;
        let mut restored = 0usize;
        for record in records {
            let strategy = match self.store.get_strategy(record.strategy_id) {
                Ok(s) => s,
                Err(e) => {
                    warn!(session = %record.id, error = %e, "cannot restore session");
                    continue;
                }
            };
            let session = self.build_session(record, strategy.params);
            self.register(session);
            restored += 1;
        }
        info!(restored, "restored sessions from store");
        Ok(restored)
    }

    /// Feed one candle to every live session trading the symbol and
    /// interval. Sessions are ticked outside the registry lock.
    pub fn tick_symbol(&self, symbol: &str, interval: &str, candle: &Candle) -> Result<()> {
        let matching: Vec<Arc<Mutex<PaperTradingSession>>> = {
            let registry = self.registry.lock().expect("registry lock poisoned");
            registry
                .values()
                .filter(|s| {
                    let guard = s.lock().expect("session lock poisoned");
                    guard.record().symbol == symbol && guard.record().interval == interval
                })
                .map(Arc::clone)
                .collect()
        };
        for session in matching {
            session
                .lock()
                .expect("session lock poisoned")
                .tick(candle)?;
        }
        Ok(())
    }

    /// Distinct (symbol, interval) pairs across live sessions; this is
    /// the polling work list for the run loop.
    pub fn active_feeds(&self) -> Vec<(String, String)> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        let mut feeds: Vec<(String, String)> = registry
            .values()
            .filter_map(|s| {
                let guard = s.lock().expect("session lock poisoned");
                if guard.is_active() {
                    Some((
                        guard.record().symbol.clone(),
                        guard.record().interval.clone(),
                    ))
                } else {
                    None
                }
            })
            .collect();
        feeds.sort();
        feeds.dedup();
        feeds
    }

    pub fn live_count(&self) -> usize {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .len()
    }

    fn build_session(&self, record: SessionRecord, params: StrategyParams) -> PaperTradingSession {
        let session = PaperTradingSession::new(record, params, Arc::clone(&self.store));
        match self.persistence_retry {
            Some((attempts, backoff)) => session.with_persistence_retry(attempts, backoff),
            None => session,
        }
    }

    fn register(&self, session: PaperTradingSession) {
        let id = session.id();
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .insert(id, Arc::new(Mutex::new(session)));
    }

    fn lookup(&self, session_id: Uuid) -> Result<Arc<Mutex<PaperTradingSession>>> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .get(&session_id)
            .map(Arc::clone)
            .ok_or(EngineError::SessionNotFound(session_id))
    }
}
