//! Paper-trading session state machine
//!
//! One session replays a single strategy against live candles, owning
//! its mutable state exclusively: a tick mutates position and equity,
//! appends trades and snapshots, and nothing else touches the record.
//! Stopped is terminal; a stopped session ignores every further tick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{with_retry, Datastore};
use crate::strategies::StrategyParams;
use crate::{Candle, EquitySnapshot, SessionRecord, SessionStatus, Side, Signal, TradeRecord};

/// Throttle snapshot appends between trades so noisy ticks do not flood
/// the store; trades always snapshot.
fn default_snapshot_cooldown() -> chrono::Duration {
    chrono::Duration::seconds(1)
}

const DEFAULT_PERSIST_ATTEMPTS: usize = 4;
const DEFAULT_PERSIST_BACKOFF: Duration = Duration::from_millis(50);

pub struct PaperTradingSession {
    record: SessionRecord,
    params: StrategyParams,
    store: Arc<dyn Datastore>,
    window: VecDeque<Candle>,
    prev_signal: Option<Signal>,
    last_candle_at: Option<DateTime<Utc>>,
    last_snapshot_at: Option<DateTime<Utc>>,
    snapshot_cooldown: chrono::Duration,
    persist_attempts: usize,
    persist_backoff: Duration,
}

impl PaperTradingSession {
    pub fn new(record: SessionRecord, params: StrategyParams, store: Arc<dyn Datastore>) -> Self {
        PaperTradingSession {
            record,
            params,
            store,
            window: VecDeque::new(),
            prev_signal: None,
            last_candle_at: None,
            last_snapshot_at: None,
            snapshot_cooldown: default_snapshot_cooldown(),
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            persist_backoff: DEFAULT_PERSIST_BACKOFF,
        }
    }

    /// Override how hard store writes are retried. At least one attempt
    /// is always made.
    pub fn with_persistence_retry(mut self, attempts: usize, backoff: Duration) -> Self {
        self.persist_attempts = attempts.max(1);
        self.persist_backoff = backoff;
        self
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn is_active(&self) -> bool {
        self.record.status == SessionStatus::Active
    }

    /// The trailing candle window the session is currently tracking
    pub fn window(&self) -> Vec<Candle> {
        self.window.iter().cloned().collect()
    }

    /// Pre-fill the trailing window from history without trading, so a
    /// freshly deployed or restored session does not re-execute old bars.
    pub fn seed(&mut self, candles: &[Candle]) {
        for candle in candles {
            self.push_window(candle.clone());
            self.last_candle_at = Some(candle.datetime);
        }
        if self.window.len() >= self.params.min_window() {
            let window = self.window.make_contiguous();
            self.prev_signal = Some(self.params.evaluate(window));
        }
    }

    /// Stop the session. Terminal: later ticks are ignored and resuming
    /// requires a fresh session.
    pub fn stop(&mut self) -> Result<()> {
        if self.record.status == SessionStatus::Stopped {
            return Ok(());
        }
        self.record.status = SessionStatus::Stopped;
        self.record.last_update = Utc::now();
        self.persist_session()?;
        info!(session = %self.record.id, "session stopped");
        Ok(())
    }

    /// Consume one live candle. Exactly-once per candle: a tick whose
    /// timestamp does not advance past the last seen candle is dropped.
    pub fn tick(&mut self, candle: &Candle) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        if let Some(last) = self.last_candle_at {
            if candle.datetime <= last {
                return Ok(());
            }
        }
        self.last_candle_at = Some(candle.datetime);
        self.push_window(candle.clone());

        // Mark open positions to market on every tick
        if !self.record.is_flat() {
            self.record.current_equity = self.record.marked_equity(candle.close);
            self.record.last_update = candle.datetime;
            self.persist_session()?;
            self.maybe_snapshot(candle.datetime)?;
        }

        if self.window.len() < self.params.min_window() {
            return Ok(());
        }

        let window_len = self.window.len();
        let signal = {
            let window = self.window.make_contiguous();
            self.params
                .evaluate(&window[window_len - self.params.min_window()..])
        };
        let effective = self.confirm(signal);
        let reason = {
            let window = self.window.make_contiguous();
            self.params
                .explain(&window[window_len - self.params.min_window()..])
        };
        self.prev_signal = Some(signal);

        self.execute(effective, candle.close, candle.datetime, &reason)
    }

    fn push_window(&mut self, candle: Candle) {
        self.window.push_back(candle);
        let cap = self.params.min_window();
        while self.window.len() > cap {
            self.window.pop_front();
        }
    }

    /// Edge mode requires the signal to change across two consecutive
    /// ticks before an entry from flat; exits and reversals of an open
    /// position are never suppressed.
    fn confirm(&self, signal: Signal) -> Signal {
        match self.record.execution_mode {
            crate::ExecutionMode::Sync => signal,
            crate::ExecutionMode::Edge => {
                let unchanged = self.prev_signal == Some(signal);
                if self.record.is_flat() && unchanged {
                    Signal::Hold
                } else {
                    signal
                }
            }
        }
    }

    fn execute(
        &mut self,
        signal: Signal,
        price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let target = signal.direction();
        if target == 0 {
            return Ok(());
        }
        let current = if self.record.is_flat() {
            0
        } else if self.record.current_position > 0.0 {
            1
        } else {
            -1
        };
        if target == current {
            return Ok(());
        }

        debug!(
            session = %self.record.id,
            from = current,
            to = target,
            price,
            "position change"
        );

        if current != 0 {
            self.close_position(price, at, reason)?;
        }
        self.open_position(target, price, at, reason)?;

        self.record.last_update = at;
        self.persist_session()?;
        self.append_snapshot(at)?;
        Ok(())
    }

    fn open_position(
        &mut self,
        direction: i8,
        price: f64,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let quantity = self.record.current_equity / price;
        self.record.entry_price = Some(price);
        self.record.entry_equity = Some(self.record.current_equity);
        self.record.current_position = f64::from(direction) * quantity;

        let side = if direction > 0 { Side::Buy } else { Side::Sell };
        self.append_trade(side, price, quantity, None, reason, at)?;
        info!(
            session = %self.record.id,
            %side,
            price,
            quantity,
            "opened position"
        );
        Ok(())
    }

    fn close_position(&mut self, price: f64, at: DateTime<Utc>, reason: &str) -> Result<()> {
        let position = self.record.current_position;
        let entry = self.record.entry_price.unwrap_or(price);
        let quantity = position.abs();
        let realized = (price - entry) * position;

        self.record.current_equity = self.record.entry_equity.unwrap_or(self.record.current_equity)
            + realized;
        self.record.current_position = 0.0;
        self.record.entry_price = None;
        self.record.entry_equity = None;

        // Closing a long sells; closing a short buys back
        let side = if position > 0.0 { Side::Sell } else { Side::Buy };
        self.append_trade(side, price, quantity, Some(realized), reason, at)?;
        info!(
            session = %self.record.id,
            %side,
            price,
            pnl = realized,
            "closed position"
        );
        Ok(())
    }

    fn append_trade(
        &mut self,
        side: Side,
        price: f64,
        quantity: f64,
        pnl: Option<f64>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let trade = TradeRecord {
            id: Uuid::new_v4(),
            session_id: self.record.id,
            symbol: self.record.symbol.clone(),
            side,
            price,
            quantity,
            pnl,
            reason: reason.to_string(),
            timestamp: at,
        };
        let store = Arc::clone(&self.store);
        with_retry(self.persist_attempts, self.persist_backoff, || {
            store.append_trade(&trade)
        })
    }

    fn persist_session(&self) -> Result<()> {
        let store = Arc::clone(&self.store);
        with_retry(self.persist_attempts, self.persist_backoff, || {
            store.update_session(&self.record)
        })
    }

    fn maybe_snapshot(&mut self, at: DateTime<Utc>) -> Result<()> {
        let due = match self.last_snapshot_at {
            Some(prev) => at - prev >= self.snapshot_cooldown,
            None => true,
        };
        if due {
            self.append_snapshot(at)?;
        }
        Ok(())
    }

    fn append_snapshot(&mut self, at: DateTime<Utc>) -> Result<()> {
        let snapshot = EquitySnapshot {
            session_id: self.record.id,
            equity: self.record.current_equity,
            timestamp: at,
        };
        let store = Arc::clone(&self.store);
        with_retry(self.persist_attempts, self.persist_backoff, || {
            store.append_snapshot(&snapshot)
        })?;
        self.last_snapshot_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::strategies::BreakoutParams;
    use crate::ExecutionMode;
    use approx::assert_relative_eq;
    use chrono::Duration as ChronoDuration;

    fn store() -> Arc<dyn Datastore> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    fn session_record(mode: ExecutionMode, capital: f64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            initial_capital: capital,
            entry_equity: None,
            current_equity: capital,
            current_position: 0.0,
            entry_price: None,
            status: SessionStatus::Active,
            execution_mode: mode,
            allocated_weight: 1.0,
            created_at: now,
            last_update: now,
        }
    }

    fn candle(at: DateTime<Utc>, price: f64) -> Candle {
        Candle {
            datetime: at,
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume: 1_000.0,
        }
    }

    /// Breakout over 3 flat bars makes signals easy to stage: a close
    /// above 100.x breaks out long, below breaks out short.
    fn breakout_session(mode: ExecutionMode, store: Arc<dyn Datastore>) -> PaperTradingSession {
        let record = session_record(mode, 10_000.0);
        store.insert_session(&record).unwrap();
        let params = StrategyParams::Breakout(BreakoutParams { lookback: 3 });
        PaperTradingSession::new(record, params, store)
    }

    fn run_prices(session: &mut PaperTradingSession, start: DateTime<Utc>, prices: &[f64]) {
        for (i, &price) in prices.iter().enumerate() {
            session
                .tick(&candle(start + ChronoDuration::hours(i as i64), price))
                .unwrap();
        }
    }

    #[test]
    fn open_then_close_at_same_price_is_flat_pnl() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        // Flat range, upside break, then a collapse back through the
        // (shifted) range low; final close happens at the entry price.
        run_prices(&mut session, start, &[100.0, 100.0, 100.0, 110.0]);
        assert!(session.record().current_position > 0.0);
        let entry = session.record().entry_price.unwrap();

        // Short breakout at the same price as entry: close pnl is zero
        run_prices(
            &mut session,
            start + ChronoDuration::hours(4),
            &[120.0, 125.0, 130.0, entry],
        );
        let trades = store.trades_for_session(session.id()).unwrap();
        let closing = trades.iter().find(|t| t.pnl.is_some()).unwrap();
        assert_relative_eq!(closing.pnl.unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn long_round_trip_realizes_price_delta_times_quantity() {
        // Sizing rule fixes quantity at entry equity / entry price, so
        // assert the pnl formula rather than a hand-picked unit count.
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        run_prices(&mut session, start, &[100.0, 100.0, 100.0, 100.0, 102.0]);
        let record = session.record();
        assert!(record.current_position > 0.0);
        assert_eq!(record.entry_price, Some(102.0));
        assert_relative_eq!(record.entry_equity.unwrap(), 10_000.0);
        let quantity = record.current_position;

        // Collapse through the range low to force a close
        run_prices(
            &mut session,
            start + ChronoDuration::hours(5),
            &[103.0, 103.0, 103.0, 90.0],
        );
        let trades = store.trades_for_session(session.id()).unwrap();
        let closing = trades.iter().find(|t| t.pnl.is_some()).unwrap();
        assert_relative_eq!(closing.pnl.unwrap(), (90.0 - 102.0) * quantity, epsilon = 1e-9);
        assert_relative_eq!(
            session.record().current_equity,
            10_000.0 + (90.0 - 102.0) * quantity,
            epsilon = 1e-9
        );
        // The SELL breakout immediately reverses into a short
        assert!(session.record().current_position < 0.0);
    }

    #[test]
    fn short_close_pnl_uses_entry_minus_exit() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        run_prices(&mut session, start, &[100.0, 100.0, 100.0, 90.0]);
        let record = session.record();
        assert!(record.current_position < 0.0);
        let quantity = record.current_position.abs();
        let entry = record.entry_price.unwrap();

        // Break back up to close the short (and reverse long)
        run_prices(
            &mut session,
            start + ChronoDuration::hours(4),
            &[85.0, 85.0, 85.0, 95.0],
        );
        let trades = store.trades_for_session(session.id()).unwrap();
        let closing = trades.iter().find(|t| t.pnl.is_some()).unwrap();
        assert_relative_eq!(
            closing.pnl.unwrap(),
            (entry - 95.0) * quantity,
            epsilon = 1e-9
        );
    }

    #[test]
    fn entry_trade_has_no_pnl_and_a_reason() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        run_prices(&mut session, Utc::now(), &[100.0, 100.0, 100.0, 110.0]);

        let trades = store.trades_for_session(session.id()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].pnl, None);
        assert!(trades[0].reason.contains("range"));
    }

    #[test]
    fn stopped_session_ignores_ticks() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        session.stop().unwrap();

        run_prices(&mut session, Utc::now(), &[100.0, 100.0, 100.0, 110.0]);
        assert!(store.trades_for_session(session.id()).unwrap().is_empty());
        assert_eq!(session.record().status, SessionStatus::Stopped);
    }

    #[test]
    fn duplicate_candles_are_processed_once() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        run_prices(&mut session, start, &[100.0, 100.0, 100.0]);
        let breakout = candle(start + ChronoDuration::hours(3), 110.0);
        session.tick(&breakout).unwrap();
        session.tick(&breakout).unwrap(); // replayed candle

        let trades = store.trades_for_session(session.id()).unwrap();
        assert_eq!(trades.len(), 1);
    }

    #[test]
    fn edge_mode_waits_for_a_signal_change() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Edge, Arc::clone(&store));
        let start = Utc::now();

        // Warm the window and record a Buy signal as the prior tick's
        // observation; the same signal on the next tick must not enter.
        session.seed(&[
            candle(start, 100.0),
            candle(start + ChronoDuration::hours(1), 100.0),
            candle(start + ChronoDuration::hours(2), 100.0),
            candle(start + ChronoDuration::hours(3), 110.0),
        ]);
        assert_eq!(session.prev_signal, Some(Signal::Buy));

        session
            .tick(&candle(start + ChronoDuration::hours(4), 120.0))
            .unwrap();
        assert!(session.record().is_flat());

        // In sync mode the same sequence enters immediately
        let sync_store = self::store();
        let mut sync_session = breakout_session(ExecutionMode::Sync, Arc::clone(&sync_store));
        sync_session.seed(&[
            candle(start, 100.0),
            candle(start + ChronoDuration::hours(1), 100.0),
            candle(start + ChronoDuration::hours(2), 100.0),
            candle(start + ChronoDuration::hours(3), 110.0),
        ]);
        sync_session
            .tick(&candle(start + ChronoDuration::hours(4), 120.0))
            .unwrap();
        assert!(!sync_session.record().is_flat());
    }

    #[test]
    fn custom_retry_policy_still_persists_trades() {
        let store = store();
        let record = session_record(ExecutionMode::Sync, 10_000.0);
        store.insert_session(&record).unwrap();
        let params = StrategyParams::Breakout(BreakoutParams { lookback: 3 });
        let mut session = PaperTradingSession::new(record, params, Arc::clone(&store))
            .with_persistence_retry(1, Duration::ZERO);

        run_prices(&mut session, Utc::now(), &[100.0, 100.0, 100.0, 110.0]);
        assert_eq!(store.trades_for_session(session.id()).unwrap().len(), 1);
    }

    #[test]
    fn marked_equity_updates_between_trades() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        run_prices(&mut session, start, &[100.0, 100.0, 100.0, 110.0]);
        let quantity = session.record().current_position;

        session
            .tick(&candle(start + ChronoDuration::hours(4), 112.0))
            .unwrap();
        assert_relative_eq!(
            session.record().current_equity,
            10_000.0 + (112.0 - 110.0) * quantity,
            epsilon = 1e-9
        );
    }

    #[test]
    fn snapshots_have_non_decreasing_timestamps() {
        let store = store();
        let mut session = breakout_session(ExecutionMode::Sync, Arc::clone(&store));
        let start = Utc::now();

        run_prices(
            &mut session,
            start,
            &[100.0, 100.0, 100.0, 110.0, 112.0, 111.0, 115.0],
        );

        let snapshots = store.snapshots_for_session(session.id()).unwrap();
        assert!(!snapshots.is_empty());
        for pair in snapshots.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
