//! SQLite-backed datastore
//!
//! Four tables plus one materialized rollup: strategies, sessions,
//! trades, equity_snapshots, portfolio_cache. WAL mode for concurrent
//! readers; a single connection behind a mutex serializes writers.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::store::{EquityStore, PortfolioStore, SessionStore, StrategyStore, TradeLedger};
use crate::{
    EquitySnapshot, PortfolioPoint, SessionRecord, SessionStatus, StrategyRecord, TradeRecord,
};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Persistence(format!("create db dir: {e}")))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!(path = %path.display(), "sqlite store initialized");
        Ok(store)
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                strategy_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                parameters TEXT NOT NULL,
                performance_metrics TEXT NOT NULL,
                backtest_curve TEXT NOT NULL,
                kelly_fraction REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                initial_capital REAL NOT NULL,
                entry_equity REAL,
                current_equity REAL NOT NULL,
                current_position REAL NOT NULL,
                entry_price REAL,
                status TEXT NOT NULL,
                execution_mode TEXT NOT NULL,
                allocated_weight REAL NOT NULL,
                created_at TEXT NOT NULL,
                last_update TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                pnl REAL,
                reason TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                equity REAL NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS portfolio_cache (
                timestamp TEXT PRIMARY KEY,
                total_equity REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_session
                ON trades(session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_snapshots_session
                ON equity_snapshots(session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_portfolio_cache
                ON portfolio_cache(timestamp, total_equity);",
        )?;

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }
}

fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn ts_from_sql(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Persistence(format!("bad timestamp '{raw}': {e}")))
}

fn uuid_from_sql(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| EngineError::Persistence(format!("bad uuid '{raw}': {e}")))
}

fn strategy_from_row(row: &Row<'_>) -> Result<StrategyRecord> {
    Ok(StrategyRecord {
        id: uuid_from_sql(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        symbol: row.get(3)?,
        interval: row.get(4)?,
        params: serde_json::from_str(&row.get::<_, String>(5)?)?,
        metrics: serde_json::from_str(&row.get::<_, String>(6)?)?,
        backtest_curve: serde_json::from_str(&row.get::<_, String>(7)?)?,
        kelly_fraction: row.get(8)?,
        created_at: ts_from_sql(&row.get::<_, String>(9)?)?,
    })
}

fn session_from_row(row: &Row<'_>) -> Result<SessionRecord> {
    let status: String = row.get(9)?;
    let mode: String = row.get(10)?;
    Ok(SessionRecord {
        id: uuid_from_sql(&row.get::<_, String>(0)?)?,
        strategy_id: uuid_from_sql(&row.get::<_, String>(1)?)?,
        symbol: row.get(2)?,
        interval: row.get(3)?,
        initial_capital: row.get(4)?,
        entry_equity: row.get(5)?,
        current_equity: row.get(6)?,
        current_position: row.get(7)?,
        entry_price: row.get(8)?,
        status: status.parse().map_err(EngineError::Persistence)?,
        execution_mode: mode.parse().map_err(EngineError::Persistence)?,
        allocated_weight: row.get(11)?,
        created_at: ts_from_sql(&row.get::<_, String>(12)?)?,
        last_update: ts_from_sql(&row.get::<_, String>(13)?)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> Result<TradeRecord> {
    let side: String = row.get(3)?;
    Ok(TradeRecord {
        id: uuid_from_sql(&row.get::<_, String>(0)?)?,
        session_id: uuid_from_sql(&row.get::<_, String>(1)?)?,
        symbol: row.get(2)?,
        side: side.parse().map_err(EngineError::Persistence)?,
        price: row.get(4)?,
        quantity: row.get(5)?,
        pnl: row.get(6)?,
        reason: row.get(7)?,
        timestamp: ts_from_sql(&row.get::<_, String>(8)?)?,
    })
}

const SESSION_COLS: &str = "id, strategy_id, symbol, interval, initial_capital, entry_equity, \
     current_equity, current_position, entry_price, status, execution_mode, \
     allocated_weight, created_at, last_update";

impl StrategyStore for SqliteStore {
    fn insert_strategy(&self, record: &StrategyRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO strategies
             (id, name, strategy_type, symbol, interval, parameters,
              performance_metrics, backtest_curve, kelly_fraction, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.name,
                record.strategy_type(),
                record.symbol,
                record.interval,
                serde_json::to_string(&record.params)?,
                serde_json::to_string(&record.metrics)?,
                serde_json::to_string(&record.backtest_curve)?,
                record.kelly_fraction,
                ts_to_sql(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_strategies(&self) -> Result<Vec<StrategyRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM strategies ORDER BY created_at DESC, id DESC")?;
        let rows = stmt.query_map([], |row| Ok(strategy_from_row(row)))?;
        rows.map(|r| r?).collect()
    }

    fn get_strategy(&self, id: Uuid) -> Result<StrategyRecord> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM strategies WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| Ok(strategy_from_row(row)))?;
        match rows.next() {
            Some(row) => row?,
            None => Err(EngineError::StrategyNotFound(id)),
        }
    }

    fn delete_strategy(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute(
            "DELETE FROM strategies WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(EngineError::StrategyNotFound(id));
        }
        Ok(())
    }

    fn delete_all_strategies(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM strategies", [])?;
        Ok(())
    }
}

impl SessionStore for SqliteStore {
    fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                record.id.to_string(),
                record.strategy_id.to_string(),
                record.symbol,
                record.interval,
                record.initial_capital,
                record.entry_equity,
                record.current_equity,
                record.current_position,
                record.entry_price,
                record.status.to_string(),
                record.execution_mode.to_string(),
                record.allocated_weight,
                ts_to_sql(record.created_at),
                ts_to_sql(record.last_update),
            ],
        )?;
        Ok(())
    }

    fn update_session(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE sessions SET
                entry_equity = ?2, current_equity = ?3, current_position = ?4,
                entry_price = ?5, status = ?6, last_update = ?7
             WHERE id = ?1",
            params![
                record.id.to_string(),
                record.entry_equity,
                record.current_equity,
                record.current_position,
                record.entry_price,
                record.status.to_string(),
                ts_to_sql(record.last_update),
            ],
        )?;
        if affected == 0 {
            return Err(EngineError::SessionNotFound(record.id));
        }
        Ok(())
    }

    fn get_session(&self, id: Uuid) -> Result<SessionRecord> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], |row| Ok(session_from_row(row)))?;
        match rows.next() {
            Some(row) => row?,
            None => Err(EngineError::SessionNotFound(id)),
        }
    }

    fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], |row| Ok(session_from_row(row)))?;
        rows.map(|r| r?).collect()
    }

    fn active_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions WHERE status = 'active' ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], |row| Ok(session_from_row(row)))?;
        rows.map(|r| r?).collect()
    }

    fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE sessions SET status = ?2, last_update = ?3 WHERE id = ?1",
            params![id.to_string(), status.to_string(), ts_to_sql(Utc::now())],
        )?;
        if affected == 0 {
            return Err(EngineError::SessionNotFound(id));
        }
        Ok(())
    }
}

impl TradeLedger for SqliteStore {
    fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO trades
             (id, session_id, symbol, side, price, quantity, pnl, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.id.to_string(),
                trade.session_id.to_string(),
                trade.symbol,
                trade.side.to_string(),
                trade.price,
                trade.quantity,
                trade.pnl,
                trade.reason,
                ts_to_sql(trade.timestamp),
            ],
        )?;
        Ok(())
    }

    fn trades_for_session(&self, session_id: Uuid) -> Result<Vec<TradeRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, symbol, side, price, quantity, pnl, reason, timestamp
             FROM trades WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok(trade_from_row(row))
        })?;
        rows.map(|r| r?).collect()
    }
}

impl EquityStore for SqliteStore {
    fn append_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO equity_snapshots (session_id, equity, timestamp) VALUES (?1, ?2, ?3)",
            params![
                snapshot.session_id.to_string(),
                snapshot.equity,
                ts_to_sql(snapshot.timestamp),
            ],
        )?;
        Ok(())
    }

    fn snapshots_for_session(&self, session_id: Uuid) -> Result<Vec<EquitySnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, equity, timestamp FROM equity_snapshots
             WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            let sid: String = row.get(0)?;
            let ts: String = row.get(2)?;
            Ok((sid, row.get::<_, f64>(1)?, ts))
        })?;
        rows.map(|r| {
            let (sid, equity, ts) = r?;
            Ok(EquitySnapshot {
                session_id: uuid_from_sql(&sid)?,
                equity,
                timestamp: ts_from_sql(&ts)?,
            })
        })
        .collect()
    }

    fn all_snapshots(&self) -> Result<Vec<EquitySnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, equity, timestamp FROM equity_snapshots
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let sid: String = row.get(0)?;
            let ts: String = row.get(2)?;
            Ok((sid, row.get::<_, f64>(1)?, ts))
        })?;
        rows.map(|r| {
            let (sid, equity, ts) = r?;
            Ok(EquitySnapshot {
                session_id: uuid_from_sql(&sid)?,
                equity,
                timestamp: ts_from_sql(&ts)?,
            })
        })
        .collect()
    }
}

impl PortfolioStore for SqliteStore {
    fn replace_portfolio_cache(&self, points: &[PortfolioPoint]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        tx.execute("DELETE FROM portfolio_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO portfolio_cache (timestamp, total_equity) VALUES (?1, ?2)",
            )?;
            for point in points {
                stmt.execute(params![ts_to_sql(point.timestamp), point.total_equity])?;
            }
        }
        tx.commit()
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn portfolio_history(&self, since: DateTime<Utc>) -> Result<Vec<PortfolioPoint>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, total_equity FROM portfolio_cache
             WHERE timestamp >= ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![ts_to_sql(since)], |row| {
            let ts: String = row.get(0)?;
            Ok((ts, row.get::<_, f64>(1)?))
        })?;
        rows.map(|r| {
            let (ts, total_equity) = r?;
            Ok(PortfolioPoint {
                timestamp: ts_from_sql(&ts)?,
                total_equity,
            })
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{MaCrossoverParams, StrategyParams};
    use crate::{ExecutionMode, PerformanceMetrics, Side};
    use chrono::Duration;

    fn sample_strategy() -> StrategyRecord {
        StrategyRecord {
            id: Uuid::new_v4(),
            name: "BTCUSDT 1h ma_crossover".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            params: StrategyParams::MaCrossover(MaCrossoverParams {
                fast_period: 5,
                slow_period: 21,
            }),
            metrics: PerformanceMetrics {
                sharpe: 1.2,
                win_rate: 55.0,
                total_return_pct: 12.5,
                max_drawdown_pct: 8.0,
                trade_count: 40,
                profit_factor: 1.8,
            },
            backtest_curve: vec![10_000.0, 10_500.0, 11_250.0],
            kelly_fraction: 0.3,
            created_at: Utc::now(),
        }
    }

    fn sample_session(strategy_id: Uuid) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            strategy_id,
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            initial_capital: 5_000.0,
            entry_equity: None,
            current_equity: 5_000.0,
            current_position: 0.0,
            entry_price: None,
            status: SessionStatus::Active,
            execution_mode: ExecutionMode::Sync,
            allocated_weight: 0.5,
            created_at: now,
            last_update: now,
        }
    }

    #[test]
    fn strategy_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let record = sample_strategy();

        store.insert_strategy(&record).unwrap();
        let loaded = store.get_strategy(record.id).unwrap();

        assert_eq!(loaded.name, record.name);
        assert_eq!(loaded.params, record.params);
        assert_eq!(loaded.metrics, record.metrics);
        assert_eq!(loaded.backtest_curve, record.backtest_curve);
    }

    #[test]
    fn missing_strategy_is_a_specific_error() {
        let store = SqliteStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_strategy(id),
            Err(EngineError::StrategyNotFound(found)) if found == id
        ));
    }

    #[test]
    fn delete_all_strategies_clears_table() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_strategy(&sample_strategy()).unwrap();
        store.insert_strategy(&sample_strategy()).unwrap();

        store.delete_all_strategies().unwrap();
        assert!(store.list_strategies().unwrap().is_empty());
    }

    #[test]
    fn session_update_and_status_flip() {
        let store = SqliteStore::in_memory().unwrap();
        let strategy = sample_strategy();
        store.insert_strategy(&strategy).unwrap();

        let mut session = sample_session(strategy.id);
        store.insert_session(&session).unwrap();

        session.current_equity = 5_250.0;
        session.current_position = 10.0;
        session.entry_price = Some(100.0);
        session.entry_equity = Some(5_000.0);
        store.update_session(&session).unwrap();

        let loaded = store.get_session(session.id).unwrap();
        assert_eq!(loaded.current_equity, 5_250.0);
        assert_eq!(loaded.entry_price, Some(100.0));

        store
            .set_session_status(session.id, SessionStatus::Stopped)
            .unwrap();
        assert!(store.active_sessions().unwrap().is_empty());
    }

    #[test]
    fn trades_preserve_optional_pnl() {
        let store = SqliteStore::in_memory().unwrap();
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let entry = TradeRecord {
            id: Uuid::new_v4(),
            session_id,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: 100.0,
            quantity: 10.0,
            pnl: None,
            reason: "SMA(5) above SMA(21)".into(),
            timestamp: now,
        };
        let exit = TradeRecord {
            id: Uuid::new_v4(),
            session_id,
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            price: 110.0,
            quantity: 10.0,
            pnl: Some(100.0),
            reason: "SMA(5) below SMA(21)".into(),
            timestamp: now + Duration::hours(1),
        };

        store.append_trade(&entry).unwrap();
        store.append_trade(&exit).unwrap();

        let trades = store.trades_for_session(session_id).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].pnl, None);
        assert_eq!(trades[1].pnl, Some(100.0));
    }

    #[test]
    fn portfolio_cache_replace_and_range_query() {
        let store = SqliteStore::in_memory().unwrap();
        let base = Utc::now();

        let points: Vec<PortfolioPoint> = (0..5)
            .map(|i| PortfolioPoint {
                timestamp: base + Duration::minutes(i),
                total_equity: 10_000.0 + i as f64 * 100.0,
            })
            .collect();
        store.replace_portfolio_cache(&points).unwrap();

        let all = store.portfolio_history(base).unwrap();
        assert_eq!(all.len(), 5);

        let tail = store
            .portfolio_history(base + Duration::minutes(3))
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].total_equity, 10_300.0);

        // Replacing drops the old rollup entirely
        store.replace_portfolio_cache(&points[..2]).unwrap();
        assert_eq!(store.portfolio_history(base).unwrap().len(), 2);
    }
}
