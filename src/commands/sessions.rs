//! Session lifecycle commands: list, deploy, deploy-bulk, reset

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use papertrader::config::AppConfig;
use papertrader::portfolio;
use papertrader::ExecutionMode;

pub fn list(config: AppConfig) -> Result<()> {
    let store = super::open_store(&config)?;

    let strategies = store.list_strategies()?;
    println!("Strategies ({}):", strategies.len());
    for s in &strategies {
        println!(
            "  {}  {:<28} sharpe {:>6.2}  dd {:>6.2}%  kelly {:.3}",
            s.id, s.name, s.metrics.sharpe, s.metrics.max_drawdown_pct, s.kelly_fraction
        );
    }

    let sessions = store.list_sessions()?;
    println!("Sessions ({}):", sessions.len());
    for s in &sessions {
        println!(
            "  {}  {:<10} {:<4} {:<7} {:<5} equity {:>12.2}  position {:>10.4}",
            s.id, s.symbol, s.interval, s.status, s.execution_mode, s.current_equity, s.current_position
        );
    }
    Ok(())
}

pub fn deploy(config: AppConfig, strategy_id: String, capital: f64, mode: String) -> Result<()> {
    let strategy_id: Uuid = strategy_id.parse().context("invalid strategy id")?;
    let mode: ExecutionMode = mode.parse().map_err(anyhow::Error::msg)?;

    let store = super::open_store(&config)?;
    let manager = super::build_manager(&config, store.clone());
    let session_id = manager.deploy(strategy_id, capital, mode)?;
    portfolio::rebuild_cache(&store)?;

    println!("Deployed session {session_id}");
    Ok(())
}

pub fn deploy_bulk(
    config: AppConfig,
    strategy_ids: String,
    total_capital: f64,
    mode: String,
) -> Result<()> {
    let ids: Vec<Uuid> = strategy_ids
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().context("invalid strategy id"))
        .collect::<Result<_>>()?;
    if ids.is_empty() {
        bail!("no strategy ids given");
    }
    let mode: ExecutionMode = mode.parse().map_err(anyhow::Error::msg)?;

    let store = super::open_store(&config)?;
    let manager = super::build_manager(&config, store.clone());
    let report = manager.deploy_bulk(&ids, total_capital, mode)?;
    portfolio::rebuild_cache(&store)?;

    println!("Started {} sessions", report.started.len());
    for id in &report.started {
        let session = store.get_session(*id)?;
        println!(
            "  {}  {:<10} capital {:>12.2}  weight {:.4}",
            id, session.symbol, session.initial_capital, session.allocated_weight
        );
    }
    for (strategy, reason) in &report.failed {
        println!("  failed {strategy}: {reason}");
    }
    Ok(())
}

pub fn stop(config: AppConfig, session_id: String) -> Result<()> {
    let session_id: Uuid = session_id.parse().context("invalid session id")?;

    let store = super::open_store(&config)?;
    let manager = super::build_manager(&config, store.clone());
    manager.stop(session_id)?;
    portfolio::rebuild_cache(&store)?;

    println!("Stopped session {session_id}");
    Ok(())
}

pub fn delete_strategy(config: AppConfig, strategy_id: String) -> Result<()> {
    let strategy_id: Uuid = strategy_id.parse().context("invalid strategy id")?;

    let store = super::open_store(&config)?;
    store.delete_strategy(strategy_id)?;
    println!("Deleted strategy {strategy_id}");
    Ok(())
}

pub fn delete_all_strategies(config: AppConfig) -> Result<()> {
    let store = super::open_store(&config)?;
    store.delete_all_strategies()?;
    println!("Deleted all strategies");
    Ok(())
}

pub fn trades(config: AppConfig, session_id: String) -> Result<()> {
    let session_id: Uuid = session_id.parse().context("invalid session id")?;

    let store = super::open_store(&config)?;
    let trades = store.trades_for_session(session_id)?;
    println!("Trades for session {session_id} ({}):", trades.len());
    for t in &trades {
        let pnl = t
            .pnl
            .map(|p| format!("{p:>12.2}"))
            .unwrap_or_else(|| format!("{:>12}", "-"));
        println!(
            "  {}  {:<4} {:>12.4} x {:>10.4}  pnl {pnl}  {}",
            t.timestamp.format("%Y-%m-%d %H:%M:%S"),
            t.side,
            t.price,
            t.quantity,
            t.reason
        );
    }

    let snapshots = store.snapshots_for_session(session_id)?;
    if let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) {
        println!(
            "Equity: {:.2} -> {:.2} over {} snapshots",
            first.equity,
            last.equity,
            snapshots.len()
        );
    }
    Ok(())
}

pub fn reset(config: AppConfig) -> Result<()> {
    let store = super::open_store(&config)?;
    let manager = super::build_manager(&config, store.clone());

    let stopped = manager.reset_all()?;
    let points = portfolio::rebuild_cache(&store)?;

    println!("Stopped {stopped} sessions; portfolio cache now has {points} points");
    Ok(())
}
