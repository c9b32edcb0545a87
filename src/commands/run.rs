//! Run command: the live polling loop
//!
//! Restores active sessions from the store, then on every cycle fetches
//! the latest candle for each distinct (symbol, interval) feed and
//! ticks the matching sessions. Ctrl-C stops cleanly after the current
//! cycle; session state survives in SQLite for the next run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use papertrader::config::AppConfig;
use papertrader::manager::SessionManager;
use papertrader::market::MarketDataProvider;
use papertrader::portfolio;
use papertrader::RequestGate;

pub fn run(config: AppConfig, cycles: Option<u64>) -> Result<()> {
    let runtime = super::runtime()?;
    runtime.block_on(run_async(config, cycles))
}

async fn run_async(config: AppConfig, cycles: Option<u64>) -> Result<()> {
    let store = super::open_store(&config)?;
    let provider = super::build_provider(&config)?;
    let gate = super::build_gate(&config);
    let manager = Arc::new(super::build_manager(&config, store.clone()));

    let restored = manager.restore()?;
    if restored == 0 {
        println!("No active sessions to run; deploy a strategy first");
        return Ok(());
    }
    info!(restored, "live loop starting");

    // Warm each session's signal window before trading resumes
    for (symbol, iv) in manager.active_feeds() {
        let candles = {
            let _permit = gate.acquire().await;
            provider.fetch(&symbol, &iv, 200).await
        };
        match candles {
            Ok(candles) => {
                for record in store.active_sessions()? {
                    if record.symbol == symbol && record.interval == iv {
                        if let Err(e) = manager.seed_session(record.id, &candles) {
                            warn!(session = %record.id, error = %e, "seed failed");
                        }
                    }
                }
            }
            Err(e) => warn!(%symbol, interval = %iv, error = %e, "seed fetch failed"),
        }
    }

    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut completed = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                cycle(&manager, provider.as_ref(), &gate).await;
                if let Err(e) = portfolio::rebuild_cache(&store) {
                    error!(error = %e, "portfolio rebuild failed");
                }
                completed += 1;
                if let Some(limit) = cycles {
                    if completed >= limit {
                        info!(completed, "cycle limit reached");
                        break;
                    }
                }
            }
        }
    }

    portfolio::rebuild_cache(&store).context("final portfolio rebuild")?;
    println!("Stopped after {completed} cycles; sessions remain active in the store");
    Ok(())
}

async fn cycle(manager: &SessionManager, provider: &dyn MarketDataProvider, gate: &RequestGate) {
    for (symbol, iv) in manager.active_feeds() {
        let fetched = {
            let _permit = gate.acquire().await;
            provider.fetch(&symbol, &iv, 2).await
        };
        match fetched {
            Ok(candles) => {
                // The last candle may still be forming; trade the most
                // recent closed one when two are available.
                let candle = if candles.len() >= 2 {
                    &candles[candles.len() - 2]
                } else if let Some(last) = candles.last() {
                    last
                } else {
                    continue;
                };
                if let Err(e) = manager.tick_symbol(&symbol, &iv, candle) {
                    error!(%symbol, interval = %iv, error = %e, "tick failed");
                }
            }
            Err(e) if e.is_data_fetch() => {
                warn!(%symbol, interval = %iv, error = %e, "fetch failed, will retry next cycle");
            }
            Err(e) => {
                error!(%symbol, interval = %iv, error = %e, "unexpected fetch failure");
            }
        }
    }
}
