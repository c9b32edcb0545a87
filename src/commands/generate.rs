//! Generate command: search and persist strategies

use anyhow::Result;
use tracing::info;

use papertrader::config::AppConfig;
use papertrader::optimizer::{GenerateRequest, StrategyOptimizer};

pub fn run(
    config: AppConfig,
    symbols: String,
    intervals: String,
    top_n: usize,
    limit: usize,
    iterations: usize,
    capital: f64,
) -> Result<()> {
    let request = GenerateRequest {
        symbols: split_csv(&symbols),
        intervals: split_csv(&intervals),
        top_n,
        candle_limit: limit,
        iterations,
        initial_capital: capital,
    };

    let store = super::open_store(&config)?;
    let provider = super::build_provider(&config)?;
    let gate = super::build_gate(&config);
    let optimizer = StrategyOptimizer::new(provider, gate, store.clone());

    let runtime = super::runtime()?;
    let report = runtime.block_on(optimizer.generate(&request))?;

    println!(
        "Created {} strategies ({} pairs skipped)",
        report.created.len(),
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!(
            "  skipped {} {}: {}",
            skipped.symbol, skipped.interval, skipped.reason
        );
    }

    let strategies = store.list_strategies()?;
    print_strategy_table(&strategies, &report.created);
    info!(created = report.created.len(), "generate finished");
    Ok(())
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn print_strategy_table(
    strategies: &[papertrader::StrategyRecord],
    created: &[uuid::Uuid],
) {
    println!(
        "{:<38} {:<28} {:>8} {:>8} {:>8} {:>7}",
        "ID", "NAME", "SHARPE", "RET%", "DD%", "KELLY"
    );
    for s in strategies.iter().filter(|s| created.contains(&s.id)) {
        println!(
            "{:<38} {:<28} {:>8.2} {:>8.2} {:>8.2} {:>7.3}",
            s.id,
            s.name,
            s.metrics.sharpe,
            s.metrics.total_return_pct,
            s.metrics.max_drawdown_pct,
            s.kelly_fraction
        );
    }
}
