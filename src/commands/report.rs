//! Risk command: portfolio risk report from the cached equity history

use anyhow::{bail, Result};
use chrono::{Duration, Utc};

use papertrader::config::AppConfig;
use papertrader::portfolio;
use papertrader::risk;

pub fn run(config: AppConfig, confidence: f64, days: i64) -> Result<()> {
    if !(0.0..1.0).contains(&confidence) {
        bail!("confidence must be in [0, 1), got {confidence}");
    }

    let store = super::open_store(&config)?;
    portfolio::rebuild_cache(&store)?;

    let since = Utc::now() - Duration::days(days);
    let history = store.portfolio_history(since)?;
    let report = risk::assess(&history, confidence);

    println!("Portfolio risk over the last {days} day(s):");
    println!("  samples          {}", report.samples);
    println!("  max drawdown     {:.2}%", report.max_drawdown_pct);
    println!("  volatility       {:.2}%", report.volatility_pct);
    println!(
        "  VaR({:.0}%)          {:.2}",
        report.confidence * 100.0,
        report.value_at_risk
    );
    Ok(())
}
