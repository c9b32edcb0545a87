//! papertrader - strategy optimizer and paper-trading engine
//!
//! Subcommands:
//! - generate: search strategy parameterizations and persist the best
//! - list: show persisted strategies and sessions
//! - deploy / deploy-bulk: start paper-trading sessions
//! - run: poll live candles and tick active sessions
//! - risk: portfolio risk report
//! - reset: stop every session

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use papertrader::config::AppConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "papertrader")]
#[command(about = "Strategy optimization and paper trading against live market data", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search strategy parameterizations and persist the top performers
    Generate {
        /// Symbols to optimize (comma-separated). E.g., "BTCUSDT,ETHUSDT"
        #[arg(short, long)]
        symbols: String,

        /// Candle intervals (comma-separated). E.g., "1h,4h"
        #[arg(short, long, default_value = "1h")]
        intervals: String,

        /// Strategies kept per symbol/interval pair
        #[arg(short, long, default_value = "3")]
        top: usize,

        /// Candles fetched per pair
        #[arg(long, default_value = "500")]
        limit: usize,

        /// Random candidates per strategy family
        #[arg(long, default_value = "60")]
        iterations: usize,

        /// Backtest starting capital
        #[arg(long, default_value = "10000")]
        capital: f64,
    },

    /// Show persisted strategies and sessions
    List,

    /// Deploy one strategy into a paper-trading session
    Deploy {
        /// Strategy id to deploy
        strategy_id: String,

        /// Capital for the session
        #[arg(long, default_value = "10000")]
        capital: f64,

        /// Execution mode: sync or edge
        #[arg(long, default_value = "sync")]
        mode: String,
    },

    /// Deploy several strategies, splitting capital by Kelly fraction
    DeployBulk {
        /// Strategy ids (comma-separated)
        strategy_ids: String,

        /// Total capital to split across the sessions
        #[arg(long, default_value = "10000")]
        capital: f64,

        /// Execution mode: sync or edge
        #[arg(long, default_value = "sync")]
        mode: String,
    },

    /// Stop one session
    Stop {
        /// Session id to stop
        session_id: String,
    },

    /// Delete one strategy
    Delete {
        /// Strategy id to delete
        strategy_id: String,
    },

    /// Delete every strategy
    DeleteAll,

    /// Show the trade ledger and equity range for a session
    Trades {
        /// Session id
        session_id: String,
    },

    /// Poll live candles and tick active sessions
    Run {
        /// Stop after this many polling cycles (runs forever if unset)
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Portfolio risk report from cached equity history
    Risk {
        /// VaR confidence level
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// History window in days
        #[arg(long, default_value = "30")]
        days: i64,
    },

    /// Stop every session
    Reset,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            symbols,
            intervals,
            top,
            limit,
            iterations,
            capital,
        } => commands::generate::run(config, symbols, intervals, top, limit, iterations, capital),

        Commands::List => commands::sessions::list(config),

        Commands::Deploy {
            strategy_id,
            capital,
            mode,
        } => commands::sessions::deploy(config, strategy_id, capital, mode),

        Commands::DeployBulk {
            strategy_ids,
            capital,
            mode,
        } => commands::sessions::deploy_bulk(config, strategy_ids, capital, mode),

        Commands::Stop { session_id } => commands::sessions::stop(config, session_id),

        Commands::Delete { strategy_id } => commands::sessions::delete_strategy(config, strategy_id),

        Commands::DeleteAll => commands::sessions::delete_all_strategies(config),

        Commands::Trades { session_id } => commands::sessions::trades(config, session_id),

        Commands::Run { cycles } => commands::run::run(config, cycles),

        Commands::Risk { confidence, days } => commands::report::run(config, confidence, days),

        Commands::Reset => commands::sessions::reset(config),
    }
}
