//! Subcommand implementations for the papertrader binary

pub mod generate;
pub mod report;
pub mod run;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use papertrader::config::AppConfig;
use papertrader::manager::SessionManager;
use papertrader::market::BinanceProvider;
use papertrader::store::{Datastore, SqliteStore};
use papertrader::RequestGate;

fn open_store(config: &AppConfig) -> Result<Arc<dyn Datastore>> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path))?;
    Ok(Arc::new(store))
}

fn build_manager(config: &AppConfig, store: Arc<dyn Datastore>) -> SessionManager {
    let (attempts, backoff) = config.persistence_retry();
    SessionManager::new(store).with_persistence_retry(attempts, backoff)
}

fn build_provider(config: &AppConfig) -> Result<Arc<BinanceProvider>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.provider.timeout_secs))
        .build()
        .context("failed to build http client")?;
    Ok(Arc::new(BinanceProvider::with_client(
        client,
        config.provider.base_url.clone(),
    )))
}

fn build_gate(config: &AppConfig) -> RequestGate {
    RequestGate::new(config.gate_config())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}
