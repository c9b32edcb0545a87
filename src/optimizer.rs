//! Randomized strategy search over live market history
//!
//! For every requested (symbol, interval) pair the optimizer fetches
//! candles once, scores a randomized population of strategy candidates
//! in parallel, and persists the best performers. Pairs whose data
//! cannot be fetched are skipped and reported rather than failing the
//! whole run.

use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rand::thread_rng;
use rayon::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backtest::{BacktestResult, Backtester};
use crate::error::{EngineError, Result};
use crate::market::{MarketDataProvider, INTERVALS};
use crate::store::Datastore;
use crate::strategies::{StrategyKind, StrategyParams};
use crate::{Candle, RequestGate, StrategyRecord};

/// Target resolution for the persisted backtest curve
const CURVE_POINTS: usize = 50;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
    /// Strategies kept per (symbol, interval) pair
    pub top_n: usize,
    /// Candles fetched per pair
    pub candle_limit: usize,
    /// Random candidates sampled per strategy family
    pub iterations: usize,
    pub initial_capital: f64,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        GenerateRequest {
            symbols: Vec::new(),
            intervals: vec!["1h".to_string()],
            top_n: 3,
            candle_limit: 500,
            iterations: 60,
            initial_capital: 10_000.0,
        }
    }
}

#[derive(Debug)]
pub struct SkippedItem {
    pub symbol: String,
    pub interval: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct GenerateReport {
    pub created: Vec<Uuid>,
    pub skipped: Vec<SkippedItem>,
}

pub struct StrategyOptimizer {
    provider: Arc<dyn MarketDataProvider>,
    gate: RequestGate,
    store: Arc<dyn Datastore>,
}

impl StrategyOptimizer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        gate: RequestGate,
        store: Arc<dyn Datastore>,
    ) -> Self {
        StrategyOptimizer {
            provider,
            gate,
            store,
        }
    }

    /// Search and persist strategies for every requested pair.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateReport> {
        validate(request)?;

        let pairs: Vec<(String, String)> = request
            .symbols
            .iter()
            .flat_map(|s| request.intervals.iter().map(move |i| (s.clone(), i.clone())))
            .collect();

        let bar = ProgressBar::new(pairs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut report = GenerateReport::default();
        for (symbol, interval) in pairs {
            bar.set_message(format!("{symbol} {interval}"));
            let candles = {
                let _permit = self.gate.acquire().await;
                self.provider
                    .fetch(&symbol, &interval, request.candle_limit)
                    .await
            };
            match candles {
                Ok(candles) => {
                    self.score_pair(request, &symbol, &interval, &candles, &mut report);
                }
                Err(e) if e.is_data_fetch() => {
                    warn!(%symbol, %interval, error = %e, "skipping pair");
                    report.skipped.push(SkippedItem {
                        symbol,
                        interval,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    bar.finish_and_clear();
                    return Err(e);
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "strategy generation finished"
        );
        Ok(report)
    }

    fn score_pair(
        &self,
        request: &GenerateRequest,
        symbol: &str,
        interval: &str,
        candles: &[Candle],
        report: &mut GenerateReport,
    ) {
        let candidates = candidate_population(request.iterations);
        let backtester = Backtester::new(request.initial_capital);

        let mut scored: Vec<(StrategyParams, BacktestResult)> = candidates
            .into_par_iter()
            .filter_map(|params| {
                backtester
                    .run(candles, &params)
                    .ok()
                    .filter(|r| r.metrics.sharpe.is_finite())
                    .map(|r| (params, r))
            })
            .collect();

        rank(&mut scored);
        scored.truncate(request.top_n);

        if scored.is_empty() {
            report.skipped.push(SkippedItem {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                reason: "no candidate produced a scoreable backtest".to_string(),
            });
            return;
        }

        for (params, result) in scored {
            let record = StrategyRecord {
                id: Uuid::new_v4(),
                name: format!("{symbol} {interval} {}", params.kind().name()),
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                params,
                metrics: result.metrics,
                backtest_curve: downsample_curve(&result.equity_curve),
                kelly_fraction: result.kelly_fraction,
                created_at: Utc::now(),
            };
            match self.store.insert_strategy(&record) {
                Ok(()) => report.created.push(record.id),
                Err(e) => {
                    warn!(%symbol, %interval, error = %e, "failed to persist strategy");
                    report.skipped.push(SkippedItem {
                        symbol: symbol.to_string(),
                        interval: interval.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

fn validate(request: &GenerateRequest) -> Result<()> {
    if request.symbols.is_empty() {
        return Err(EngineError::Validation("no symbols requested".into()));
    }
    if request.intervals.is_empty() {
        return Err(EngineError::Validation("no intervals requested".into()));
    }
    for interval in &request.intervals {
        if !INTERVALS.contains(&interval.as_str()) {
            return Err(EngineError::Validation(format!(
                "unsupported interval '{interval}'"
            )));
        }
    }
    if request.top_n == 0 {
        return Err(EngineError::Validation("top_n must be at least 1".into()));
    }
    if request.iterations == 0 {
        return Err(EngineError::Validation(
            "iterations must be at least 1".into(),
        ));
    }
    if !request.initial_capital.is_finite() || request.initial_capital <= 0.0 {
        return Err(EngineError::Validation(
            "initial capital must be positive".into(),
        ));
    }
    Ok(())
}

/// Default parameters plus `iterations` random draws per family.
fn candidate_population(iterations: usize) -> Vec<StrategyParams> {
    let mut rng = thread_rng();
    let mut candidates = Vec::with_capacity(StrategyKind::ALL.len() * (iterations + 1));
    for kind in StrategyKind::ALL {
        candidates.push(StrategyParams::default_for(kind));
        for _ in 0..iterations {
            candidates.push(StrategyParams::sample(kind, &mut rng));
        }
    }
    candidates
}

/// Sharpe descending, then smaller drawdown, then more trades.
fn rank(scored: &mut [(StrategyParams, BacktestResult)]) {
    scored.sort_by(|a, b| {
        b.1.metrics
            .sharpe
            .partial_cmp(&a.1.metrics.sharpe)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.1.metrics
                    .max_drawdown_pct
                    .partial_cmp(&b.1.metrics.max_drawdown_pct)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.1.metrics.trade_count.cmp(&a.1.metrics.trade_count))
    });
}

/// Thin the equity curve to roughly `CURVE_POINTS` samples, always
/// keeping the final value.
pub fn downsample_curve(curve: &[f64]) -> Vec<f64> {
    if curve.len() <= CURVE_POINTS {
        return curve.to_vec();
    }
    let step = curve.len().div_ceil(CURVE_POINTS);
    let mut out: Vec<f64> = curve.iter().copied().step_by(step).collect();
    let last = *curve.last().expect("non-empty curve");
    if out.last() != Some(&last) {
        out.push(last);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::PerformanceMetrics;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedProvider {
        candles: Vec<Candle>,
        fail_symbols: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for CannedProvider {
        async fn fetch(&self, symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_symbols.iter().any(|s| s == symbol) {
                return Err(EngineError::SymbolNotFound(symbol.to_string()));
            }
            Ok(self.candles.clone())
        }
    }

    fn trending_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now();
        (0..n)
            .map(|i| {
                // Up trend with a wiggle so every family gets signals
                let base = 100.0 + i as f64 * 0.8 + ((i % 7) as f64 - 3.0) * 2.0;
                Candle {
                    datetime: start + chrono::Duration::hours(i as i64),
                    open: base,
                    high: base + 1.5,
                    low: base - 1.5,
                    close: base + 0.5,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn request(symbols: &[&str]) -> GenerateRequest {
        GenerateRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            intervals: vec!["1h".into()],
            top_n: 2,
            candle_limit: 200,
            iterations: 10,
            initial_capital: 10_000.0,
        }
    }

    fn optimizer(provider: CannedProvider) -> (StrategyOptimizer, Arc<dyn Datastore>) {
        let store: Arc<dyn Datastore> = Arc::new(SqliteStore::in_memory().unwrap());
        let opt = StrategyOptimizer::new(
            Arc::new(provider),
            RequestGate::with_defaults(),
            Arc::clone(&store),
        );
        (opt, store)
    }

    #[tokio::test]
    async fn generates_ranked_strategies_per_pair() {
        let provider = CannedProvider {
            candles: trending_candles(200),
            fail_symbols: vec![],
            calls: AtomicUsize::new(0),
        };
        let (opt, store) = optimizer(provider);

        let report = opt.generate(&request(&["BTCUSDT"])).await.unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.skipped.is_empty());

        assert_eq!(store.list_strategies().unwrap().len(), 2);
        // report.created preserves rank order: best Sharpe first
        let ranked: Vec<_> = report
            .created
            .iter()
            .map(|id| store.get_strategy(*id).unwrap())
            .collect();
        for s in &ranked {
            assert!(s.name.starts_with("BTCUSDT 1h "));
            assert!(s.backtest_curve.len() <= CURVE_POINTS + 1);
            assert!(s.kelly_fraction >= 0.0 && s.kelly_fraction <= 1.0);
        }
        assert!(ranked[0].metrics.sharpe >= ranked[1].metrics.sharpe - 1e-12);
    }

    #[tokio::test]
    async fn failed_symbols_are_skipped_not_fatal() {
        let provider = CannedProvider {
            candles: trending_candles(200),
            fail_symbols: vec!["NOPEUSDT".into()],
            calls: AtomicUsize::new(0),
        };
        let (opt, store) = optimizer(provider);

        let report = opt
            .generate(&request(&["NOPEUSDT", "BTCUSDT"]))
            .await
            .unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].symbol, "NOPEUSDT");
        assert_eq!(report.created.len(), 2);
        assert_eq!(store.list_strategies().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn short_history_skips_the_pair() {
        let provider = CannedProvider {
            candles: trending_candles(5),
            fail_symbols: vec![],
            calls: AtomicUsize::new(0),
        };
        let (opt, store) = optimizer(provider);

        let report = opt.generate(&request(&["BTCUSDT"])).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(store.list_strategies().unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_bad_requests() {
        let provider = CannedProvider {
            candles: vec![],
            fail_symbols: vec![],
            calls: AtomicUsize::new(0),
        };
        let (opt, _) = optimizer(provider);

        let mut bad = request(&[]);
        assert!(matches!(
            opt.generate(&bad).await,
            Err(EngineError::Validation(_))
        ));

        bad = request(&["BTCUSDT"]);
        bad.intervals = vec!["9h".into()];
        assert!(matches!(
            opt.generate(&bad).await,
            Err(EngineError::Validation(_))
        ));

        bad = request(&["BTCUSDT"]);
        bad.top_n = 0;
        assert!(matches!(
            opt.generate(&bad).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn downsample_keeps_endpoints() {
        let curve: Vec<f64> = (0..237).map(|i| i as f64).collect();
        let thinned = downsample_curve(&curve);
        assert!(thinned.len() <= CURVE_POINTS + 1);
        assert_eq!(thinned[0], 0.0);
        assert_eq!(*thinned.last().unwrap(), 236.0);
    }

    #[test]
    fn downsample_passes_short_curves_through() {
        let curve = vec![1.0, 2.0, 3.0];
        assert_eq!(downsample_curve(&curve), curve);
    }

    #[test]
    fn ranking_prefers_sharpe_then_drawdown() {
        let mk = |sharpe: f64, dd: f64| {
            let metrics = PerformanceMetrics {
                sharpe,
                win_rate: 0.5,
                total_return_pct: 1.0,
                max_drawdown_pct: dd,
                trade_count: 4,
                profit_factor: 1.2,
            };
            (
                StrategyParams::default_for(StrategyKind::Breakout),
                BacktestResult {
                    equity_curve: vec![100.0, 101.0],
                    trades: vec![],
                    metrics,
                    kelly_fraction: 0.0,
                },
            )
        };

        let mut scored = vec![mk(1.0, 5.0), mk(2.0, 20.0), mk(2.0, 10.0)];
        rank(&mut scored);
        assert_eq!(scored[0].1.metrics.max_drawdown_pct, 10.0);
        assert_eq!(scored[1].1.metrics.max_drawdown_pct, 20.0);
        assert_eq!(scored[2].1.metrics.sharpe, 1.0);
    }
}
