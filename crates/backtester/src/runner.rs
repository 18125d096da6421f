//! Walk-forward orchestration over checkpointed backtest windows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger_core::types::{BacktestDateRange, BacktestRun, Order, PortfolioSnapshot, Trade};
use ledger_core::Result;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::event_engine::EventBacktester;
use crate::strategy::Strategy;

/// Prunes the active strategy set given the latest results; returns the
/// ids that survive.
pub type StrategyFilter =
    Arc<dyn Fn(&HashMap<String, BacktestRun>) -> Vec<String> + Send + Sync>;

/// Options for a walk-forward batch.
#[derive(Clone, Default)]
pub struct WalkForwardOptions {
    /// Map a strategy's failure to an empty run instead of aborting the
    /// batch.
    pub continue_on_error: bool,
    /// Applied to each window's results; dropped strategies stop running
    /// and their intermediate results are released immediately.
    pub window_filter: Option<StrategyFilter>,
    /// Applied once to the cumulative results after all windows.
    pub final_filter: Option<StrategyFilter>,
}

/// Runs many strategies across one or many windows, reusing persisted
/// checkpoints and carrying each strategy's ledger state forward so that
/// split windows chain exactly.
pub struct BacktestRunner {
    engine: EventBacktester,
    checkpoints: CheckpointStore,
}

impl BacktestRunner {
    pub fn new(engine: EventBacktester, checkpoints: CheckpointStore) -> Self {
        Self {
            engine,
            checkpoints,
        }
    }

    /// Single-window batch: every strategy over one range.
    pub async fn run(
        &self,
        strategies: Vec<Arc<dyn Strategy>>,
        range: &BacktestDateRange,
        options: &WalkForwardOptions,
    ) -> Result<HashMap<String, BacktestRun>> {
        self.run_walk_forward(strategies, std::slice::from_ref(range), options)
            .await
    }

    /// Walk-forward batch. Per window: load checkpoints, run only the
    /// missing strategies (resuming from cumulative state), combine into
    /// one cumulative run per strategy, and let the window filter prune
    /// the active set before the next window.
    pub async fn run_walk_forward(
        &self,
        strategies: Vec<Arc<dyn Strategy>>,
        windows: &[BacktestDateRange],
        options: &WalkForwardOptions,
    ) -> Result<HashMap<String, BacktestRun>> {
        let mut active = strategies;
        let mut cumulative: HashMap<String, BacktestRun> = HashMap::new();

        for (window_index, window) in windows.iter().enumerate() {
            info!(
                window = window_index,
                start = %window.start,
                end = %window.end,
                strategies = active.len(),
                "Walk-forward window"
            );
            let mut window_results: HashMap<String, BacktestRun> = HashMap::new();

            for strategy in &active {
                let id = strategy.id().to_string();
                let run = match self.checkpoints.load(&id, window)? {
                    Some(run) => run,
                    None => {
                        let resume = cumulative.get(&id);
                        match self
                            .engine
                            .run(strategy.clone(), &[], window, resume)
                            .await
                        {
                            Ok(run) => {
                                self.checkpoints.save(&run)?;
                                run
                            }
                            Err(e) if options.continue_on_error => {
                                warn!(
                                    strategy = %id,
                                    error = %e,
                                    "Strategy backtest failed, recording empty run"
                                );
                                BacktestRun::empty(&id, window)
                            }
                            Err(e) => return Err(e),
                        }
                    }
                };
                window_results.insert(id, run);
            }

            for (id, run) in &window_results {
                let combined = match cumulative.remove(id) {
                    Some(prev) => combine_runs(&prev, run),
                    None => run.clone(),
                };
                cumulative.insert(id.clone(), combined);
            }

            if let Some(filter) = &options.window_filter {
                let survivors = filter(&window_results);
                active.retain(|s| survivors.iter().any(|id| id == s.id()));
                // Dropped strategies' results are released immediately.
                cumulative.retain(|id, _| survivors.iter().any(|s| s == id));
                info!(
                    window = window_index,
                    survivors = active.len(),
                    "Window filter applied"
                );
            }
            drop(window_results);
        }

        if let Some(filter) = &options.final_filter {
            let survivors = filter(&cumulative);
            cumulative.retain(|id, _| survivors.iter().any(|s| s == id));
        }

        // Persist the combined run for each survivor under its full range.
        for run in cumulative.values() {
            self.checkpoints.save(run)?;
        }
        Ok(cumulative)
    }
}

/// Combine two adjacent window runs into one cumulative run: orders and
/// trades merge by id (the later window's version wins, since it resumed
/// from the earlier state), snapshots dedupe on their unique timestamp
/// key, and the final ledger state comes from the later window.
pub fn combine_runs(prev: &BacktestRun, next: &BacktestRun) -> BacktestRun {
    if prev.portfolio.is_none() {
        return next.clone();
    }
    if next.portfolio.is_none() {
        // The later window failed: keep the cumulative state, extend the
        // covered range.
        let mut combined = prev.clone();
        combined.end = next.end;
        return combined;
    }

    let mut orders: BTreeMap<Uuid, Order> = prev
        .orders
        .iter()
        .map(|o| (o.id, o.clone()))
        .collect();
    for order in &next.orders {
        orders.insert(order.id, order.clone());
    }
    let mut orders: Vec<Order> = orders.into_values().collect();
    orders.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

    let mut trades: BTreeMap<Uuid, Trade> = prev
        .trades
        .iter()
        .map(|t| (t.id, t.clone()))
        .collect();
    for trade in &next.trades {
        trades.insert(trade.id, trade.clone());
    }
    let mut trades: Vec<Trade> = trades.into_values().collect();
    trades.sort_by(|a, b| (a.opened_at, a.id).cmp(&(b.opened_at, b.id)));

    let mut snapshots: BTreeMap<(Uuid, DateTime<Utc>), PortfolioSnapshot> = BTreeMap::new();
    for snapshot in prev.snapshots.iter().chain(next.snapshots.iter()) {
        snapshots.insert((snapshot.portfolio_id, snapshot.created_at), snapshot.clone());
    }
    let snapshots: Vec<PortfolioSnapshot> = snapshots.into_values().collect();

    let mut signal_events = prev.signal_events.clone();
    signal_events.extend(next.signal_events.iter().cloned());

    BacktestRun {
        strategy_id: next.strategy_id.clone(),
        start: prev.start,
        end: next.end,
        initial_unallocated: prev.initial_unallocated,
        portfolio: next.portfolio.clone(),
        positions: next.positions.clone(),
        orders,
        trades,
        snapshots,
        signal_events,
        number_of_runs: prev.number_of_runs + 1,
        created_at: next.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticDataProvider;
    use crate::event_engine::{EventBacktestConfig, EventBacktester};
    use crate::strategy::AlgorithmContext;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use ledger_core::types::{DataSource, Ohlcv, TimeFrame, TimeUnit};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn btc_source() -> DataSource {
        DataSource::new("BTC", "BINANCE", TimeFrame::OneDay)
    }

    fn provider() -> Arc<StaticDataProvider> {
        let bars: Vec<Ohlcv> = (1..=6)
            .map(|d| {
                let close = 100 + (d as i64) * 5;
                Ohlcv {
                    timestamp: day(d),
                    open: Decimal::new(close, 0),
                    high: Decimal::new(close + 3, 0),
                    low: Decimal::new(close - 3, 0),
                    close: Decimal::new(close, 0),
                    volume: Decimal::new(1000, 0),
                }
            })
            .collect();
        Arc::new(StaticDataProvider::new().with_series(btc_source(), bars))
    }

    /// Buys at day 1, sells everything at `sell_day`, counts invocations.
    struct RoundTripStrategy {
        id: String,
        sell_day: u32,
        runs: Arc<AtomicU32>,
    }

    impl RoundTripStrategy {
        fn new(id: &str, sell_day: u32) -> (Arc<dyn Strategy>, Arc<AtomicU32>) {
            let runs = Arc::new(AtomicU32::new(0));
            (
                Arc::new(Self {
                    id: id.to_string(),
                    sell_day,
                    runs: runs.clone(),
                }),
                runs,
            )
        }
    }

    #[async_trait]
    impl Strategy for RoundTripStrategy {
        fn id(&self) -> &str {
            &self.id
        }
        fn time_unit(&self) -> TimeUnit {
            TimeUnit::Day
        }
        fn interval(&self) -> u32 {
            1
        }
        fn data_sources(&self) -> Vec<DataSource> {
            vec![btc_source()]
        }

        async fn on_run(&self, ctx: &AlgorithmContext) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = ctx.now();
            if now == day(1) {
                ctx.buy_market("BTC", Decimal::new(10, 0)).await?;
            }
            if now == day(self.sell_day) {
                if let Some(trade) = ctx.open_trades("BTC").first() {
                    if trade.available_amount > Decimal::ZERO {
                        ctx.sell_market("BTC", trade.available_amount).await?;
                    }
                }
            }
            Ok(())
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl Strategy for FailingStrategy {
        fn id(&self) -> &str {
            "failing"
        }
        fn time_unit(&self) -> TimeUnit {
            TimeUnit::Day
        }
        fn interval(&self) -> u32 {
            1
        }
        fn data_sources(&self) -> Vec<DataSource> {
            vec![btc_source()]
        }
        async fn on_run(&self, _ctx: &AlgorithmContext) -> Result<()> {
            Err(ledger_core::Error::Execution("boom".to_string()))
        }
    }

    fn runner(dir: &std::path::Path) -> BacktestRunner {
        BacktestRunner::new(
            EventBacktester::new(provider(), EventBacktestConfig::default()),
            CheckpointStore::new(dir),
        )
    }

    #[tokio::test]
    async fn test_split_windows_equal_single_window() {
        let whole_dir = tempfile::tempdir().unwrap();
        let split_dir = tempfile::tempdir().unwrap();

        let (strategy, _) = RoundTripStrategy::new("rt", 5);
        let whole = runner(whole_dir.path())
            .run(
                vec![strategy],
                &BacktestDateRange::new(day(1), day(5)),
                &WalkForwardOptions::default(),
            )
            .await
            .unwrap();

        let (strategy, _) = RoundTripStrategy::new("rt", 5);
        let split = runner(split_dir.path())
            .run_walk_forward(
                vec![strategy],
                &[
                    BacktestDateRange::new(day(1), day(2)),
                    BacktestDateRange::new(day(3), day(5)),
                ],
                &WalkForwardOptions::default(),
            )
            .await
            .unwrap();

        let whole = &whole["rt"];
        let split = &split["rt"];
        assert_eq!(whole.final_total_value(), split.final_total_value());
        assert_eq!(whole.realized(), split.realized());
        assert_eq!(whole.closed_trade_count(), split.closed_trade_count());
        assert_eq!(whole.trades.len(), split.trades.len());
        assert_eq!(split.number_of_runs, 2);
    }

    #[tokio::test]
    async fn test_continue_on_error_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (good, _) = RoundTripStrategy::new("good", 3);

        let results = runner(dir.path())
            .run(
                vec![good, Arc::new(FailingStrategy)],
                &BacktestDateRange::new(day(1), day(3)),
                &WalkForwardOptions {
                    continue_on_error: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(results["failing"].portfolio.is_none());
        assert!(results["good"].portfolio.is_some());
        assert_eq!(results["good"].closed_trade_count(), 1);
    }

    #[tokio::test]
    async fn test_error_aborts_batch_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .run(
                vec![Arc::new(FailingStrategy) as Arc<dyn Strategy>],
                &BacktestDateRange::new(day(1), day(2)),
                &WalkForwardOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ledger_core::Error::Execution(_)));
    }

    #[tokio::test]
    async fn test_checkpoints_skip_recomputation() {
        let dir = tempfile::tempdir().unwrap();
        let range = BacktestDateRange::new(day(1), day(3));

        let (strategy, runs) = RoundTripStrategy::new("cached", 3);
        runner(dir.path())
            .run(vec![strategy], &range, &WalkForwardOptions::default())
            .await
            .unwrap();
        let first_invocations = runs.load(Ordering::SeqCst);
        assert!(first_invocations > 0);

        // Same window again: the checkpoint satisfies it without running.
        let (strategy, runs) = RoundTripStrategy::new("cached", 3);
        let results = runner(dir.path())
            .run(vec![strategy], &range, &WalkForwardOptions::default())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(results["cached"].closed_trade_count(), 1);
    }

    #[tokio::test]
    async fn test_window_filter_prunes_progressively() {
        let dir = tempfile::tempdir().unwrap();
        let (alpha, _) = RoundTripStrategy::new("alpha", 5);
        let (beta, beta_runs) = RoundTripStrategy::new("beta", 5);

        let filter: StrategyFilter = Arc::new(|_results| vec!["alpha".to_string()]);
        let results = runner(dir.path())
            .run_walk_forward(
                vec![alpha, beta],
                &[
                    BacktestDateRange::new(day(1), day(2)),
                    BacktestDateRange::new(day(3), day(5)),
                ],
                &WalkForwardOptions {
                    window_filter: Some(filter),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Beta was dropped after window one and never ran in window two.
        assert!(results.contains_key("alpha"));
        assert!(!results.contains_key("beta"));
        assert_eq!(beta_runs.load(Ordering::SeqCst), 2); // days 1 and 2 only

        // Alpha's combined run covers the full range.
        assert_eq!(results["alpha"].start, day(1));
        assert_eq!(results["alpha"].end, day(5));
        assert_eq!(results["alpha"].closed_trade_count(), 1);
    }

    #[tokio::test]
    async fn test_final_filter_prunes_once_more() {
        let dir = tempfile::tempdir().unwrap();
        let (alpha, _) = RoundTripStrategy::new("alpha", 3);
        let (beta, _) = RoundTripStrategy::new("beta", 3);

        let filter: StrategyFilter = Arc::new(|_results| vec!["beta".to_string()]);
        let results = runner(dir.path())
            .run(
                vec![alpha, beta],
                &BacktestDateRange::new(day(1), day(3)),
                &WalkForwardOptions {
                    final_filter: Some(filter),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("beta"));
    }
}
