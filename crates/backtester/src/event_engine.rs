//! Event-stepped backtest engine.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger_core::clock::{SequentialIds, SimulatedClock};
use ledger_core::provider::DataProvider;
use ledger_core::types::{
    BacktestDateRange, BacktestRun, GuardAllocation, OrderData, OrderSide, OrderStatus,
    OrderType, OrderUpdate, PortfolioConfiguration, TimeFrame, TradeAllocation,
};
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};
use trading_engine::{
    LedgerStore, OrderService, PortfolioService, PositionService, SnapshotService, TradeService,
};
use uuid::Uuid;

use crate::execution::SimulatedExecutor;
use crate::schedule::generate_schedule;
use crate::strategy::{AlgorithmContext, Strategy, Task};

/// Configuration for one event-stepped run.
#[derive(Debug, Clone)]
pub struct EventBacktestConfig {
    pub market: String,
    pub trading_symbol: String,
    pub initial_balance: Decimal,
}

impl Default for EventBacktestConfig {
    fn default() -> Self {
        Self {
            market: "BINANCE".to_string(),
            trading_symbol: "EUR".to_string(),
            initial_balance: Decimal::new(10000, 0),
        }
    }
}

/// The ledger stack one simulation runs against, isolated per strategy.
struct SimulationStack {
    store: Arc<LedgerStore>,
    clock: Arc<SimulatedClock>,
    orders: Arc<OrderService>,
    trades: Arc<TradeService>,
    snapshots: Arc<SnapshotService>,
}

/// Time-stepped strategy scheduler replaying the ledger against
/// historical bars.
///
/// Determinism contract: given identical strategies, schedule, and
/// historical data, two runs produce bit-identical `BacktestRun` output.
/// The engine therefore uses a simulated clock and counter-derived ids —
/// no wall-clock reads and no random ids on the hot path.
pub struct EventBacktester {
    data: Arc<dyn DataProvider>,
    config: EventBacktestConfig,
}

impl EventBacktester {
    pub fn new(data: Arc<dyn DataProvider>, config: EventBacktestConfig) -> Self {
        Self { data, config }
    }

    /// Run one strategy over the window. With `resume`, the ledger is
    /// seeded from a prior run's final state so adjacent windows chain
    /// exactly (used by walk-forward checkpointing).
    pub async fn run(
        &self,
        strategy: Arc<dyn Strategy>,
        tasks: &[Arc<dyn Task>],
        range: &BacktestDateRange,
        resume: Option<&BacktestRun>,
    ) -> Result<BacktestRun> {
        info!(
            strategy = strategy.id(),
            start = %range.start,
            end = %range.end,
            resumed = resume.is_some(),
            "Starting event backtest"
        );

        let resume = resume.filter(|r| r.portfolio.is_some());
        let run_index = resume.map(|r| r.number_of_runs).unwrap_or(0);
        let stack = self.build_stack(range, run_index);

        let (portfolio_id, initial_unallocated) = match resume {
            Some(prior) => (self.seed_from_run(&stack, prior), prior.initial_unallocated),
            None => {
                let configuration = PortfolioConfiguration::new(
                    strategy.id(),
                    self.config.market.clone(),
                    self.config.trading_symbol.clone(),
                    self.config.initial_balance,
                );
                let portfolio = self
                    .build_portfolio_service(&stack)
                    .create_from_configuration(&configuration)
                    .await?;
                (portfolio.id, self.config.initial_balance)
            }
        };

        // Finest declared frame per symbol drives limit-order evaluation.
        let eval_frames: HashMap<String, TimeFrame> = {
            let mut frames: HashMap<String, TimeFrame> = HashMap::new();
            for source in strategy.data_sources() {
                frames
                    .entry(source.symbol.clone())
                    .and_modify(|f| *f = (*f).min(source.time_frame))
                    .or_insert(source.time_frame);
            }
            frames
        };

        let ctx = AlgorithmContext::new(
            portfolio_id,
            self.config.market.clone(),
            self.config.trading_symbol.clone(),
            stack.store.clone(),
            stack.orders.clone(),
            stack.trades.clone(),
            self.data.clone(),
            stack.clock.clone(),
        );

        let schedule = generate_schedule(
            std::slice::from_ref(&strategy),
            tasks,
            range.start,
            range.end,
        );
        let mut previous: Option<DateTime<Utc>> = None;

        for (&timestamp, entry) in &schedule {
            stack.clock.set(timestamp);

            if let Some(previous) = previous {
                self.evaluate_pending_orders(&stack, portfolio_id, &eval_frames, previous, timestamp)
                    .await?;
            }
            self.evaluate_guards(&stack, portfolio_id, timestamp).await?;

            for id in &entry.strategy_ids {
                if id == strategy.id() {
                    strategy.on_run(&ctx).await?;
                }
            }
            for task in tasks {
                if entry.task_ids.iter().any(|id| id == task.id()) {
                    task.on_run(&ctx).await?;
                }
            }
            previous = Some(timestamp);
        }

        stack.clock.set(range.end);
        stack.snapshots.create_snapshot(portfolio_id, range.end).await?;

        let run = BacktestRun {
            strategy_id: strategy.id().to_string(),
            start: range.start,
            end: range.end,
            initial_unallocated,
            portfolio: stack.store.get_portfolio(portfolio_id),
            positions: stack.store.positions_for_portfolio(portfolio_id),
            orders: stack.store.orders_for_portfolio(portfolio_id),
            trades: stack.store.trades_for_portfolio(portfolio_id),
            snapshots: stack.store.snapshots_for_portfolio(portfolio_id),
            signal_events: Vec::new(),
            number_of_runs: run_index + 1,
            created_at: range.end,
        };

        info!(
            strategy = strategy.id(),
            orders = run.orders.len(),
            trades = run.trades.len(),
            final_value = ?run.final_total_value(),
            "Event backtest completed"
        );
        Ok(run)
    }

    fn build_stack(&self, range: &BacktestDateRange, run_index: u32) -> SimulationStack {
        let store = Arc::new(LedgerStore::new());
        // Offset the id counter per window so resumed windows never
        // collide with entities seeded from prior runs.
        let ids = Arc::new(SequentialIds::starting_at((run_index as u64) << 40));
        let clock = Arc::new(SimulatedClock::new(range.start));

        let portfolios = Arc::new(PortfolioService::new(
            store.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let positions = Arc::new(PositionService::new(
            store.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let trades = Arc::new(TradeService::new(store.clone(), ids.clone(), clock.clone()));
        let snapshots = Arc::new(SnapshotService::new(
            store.clone(),
            self.data.clone(),
            ids.clone(),
        ));
        let orders = Arc::new(
            OrderService::new(
                store.clone(),
                portfolios,
                positions,
                trades.clone(),
                snapshots.clone(),
                ids,
                clock.clone(),
            )
            .with_executor(Arc::new(SimulatedExecutor::new())),
        );

        SimulationStack {
            store,
            clock,
            orders,
            trades,
            snapshots,
        }
    }

    fn build_portfolio_service(&self, stack: &SimulationStack) -> PortfolioService {
        // Only needed for fresh runs; shares the stack's store and clock.
        PortfolioService::new(
            stack.store.clone(),
            Arc::new(SequentialIds::starting_at(u64::MAX >> 1)),
            stack.clock.clone(),
        )
    }

    /// Seed the fresh stack with the final ledger state of a prior
    /// window: portfolio, positions, open trades, and live orders.
    fn seed_from_run(&self, stack: &SimulationStack, prior: &BacktestRun) -> Uuid {
        let portfolio = prior
            .portfolio
            .clone()
            .expect("resume requires a portfolio");
        let portfolio_id = portfolio.id;
        stack.store.insert_portfolio(portfolio);
        for position in &prior.positions {
            stack.store.insert_position(position.clone());
        }
        for trade in prior.trades.iter().filter(|t| t.is_open()) {
            stack.store.insert_trade(trade.clone());
        }
        for order in prior
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
        {
            stack.store.insert_order(order.clone());
        }
        debug!(portfolio_id = %portfolio_id, "Seeded ledger from prior run");
        portfolio_id
    }

    /// Fill live limit orders whose price was traded through in the bars
    /// since the previous step: buys when the range dipped to the limit,
    /// sells when it reached it.
    async fn evaluate_pending_orders(
        &self,
        stack: &SimulationStack,
        portfolio_id: Uuid,
        eval_frames: &HashMap<String, TimeFrame>,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for order in stack.store.pending_orders(portfolio_id) {
            if order.status != OrderStatus::Open || order.order_type != OrderType::Limit {
                continue;
            }
            let frame = eval_frames.get(&order.target_symbol).copied().ok_or_else(|| {
                Error::MissingData {
                    symbol: order.target_symbol.clone(),
                    market: self.config.market.clone(),
                    detail: "symbol not declared in strategy data sources".to_string(),
                }
            })?;
            let bars = self
                .data
                .get_ohlcv_data(&order.target_symbol, &self.config.market, frame, previous, now)
                .await?;
            let crossed = bars
                .iter()
                .filter(|b| b.timestamp > previous && b.timestamp <= now)
                .any(|bar| match order.side {
                    OrderSide::Buy => bar.low <= order.price,
                    OrderSide::Sell => bar.high >= order.price,
                });
            if crossed {
                debug!(
                    order_id = %order.id,
                    side = ?order.side,
                    price = %order.price,
                    "Limit order filled from bar range"
                );
                stack
                    .orders
                    .update(order.id, OrderUpdate::filled(order.amount))
                    .await?;
            }
        }
        Ok(())
    }

    /// Evaluate stop-loss and take-profit guards at current prices,
    /// raising market sells that carry the guard allocation metadata.
    /// Stop-losses run before take-profits.
    async fn evaluate_guards(
        &self,
        stack: &SimulationStack,
        portfolio_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let symbols: BTreeSet<String> = stack
            .store
            .open_trades(portfolio_id)
            .iter()
            .map(|t| t.target_symbol.clone())
            .collect();

        for symbol in symbols {
            let price = self
                .data
                .get_ticker_data(&symbol, &self.config.market, now)
                .await?
                .price;
            stack
                .trades
                .update_high_water_marks(portfolio_id, &symbol, price);

            for trade in stack.store.open_trades_for_symbol(portfolio_id, &symbol) {
                for guard in stack.store.stop_losses_for_trade(trade.id) {
                    // Reservations may have changed within this loop.
                    let trade = match stack.store.get_trade(trade.id) {
                        Some(t) if t.is_open() => t,
                        _ => break,
                    };
                    if guard.is_triggered(&trade, price) {
                        let amount = guard.sell_amount(&trade);
                        if amount > Decimal::ZERO {
                            self.raise_guard_sell(
                                stack,
                                portfolio_id,
                                &trade.target_symbol,
                                trade.id,
                                guard.id,
                                true,
                                amount,
                                price,
                            )
                            .await?;
                        }
                    }
                }
                for guard in stack.store.take_profits_for_trade(trade.id) {
                    let trade = match stack.store.get_trade(trade.id) {
                        Some(t) if t.is_open() => t,
                        _ => break,
                    };
                    if guard.is_triggered(&trade, price) {
                        let amount = guard.sell_amount(&trade);
                        if amount > Decimal::ZERO {
                            self.raise_guard_sell(
                                stack,
                                portfolio_id,
                                &trade.target_symbol,
                                trade.id,
                                guard.id,
                                false,
                                amount,
                                price,
                            )
                            .await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn raise_guard_sell(
        &self,
        stack: &SimulationStack,
        portfolio_id: Uuid,
        symbol: &str,
        trade_id: Uuid,
        guard_id: Uuid,
        is_stop_loss: bool,
        amount: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let allocation = GuardAllocation {
            guard_id,
            trade_id,
            amount,
        };
        let mut data = OrderData::market_sell(
            portfolio_id,
            symbol,
            self.config.trading_symbol.clone(),
            amount,
            price,
        )
        .with_trade_allocations(vec![TradeAllocation::new(trade_id, amount)]);
        if is_stop_loss {
            data = data.with_stop_loss_allocations(vec![allocation]);
        } else {
            data = data.with_take_profit_allocations(vec![allocation]);
        }
        debug!(
            trade_id = %trade_id,
            guard_id = %guard_id,
            stop_loss = is_stop_loss,
            amount = %amount,
            price = %price,
            "Guard triggered, raising market sell"
        );
        stack.orders.create(data, true, true, true).await?;
        Ok(())
    }
}
