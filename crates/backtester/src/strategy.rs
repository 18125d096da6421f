//! Strategy interfaces and the context facade they trade through.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ledger_core::clock::Clock;
use ledger_core::provider::DataProvider;
use ledger_core::types::{
    DataSource, Ohlcv, Order, OrderData, Portfolio, Position, StopLoss, TakeProfit, TimeFrame,
    TimeUnit, Trade, TradeRiskType,
};
use ledger_core::Result;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use trading_engine::{LedgerStore, OrderService, TradeService};
use uuid::Uuid;

/// What a strategy sees of the runtime. Orders are the only way in —
/// strategies never mutate ledger entities directly.
pub struct AlgorithmContext {
    portfolio_id: Uuid,
    market: String,
    trading_symbol: String,
    store: Arc<LedgerStore>,
    orders: Arc<OrderService>,
    trades: Arc<TradeService>,
    data: Arc<dyn DataProvider>,
    clock: Arc<dyn Clock>,
}

impl AlgorithmContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        portfolio_id: Uuid,
        market: impl Into<String>,
        trading_symbol: impl Into<String>,
        store: Arc<LedgerStore>,
        orders: Arc<OrderService>,
        trades: Arc<TradeService>,
        data: Arc<dyn DataProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            portfolio_id,
            market: market.into(),
            trading_symbol: trading_symbol.into(),
            store,
            orders,
            trades,
            data,
            clock,
        }
    }

    /// Current time: simulated during backtests, wall clock live.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn portfolio_id(&self) -> Uuid {
        self.portfolio_id
    }

    pub fn portfolio(&self) -> Result<Portfolio> {
        self.store
            .get_portfolio(self.portfolio_id)
            .ok_or_else(|| ledger_core::Error::PortfolioNotFound(self.portfolio_id.to_string()))
    }

    pub fn unallocated(&self) -> Result<Decimal> {
        Ok(self.portfolio()?.unallocated)
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.store.find_position(self.portfolio_id, symbol)
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.position(symbol)
            .is_some_and(|p| p.amount > Decimal::ZERO)
    }

    pub fn open_trades(&self, symbol: &str) -> Vec<Trade> {
        self.store.open_trades_for_symbol(self.portfolio_id, symbol)
    }

    /// Bars for the symbol over `[now − lookback, now]`.
    pub async fn ohlcv(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        lookback: Duration,
    ) -> Result<Vec<Ohlcv>> {
        let now = self.now();
        self.data
            .get_ohlcv_data(symbol, &self.market, time_frame, now - lookback, now)
            .await
    }

    /// Last traded price of the symbol at the current time.
    pub async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker = self
            .data
            .get_ticker_data(symbol, &self.market, self.now())
            .await?;
        Ok(ticker.price)
    }

    pub async fn buy_limit(&self, symbol: &str, amount: Decimal, price: Decimal) -> Result<Order> {
        let data = OrderData::limit_buy(
            self.portfolio_id,
            symbol,
            self.trading_symbol.clone(),
            amount,
            price,
        );
        self.orders.create(data, true, true, true).await
    }

    pub async fn sell_limit(&self, symbol: &str, amount: Decimal, price: Decimal) -> Result<Order> {
        let data = OrderData::limit_sell(
            self.portfolio_id,
            symbol,
            self.trading_symbol.clone(),
            amount,
            price,
        );
        self.orders.create(data, true, true, true).await
    }

    pub async fn buy_market(&self, symbol: &str, amount: Decimal) -> Result<Order> {
        let price = self.latest_price(symbol).await?;
        let data = OrderData::market_buy(
            self.portfolio_id,
            symbol,
            self.trading_symbol.clone(),
            amount,
            price,
        );
        self.orders.create(data, true, true, true).await
    }

    pub async fn sell_market(&self, symbol: &str, amount: Decimal) -> Result<Order> {
        let price = self.latest_price(symbol).await?;
        let data = OrderData::market_sell(
            self.portfolio_id,
            symbol,
            self.trading_symbol.clone(),
            amount,
            price,
        );
        self.orders.create(data, true, true, true).await
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.cancel_order(order_id).await
    }

    pub fn add_stop_loss(
        &self,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
    ) -> Result<StopLoss> {
        self.trades
            .add_stop_loss(trade_id, risk_type, percentage, sell_percentage)
    }

    pub fn add_take_profit(
        &self,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
    ) -> Result<TakeProfit> {
        self.trades
            .add_take_profit(trade_id, risk_type, percentage, sell_percentage)
    }
}

/// An event-driven strategy, invoked by the scheduler at its own
/// `(time_unit, interval)` cadence.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    fn time_unit(&self) -> TimeUnit;

    fn interval(&self) -> u32;

    /// OHLCV series this strategy reads; the engine also uses these to
    /// evaluate pending limit orders.
    fn data_sources(&self) -> Vec<DataSource>;

    async fn on_run(&self, ctx: &AlgorithmContext) -> Result<()>;
}

/// A background job on the same timeline as strategies (pending-order
/// polling, housekeeping).
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    fn time_unit(&self) -> TimeUnit;

    fn interval(&self) -> u32;

    async fn on_run(&self, ctx: &AlgorithmContext) -> Result<()>;
}

/// Whole-range boolean entry/exit series for one symbol.
#[derive(Debug, Clone)]
pub struct SignalSeries {
    pub buy: Vec<bool>,
    pub sell: Vec<bool>,
}

impl SignalSeries {
    pub fn new(buy: Vec<bool>, sell: Vec<bool>) -> Self {
        debug_assert_eq!(buy.len(), sell.len());
        Self { buy, sell }
    }

    pub fn flat(len: usize) -> Self {
        Self {
            buy: vec![false; len],
            sell: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.buy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buy.is_empty()
    }
}

/// Bar data aligned to the most granular index among a strategy's
/// declared sources. Sparser series are forward-filled; `None` marks
/// index slots before a symbol's first bar.
#[derive(Debug, Clone)]
pub struct AlignedData {
    pub index: Vec<DateTime<Utc>>,
    pub bars: BTreeMap<String, Vec<Option<Ohlcv>>>,
}

impl AlignedData {
    pub fn close(&self, symbol: &str, i: usize) -> Option<Decimal> {
        self.bars
            .get(symbol)
            .and_then(|bars| bars.get(i))
            .and_then(|bar| bar.as_ref().map(|b| b.close))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.bars.keys()
    }
}

/// A strategy for the vectorized engine: it sees the whole range at once
/// and returns per-symbol signal series instead of per-bar callbacks.
pub trait VectorStrategy: Send + Sync {
    fn id(&self) -> &str;

    fn data_sources(&self) -> Vec<DataSource>;

    /// One `SignalSeries` per symbol, each exactly `data.index.len()`
    /// long.
    fn generate_signals(&self, data: &AlignedData) -> BTreeMap<String, SignalSeries>;
}
