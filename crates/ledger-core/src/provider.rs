//! External collaborator traits.
//!
//! Exchange connectivity and market-data retrieval live outside this
//! workspace; the services only see these traits. The backtester supplies
//! its own simulated executor and a pre-materialized data provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{DataSource, Ohlcv, Order, OrderStatus, Portfolio, Ticker, TimeFrame};

/// State of an order as reported by the execution venue, copied back onto
/// the ledger order.
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub external_id: Option<String>,
    pub status: OrderStatus,
    /// Cumulative filled amount at the venue.
    pub filled: Decimal,
    pub remaining: Decimal,
}

/// Dispatches orders to an execution venue.
#[automock]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Submit the order for execution and return its venue-side state.
    async fn execute_order(&self, portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder>;

    /// Fetch the venue-side state of a previously submitted order.
    async fn get_order(&self, portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder>;

    /// Request cancellation and return the resulting venue-side state.
    async fn cancel_order(&self, portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder>;
}

/// Reads account state from the execution venue.
#[automock]
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    /// Available balance of the trading symbol on the venue.
    async fn unallocated_balance(&self, market: &str, trading_symbol: &str) -> Result<Decimal>;
}

/// Supplies historical and point-in-time market data.
#[automock]
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_ohlcv_data(
        &self,
        symbol: &str,
        market: &str,
        time_frame: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Ohlcv>>;

    /// Ticker at the given instant. Backtest snapshots pass the simulated
    /// time here, never wall-clock now.
    async fn get_ticker_data(&self, symbol: &str, market: &str, at: DateTime<Utc>)
        -> Result<Ticker>;

    /// Whole-range bar series for every declared data source, for the
    /// vectorized engine.
    async fn get_vectorized_backtest_data(
        &self,
        data_sources: &[DataSource],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<DataSource, Vec<Ohlcv>>>;
}
