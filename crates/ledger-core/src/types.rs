//! Entity types for the ledger and backtest engines.

pub mod backtest;
pub mod market;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod snapshot;
pub mod trade;

pub use backtest::{
    BacktestDateRange, BacktestRun, PositionSizing, SignalEvent, SignalOutcome,
};
pub use market::{DataSource, Ohlcv, Ticker, TimeFrame, TimeUnit};
pub use order::{
    GuardAllocation, Order, OrderData, OrderSide, OrderStatus, OrderType, OrderUpdate,
    TradeAllocation,
};
pub use portfolio::{Portfolio, PortfolioConfiguration};
pub use position::Position;
pub use snapshot::{PortfolioSnapshot, PositionSnapshot};
pub use trade::{StopLoss, TakeProfit, Trade, TradeRiskType, TradeStatus};
