//! Trading Engine
//!
//! The ledger services. All mutation of orders, positions, portfolios and
//! trades happens here, driven by order lifecycle transitions — strategy
//! code never touches entities directly.
//!
//! Service dependency order: [`PortfolioService`] and [`PositionService`]
//! do pure bookkeeping, [`TradeService`] matches buy volume against sell
//! volume FIFO, [`OrderService`] is the single synchronization point that
//! drives the other three, and [`SnapshotService`] values the result.
//!
//! Callers must serialize ledger mutations per portfolio (single-writer
//! contract); mutations for different portfolios are independent.

pub mod order_service;
pub mod portfolio_service;
pub mod position_service;
pub mod snapshot_service;
pub mod store;
pub mod trade_service;

pub use order_service::OrderService;
pub use portfolio_service::PortfolioService;
pub use position_service::PositionService;
pub use snapshot_service::SnapshotService;
pub use store::LedgerStore;
pub use trade_service::TradeService;
