//! Algoledger: trading algorithm runtime with deterministic backtesting.
//!
//! This is the root crate that provides benchmark and integration-test
//! access to the internal modules. For actual functionality, use the
//! individual crates directly:
//!
//! - `ledger-core`: entity types, errors, configuration, collaborator traits
//! - `trading-engine`: order lifecycle, FIFO matching, portfolio bookkeeping
//! - `backtester`: event-stepped and vectorized simulation, walk-forward

// Re-export for benchmarks
pub use backtester as backtest;
pub use ledger_core as core;
pub use trading_engine as trading;
