//! Backtest aggregates: runs, windows, and the vectorized engine's
//! signal audit log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Order, OrderSide};
use super::portfolio::Portfolio;
use super::position::Position;
use super::snapshot::PortfolioSnapshot;
use super::trade::{Trade, TradeStatus};

/// A named backtest window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestDateRange {
    pub name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BacktestDateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: None,
            start,
            end,
        }
    }

    pub fn named(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: Some(name.into()),
            start,
            end,
        }
    }
}

/// Why a vectorized-engine signal did or did not execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Executed,
    /// Buy dropped because a sell fired on the same bar.
    SellPriorityOnConflict,
    /// Buy dropped because the symbol already has an open trade.
    AlreadyInPosition,
    /// Sell dropped because the symbol is flat.
    NoPositionToClose,
    /// Buy dropped because available capital was insufficient.
    InsufficientCapital,
}

/// One entry in the vectorized engine's signal audit log. Every signal is
/// recorded, executed or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub executed: bool,
    pub outcome: SignalOutcome,
    pub price: Decimal,
    /// Amount traded when executed.
    pub amount: Option<Decimal>,
}

/// Position-sizing mode of the vectorized engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSizing {
    /// Capital per trade fixed once from the initial balance, with a
    /// running guard that aggregate allocation never exceeds it.
    Static,
    /// Capital per trade recomputed at each entry from unallocated cash
    /// plus mark-to-market of open trades, capped at unallocated.
    Dynamic,
}

/// Everything one (strategy, window) backtest produced.
///
/// Owned by the orchestration layer; immutable once persisted except for
/// combination of adjacent windows into a cumulative run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub strategy_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_unallocated: Decimal,
    /// Final portfolio state; `None` for the empty run of a failed
    /// strategy under continue-on-error.
    pub portfolio: Option<Portfolio>,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    pub snapshots: Vec<PortfolioSnapshot>,
    pub signal_events: Vec<SignalEvent>,
    /// How many window runs were combined into this one.
    pub number_of_runs: u32,
    pub created_at: DateTime<Utc>,
}

impl BacktestRun {
    /// The empty run recorded for a strategy that failed under
    /// continue-on-error.
    pub fn empty(strategy_id: impl Into<String>, range: &BacktestDateRange) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            start: range.start,
            end: range.end,
            initial_unallocated: Decimal::ZERO,
            portfolio: None,
            positions: Vec::new(),
            orders: Vec::new(),
            trades: Vec::new(),
            snapshots: Vec::new(),
            signal_events: Vec::new(),
            number_of_runs: 0,
            created_at: range.end,
        }
    }

    /// Final marked-to-market value, from the last snapshot.
    pub fn final_total_value(&self) -> Option<Decimal> {
        self.snapshots.last().map(|s| s.total_value)
    }

    pub fn realized(&self) -> Decimal {
        self.portfolio
            .as_ref()
            .map(|p| p.realized)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn closed_trade_count(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .count()
    }

    pub fn open_trade_count(&self) -> usize {
        self.trades.iter().filter(|t| t.is_open()).count()
    }
}
