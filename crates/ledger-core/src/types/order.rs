//! Order entity and lifecycle enums.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute immediately at the best available price.
    Market,
    /// Execute at the given price or better.
    Limit,
}

/// Current status of an order.
///
/// Lifecycle: `Created` → `Open` → one of the terminal states. A `Created`
/// order that is never dispatched can also move straight to a terminal
/// state (e.g. rejected at submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created but not yet dispatched for execution.
    Created,
    /// Order dispatched and live at the execution venue.
    Open,
    /// Order fully filled.
    Closed,
    /// Order cancelled before completion.
    Canceled,
    /// Order expired before completion.
    Expired,
    /// Order rejected by the execution venue.
    Rejected,
}

impl OrderStatus {
    /// Terminal states end the order lifecycle; no further fills arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Closed
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }

    /// Whether the order may move from `self` to `next`.
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Created => true,
            OrderStatus::Open => next.is_terminal() || next == OrderStatus::Open,
            // Terminal states accept no further transitions.
            _ => false,
        }
    }
}

/// How much of a sell order is charged against one trade.
///
/// Recorded on the order at creation time so that a terminal failure can
/// restore exactly the reserved amounts without re-deriving them from
/// current ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeAllocation {
    pub trade_id: Uuid,
    /// Amount reserved against the trade's `available_amount`.
    pub amount: Decimal,
    /// Portion of `amount` already consumed by fills.
    pub consumed: Decimal,
}

impl TradeAllocation {
    pub fn new(trade_id: Uuid, amount: Decimal) -> Self {
        Self {
            trade_id,
            amount,
            consumed: Decimal::ZERO,
        }
    }

    pub fn outstanding(&self) -> Decimal {
        self.amount - self.consumed
    }
}

/// Link between a guard-triggered sell order and the stop-loss/take-profit
/// that raised it, with the amount charged to the guard's `sold_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardAllocation {
    pub guard_id: Uuid,
    pub trade_id: Uuid,
    pub amount: Decimal,
}

/// An order in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    /// Position this order trades against. Set by the order service once
    /// the target position exists.
    pub position_id: Option<Uuid>,
    /// Asset being bought or sold (e.g. "BTC").
    pub target_symbol: String,
    /// Currency the portfolio trades in (e.g. "EUR").
    pub trading_symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    /// Identifier assigned by the external execution venue.
    pub external_id: Option<String>,
    /// Sell-side reservation metadata (empty for buys).
    pub trade_allocations: Vec<TradeAllocation>,
    pub stop_loss_allocations: Vec<GuardAllocation>,
    pub take_profit_allocations: Vec<GuardAllocation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in `Created` state with nothing filled.
    pub fn new(id: Uuid, data: &OrderData, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            portfolio_id: data.portfolio_id,
            position_id: None,
            target_symbol: data.target_symbol.clone(),
            trading_symbol: data.trading_symbol.clone(),
            side: data.side,
            order_type: data.order_type,
            amount: data.amount,
            price: data.price,
            filled: Decimal::ZERO,
            remaining: data.amount,
            status: OrderStatus::Created,
            external_id: None,
            trade_allocations: data.trade_allocations.clone(),
            stop_loss_allocations: data.stop_loss_allocations.clone(),
            take_profit_allocations: data.take_profit_allocations.clone(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_fully_filled(&self) -> bool {
        self.filled >= self.amount
    }

    /// Reserved cost of the order's outstanding amount, used for snapshot
    /// pending-value and terminal compensation.
    pub fn outstanding_value(&self) -> Decimal {
        self.price * self.remaining
    }

    /// Record a new cumulative fill level, keeping `remaining` in sync.
    /// Fill levels never decrease and never exceed `amount`.
    pub fn record_fill(&mut self, filled: Decimal, at: DateTime<Utc>) {
        debug_assert!(filled >= self.filled && filled <= self.amount);
        self.filled = filled;
        self.remaining = self.amount - filled;
        self.updated_at = at;
    }
}

/// Payload for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    pub portfolio_id: Uuid,
    pub target_symbol: String,
    pub trading_symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    /// Limit price, or the reference price used for fund reservation on
    /// market orders.
    pub price: Decimal,
    /// Explicit trade reservations for sells. When empty the order service
    /// allocates FIFO against open trades.
    pub trade_allocations: Vec<TradeAllocation>,
    pub stop_loss_allocations: Vec<GuardAllocation>,
    pub take_profit_allocations: Vec<GuardAllocation>,
}

impl OrderData {
    fn new(
        portfolio_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            portfolio_id,
            target_symbol: target_symbol.into(),
            trading_symbol: trading_symbol.into(),
            side,
            order_type,
            amount,
            price,
            trade_allocations: Vec::new(),
            stop_loss_allocations: Vec::new(),
            take_profit_allocations: Vec::new(),
        }
    }

    pub fn limit_buy(
        portfolio_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self::new(
            portfolio_id,
            target_symbol,
            trading_symbol,
            OrderSide::Buy,
            OrderType::Limit,
            amount,
            price,
        )
    }

    pub fn limit_sell(
        portfolio_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self::new(
            portfolio_id,
            target_symbol,
            trading_symbol,
            OrderSide::Sell,
            OrderType::Limit,
            amount,
            price,
        )
    }

    pub fn market_buy(
        portfolio_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        amount: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self::new(
            portfolio_id,
            target_symbol,
            trading_symbol,
            OrderSide::Buy,
            OrderType::Market,
            amount,
            reference_price,
        )
    }

    pub fn market_sell(
        portfolio_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        amount: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self::new(
            portfolio_id,
            target_symbol,
            trading_symbol,
            OrderSide::Sell,
            OrderType::Market,
            amount,
            reference_price,
        )
    }

    pub fn with_trade_allocations(mut self, allocations: Vec<TradeAllocation>) -> Self {
        self.trade_allocations = allocations;
        self
    }

    pub fn with_stop_loss_allocations(mut self, allocations: Vec<GuardAllocation>) -> Self {
        self.stop_loss_allocations = allocations;
        self
    }

    pub fn with_take_profit_allocations(mut self, allocations: Vec<GuardAllocation>) -> Self {
        self.take_profit_allocations = allocations;
        self
    }
}

/// Partial update fed back from the execution venue or a simulator.
///
/// Only the present fields are applied; `filled` is the new cumulative
/// fill level, not a delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub filled: Option<Decimal>,
    pub status: Option<OrderStatus>,
    pub external_id: Option<String>,
}

impl OrderUpdate {
    pub fn filled(filled: Decimal) -> Self {
        Self {
            filled: Some(filled),
            ..Default::default()
        }
    }

    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        let data = OrderData::limit_buy(
            Uuid::new_v4(),
            "BTC",
            "EUR",
            Decimal::new(2, 0),
            Decimal::new(100, 0),
        );
        Order::new(Uuid::new_v4(), &data, Utc::now())
    }

    #[test]
    fn test_order_starts_created_and_unfilled() {
        let order = sample_order();
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.filled, Decimal::ZERO);
        assert_eq!(order.remaining, Decimal::new(2, 0));
        // 2 * 100 = 200 outstanding
        assert_eq!(order.outstanding_value(), Decimal::new(200, 0));
    }

    #[test]
    fn test_fill_tracking() {
        let mut order = sample_order();
        order.record_fill(Decimal::ONE, Utc::now());
        assert_eq!(order.filled, Decimal::ONE);
        assert_eq!(order.remaining, Decimal::ONE);
        assert!(!order.is_fully_filled());

        order.record_fill(Decimal::new(2, 0), Utc::now());
        assert!(order.is_fully_filled());
        assert_eq!(order.remaining, Decimal::ZERO);
    }

    #[test]
    fn test_status_transitions() {
        assert!(OrderStatus::Created.can_transition(OrderStatus::Open));
        assert!(OrderStatus::Created.can_transition(OrderStatus::Rejected));
        assert!(OrderStatus::Open.can_transition(OrderStatus::Closed));
        assert!(OrderStatus::Open.can_transition(OrderStatus::Canceled));
        assert!(!OrderStatus::Closed.can_transition(OrderStatus::Open));
        assert!(!OrderStatus::Canceled.can_transition(OrderStatus::Closed));
    }

    #[test]
    fn test_allocation_outstanding() {
        let mut alloc = TradeAllocation::new(Uuid::new_v4(), Decimal::new(5, 0));
        assert_eq!(alloc.outstanding(), Decimal::new(5, 0));
        alloc.consumed = Decimal::new(3, 0);
        assert_eq!(alloc.outstanding(), Decimal::new(2, 0));
    }

    #[test]
    fn test_order_serialization_roundtrip() {
        let order = sample_order();
        let json = serde_json::to_string(&order).unwrap();
        let deser: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order.id, deser.id);
        assert_eq!(order.amount, deser.amount);
        assert_eq!(order.status, deser.status);
    }
}
