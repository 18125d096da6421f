//! Simulated order execution.

use async_trait::async_trait;
use ledger_core::provider::{ExecutedOrder, OrderExecutor};
use ledger_core::types::{Order, OrderStatus, OrderType, Portfolio};
use ledger_core::Result;
use rust_decimal::Decimal;

/// Executor used by both backtest engines.
///
/// Market orders fill instantly and completely at the order's reference
/// price; limit orders go live and are filled later by the engine's
/// OHLCV-range evaluation. No fees or slippage are modeled.
#[derive(Debug, Default)]
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self
    }

    fn external_id(order: &Order) -> Option<String> {
        Some(format!("sim-{}", order.id))
    }
}

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn execute_order(&self, _portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder> {
        let executed = match order.order_type {
            OrderType::Market => ExecutedOrder {
                external_id: Self::external_id(order),
                status: OrderStatus::Closed,
                filled: order.amount,
                remaining: Decimal::ZERO,
            },
            OrderType::Limit => ExecutedOrder {
                external_id: Self::external_id(order),
                status: OrderStatus::Open,
                filled: Decimal::ZERO,
                remaining: order.amount,
            },
        };
        Ok(executed)
    }

    async fn get_order(&self, _portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder> {
        // Fills come from the engine's bar evaluation, not from polling.
        Ok(ExecutedOrder {
            external_id: order.external_id.clone(),
            status: order.status,
            filled: order.filled,
            remaining: order.remaining,
        })
    }

    async fn cancel_order(&self, _portfolio: &Portfolio, order: &Order) -> Result<ExecutedOrder> {
        Ok(ExecutedOrder {
            external_id: order.external_id.clone(),
            status: OrderStatus::Canceled,
            filled: order.filled,
            remaining: order.remaining,
        })
    }
}
