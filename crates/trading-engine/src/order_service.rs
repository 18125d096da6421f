//! Order lifecycle, validation, execution dispatch, and the single
//! synchronization point that drives position/portfolio/trade updates.

use std::sync::Arc;

use ledger_core::clock::{Clock, IdGenerator};
use ledger_core::provider::{ExecutedOrder, OrderExecutor};
use ledger_core::types::{
    Order, OrderData, OrderSide, OrderStatus, OrderUpdate, Portfolio,
};
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::portfolio_service::PortfolioService;
use crate::position_service::PositionService;
use crate::snapshot_service::SnapshotService;
use crate::store::LedgerStore;
use crate::trade_service::TradeService;

/// The only entry point through which strategy code changes the ledger.
///
/// Synchronization is driven solely by the *delta* of `filled` between
/// calls: repeated or out-of-order updates that do not increase `filled`
/// leave ledger totals untouched, which makes the service safe to call
/// from retried network polls.
pub struct OrderService {
    store: Arc<LedgerStore>,
    portfolios: Arc<PortfolioService>,
    positions: Arc<PositionService>,
    trades: Arc<TradeService>,
    snapshots: Arc<SnapshotService>,
    executor: Option<Arc<dyn OrderExecutor>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<LedgerStore>,
        portfolios: Arc<PortfolioService>,
        positions: Arc<PositionService>,
        trades: Arc<TradeService>,
        snapshots: Arc<SnapshotService>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            portfolios,
            positions,
            trades,
            snapshots,
            executor: None,
            ids,
            clock,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn get(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get_order(order_id)
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// Create an order: validate against the owning portfolio, reserve
    /// funds (buy) or position amount and trade availability (sell),
    /// optionally dispatch to the executor copying back its state, and
    /// snapshot the portfolio at the creation timestamp.
    pub async fn create(
        &self,
        data: OrderData,
        execute: bool,
        validate: bool,
        sync: bool,
    ) -> Result<Order> {
        let portfolio = self.portfolios.get(data.portfolio_id)?;
        if validate {
            self.validate(&data, &portfolio)?;
        }

        // Collision-checked id assignment.
        let id = loop {
            let candidate = self.ids.next();
            if !self.store.contains_order(candidate) {
                break candidate;
            }
        };

        let mut order = Order::new(id, &data, self.clock.now());
        let position = self
            .positions
            .get_or_create(order.portfolio_id, &order.target_symbol);
        order.position_id = Some(position.id);

        if sync {
            match order.side {
                OrderSide::Buy => {
                    self.portfolios
                        .reserve(order.portfolio_id, order.amount * order.price)?;
                }
                OrderSide::Sell => {
                    self.positions.reserve_amount(position.id, order.amount)?;
                    if order.trade_allocations.is_empty() {
                        order.trade_allocations = self.trades.allocate_sell(
                            order.portfolio_id,
                            &order.target_symbol,
                            order.amount,
                        )?;
                    } else {
                        self.trades
                            .apply_explicit_allocations(&order.trade_allocations)?;
                    }
                    self.trades.register_guard_reservations(
                        &order.stop_loss_allocations,
                        &order.take_profit_allocations,
                    );
                }
            }
        }

        info!(
            order_id = %order.id,
            side = ?order.side,
            order_type = ?order.order_type,
            symbol = %order.target_symbol,
            amount = %order.amount,
            price = %order.price,
            "Created order"
        );
        self.store.insert_order(order.clone());

        if sync && order.side == OrderSide::Buy {
            self.trades.create_trade_from_buy_order(&order);
        }

        if execute {
            if let Some(executor) = &self.executor {
                match executor.execute_order(&portfolio, &order).await {
                    Ok(executed) => {
                        self.apply_execution_report(order.id, executed, sync).await?;
                    }
                    Err(e) => {
                        // Compensate the reservations and surface the
                        // failure; the order ends Rejected, not half-live.
                        warn!(order_id = %order.id, error = %e, "Order dispatch failed");
                        self.apply_update(
                            order.id,
                            OrderUpdate::status(OrderStatus::Rejected),
                            sync,
                        )
                        .await?;
                        return Err(e);
                    }
                }
            }
        }

        if sync {
            self.snapshots
                .create_snapshot(order.portfolio_id, order.created_at)
                .await?;
        }
        self.get(order.id)
    }

    /// Feed back an order state observed externally. `data.filled` is the
    /// new cumulative fill; only a positive delta mutates ledger totals.
    /// Terminal transitions trigger the inverse compensation of whatever
    /// the unfilled remainder reserved. Always re-snapshots the portfolio
    /// at the update timestamp.
    pub async fn update(&self, order_id: Uuid, data: OrderUpdate) -> Result<Order> {
        self.apply_update(order_id, data, true).await
    }

    async fn apply_update(
        &self,
        order_id: Uuid,
        data: OrderUpdate,
        sync: bool,
    ) -> Result<Order> {
        let mut order = self.get(order_id)?;
        if order.status.is_terminal() {
            // Re-delivered updates after the lifecycle ended are no-ops.
            return Ok(order);
        }
        let now = self.clock.now();

        if let Some(external_id) = &data.external_id {
            order.external_id = Some(external_id.clone());
        }

        let new_filled = data.filled.unwrap_or(order.filled);
        if new_filled > order.amount {
            return Err(Error::InvalidOrder(format!(
                "fill {new_filled} exceeds order amount {}",
                order.amount
            )));
        }
        let filled_delta = new_filled - order.filled;

        if sync && filled_delta > Decimal::ZERO {
            let position_id = order
                .position_id
                .ok_or_else(|| Error::InvalidOrder(format!("order {order_id} has no position")))?;
            order.record_fill(new_filled, now);
            let value = filled_delta * order.price;
            match order.side {
                OrderSide::Buy => {
                    self.positions
                        .apply_buy_fill(position_id, filled_delta, order.price);
                    self.portfolios.settle_buy_fill(order.portfolio_id, value);
                    self.trades.grow_trade_from_buy_fill(order.id, filled_delta)?;
                }
                OrderSide::Sell => {
                    let outcome = self.trades.close_trades(&order, filled_delta)?;
                    order.trade_allocations = outcome.allocations;
                    self.positions.apply_sell_fill(position_id, outcome.cost_basis);
                    self.portfolios
                        .settle_sell_fill(order.portfolio_id, value, outcome.net_gain);
                }
            }
            debug!(
                order_id = %order.id,
                filled_delta = %filled_delta,
                filled = %order.filled,
                "Applied fill delta"
            );
        } else if filled_delta > Decimal::ZERO {
            order.record_fill(new_filled, now);
        }

        // A fully filled order closes even when the venue omitted the
        // status or still reported it live.
        let mut target_status = data.status;
        if order.is_fully_filled() && !target_status.is_some_and(|s| s.is_terminal()) {
            target_status = Some(OrderStatus::Closed);
        }

        if let Some(status) = target_status {
            if status != order.status {
                if !order.status.can_transition(status) {
                    return Err(Error::InvalidOrder(format!(
                        "illegal status transition {:?} -> {:?} for order {order_id}",
                        order.status, status
                    )));
                }
                order.status = status;
                if status.is_terminal() {
                    self.compensate_terminal(&order, sync)?;
                    info!(
                        order_id = %order.id,
                        status = ?status,
                        filled = %order.filled,
                        "Order reached terminal state"
                    );
                }
            }
        }

        order.updated_at = now;
        let persisted = order.clone();
        self.store.update_order(order_id, move |o| *o = persisted);

        if sync {
            self.snapshots
                .create_snapshot(order.portfolio_id, now)
                .await?;
        }
        self.get(order_id)
    }

    /// Return the unfilled remainder's reservations to the portfolio,
    /// position, and trades/guards. The exact inverse of what `create`
    /// reserved, scaled to `amount − filled`.
    fn compensate_terminal(&self, order: &Order, sync: bool) -> Result<()> {
        if !sync {
            return Ok(());
        }
        let unfilled = order.amount - order.filled;
        if unfilled <= Decimal::ZERO {
            return Ok(());
        }
        match order.side {
            OrderSide::Buy => {
                self.portfolios
                    .release(order.portfolio_id, unfilled * order.price);
                self.trades.finalize_buy_order_trade(order.id);
            }
            OrderSide::Sell => {
                if let Some(position_id) = order.position_id {
                    self.positions.restore_amount(position_id, unfilled);
                }
                self.trades.restore_allocations(order);
            }
        }
        Ok(())
    }

    async fn apply_execution_report(
        &self,
        order_id: Uuid,
        executed: ExecutedOrder,
        sync: bool,
    ) -> Result<Order> {
        let update = OrderUpdate {
            filled: Some(executed.filled),
            status: Some(executed.status),
            external_id: executed.external_id,
        };
        self.apply_update(order_id, update, sync).await
    }

    /// Request cancellation at the venue and feed the result back through
    /// the normal update path.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order> {
        let order = self.get(order_id)?;
        if order.status.is_terminal() {
            return Ok(order);
        }
        match (&self.executor, &order.external_id) {
            (Some(executor), Some(_)) => {
                let portfolio = self.portfolios.get(order.portfolio_id)?;
                let executed = executor.cancel_order(&portfolio, &order).await?;
                self.apply_execution_report(order_id, executed, true).await
            }
            _ => {
                self.update(order_id, OrderUpdate::status(OrderStatus::Canceled))
                    .await
            }
        }
    }

    /// Poll the executor for every live order of the portfolio and feed
    /// the observed states through `update`. Individual poll failures are
    /// logged and skipped; the delta contract makes re-polls harmless.
    pub async fn check_pending_orders(&self, portfolio_id: Uuid) -> Result<usize> {
        let executor = match &self.executor {
            Some(executor) => executor,
            None => return Ok(0),
        };
        let portfolio = self.portfolios.get(portfolio_id)?;
        let mut updated = 0;
        for order in self.store.pending_orders(portfolio_id) {
            if order.status != OrderStatus::Open || order.external_id.is_none() {
                continue;
            }
            match executor.get_order(&portfolio, &order).await {
                Ok(executed) => {
                    self.apply_execution_report(order.id, executed, true).await?;
                    updated += 1;
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Pending order poll failed");
                }
            }
        }
        Ok(updated)
    }

    fn validate(&self, data: &OrderData, portfolio: &Portfolio) -> Result<()> {
        if data.amount <= Decimal::ZERO {
            return Err(Error::InvalidOrder(format!(
                "amount must be positive, got {}",
                data.amount
            )));
        }
        if data.price <= Decimal::ZERO {
            return Err(Error::InvalidOrder(format!(
                "price must be positive, got {}",
                data.price
            )));
        }
        if data.trading_symbol != portfolio.trading_symbol {
            return Err(Error::TradingSymbolMismatch {
                order_symbol: data.trading_symbol.clone(),
                portfolio_symbol: portfolio.trading_symbol.clone(),
            });
        }
        match data.side {
            OrderSide::Buy => {
                let required = data.amount * data.price;
                if required > portfolio.unallocated {
                    return Err(Error::InsufficientFunds {
                        required,
                        available: portfolio.unallocated,
                    });
                }
            }
            OrderSide::Sell => {
                let position = self
                    .store
                    .find_position(portfolio.id, &data.target_symbol)
                    .ok_or_else(|| Error::PositionNotFound {
                        portfolio_id: portfolio.id,
                        symbol: data.target_symbol.clone(),
                    })?;
                if position.amount < data.amount {
                    return Err(Error::InsufficientPosition {
                        symbol: data.target_symbol.clone(),
                        requested: data.amount,
                        available: position.amount,
                    });
                }
            }
        }
        Ok(())
    }
}
