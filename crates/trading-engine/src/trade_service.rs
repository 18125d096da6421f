//! FIFO matching of buy volume against sell volume, and the guards that
//! protect open trades.

use std::sync::Arc;

use ledger_core::clock::{Clock, IdGenerator};
use ledger_core::types::{
    GuardAllocation, Order, StopLoss, TakeProfit, Trade, TradeAllocation, TradeRiskType,
    TradeStatus,
};
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

/// Realized result of closing trade slices against one sell fill.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// Σ (close_price − open_price) × closed_amount over the slices.
    pub net_gain: Decimal,
    /// Σ open_price × closed_amount — the cost basis leaving the position.
    pub cost_basis: Decimal,
    /// The order's allocation metadata with consumption advanced.
    pub allocations: Vec<TradeAllocation>,
}

use crate::store::LedgerStore;

/// Opens trades from buy orders and closes them FIFO from sell fills.
///
/// Closing is invoked deliberately by the order service on fill deltas,
/// never as a side effect of a status assignment.
pub struct TradeService {
    store: Arc<LedgerStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl TradeService {
    pub fn new(
        store: Arc<LedgerStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, ids, clock }
    }

    pub fn get(&self, trade_id: Uuid) -> Result<Trade> {
        self.store
            .get_trade(trade_id)
            .ok_or(Error::TradeNotFound(trade_id))
    }

    /// Open a trade for a buy order, sized to its current fill. The trade
    /// grows with further fills of the same order.
    pub fn create_trade_from_buy_order(&self, order: &Order) -> Trade {
        let trade = Trade::open(
            self.ids.next(),
            order.portfolio_id,
            order.id,
            order.target_symbol.clone(),
            order.trading_symbol.clone(),
            order.filled,
            order.price,
            order.created_at,
        );
        debug!(
            trade_id = %trade.id,
            order_id = %order.id,
            symbol = %trade.target_symbol,
            "Opened trade from buy order"
        );
        self.store.insert_trade(trade.clone());
        trade
    }

    /// Grow the trade of a buy order by a fill delta.
    pub fn grow_trade_from_buy_fill(&self, buy_order_id: Uuid, delta: Decimal) -> Result<()> {
        let trade = self
            .store
            .find_trade_by_buy_order(buy_order_id)
            .ok_or_else(|| Error::InvalidOrder(format!("no trade for buy order {buy_order_id}")))?;
        let now = self.clock.now();
        self.store.update_trade(trade.id, |t| {
            t.amount += delta;
            t.available_amount += delta;
            t.updated_at = now;
        });
        Ok(())
    }

    /// Reserve a sell amount against open trades for the symbol in strict
    /// creation-time order, oldest first. Returns the allocation metadata
    /// recorded on the sell order.
    pub fn allocate_sell(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
        amount: Decimal,
    ) -> Result<Vec<TradeAllocation>> {
        let open_trades = self.store.open_trades_for_symbol(portfolio_id, symbol);
        let available: Decimal = open_trades.iter().map(|t| t.available_amount).sum();
        if available < amount {
            return Err(Error::InsufficientPosition {
                symbol: symbol.to_string(),
                requested: amount,
                available,
            });
        }

        let now = self.clock.now();
        let mut allocations = Vec::new();
        let mut remaining = amount;
        for trade in open_trades {
            if remaining <= Decimal::ZERO {
                break;
            }
            let slice = remaining.min(trade.available_amount);
            if slice <= Decimal::ZERO {
                continue;
            }
            self.store.update_trade(trade.id, |t| {
                t.available_amount -= slice;
                t.updated_at = now;
            });
            allocations.push(TradeAllocation::new(trade.id, slice));
            remaining -= slice;
        }
        Ok(allocations)
    }

    /// Reserve explicitly listed trade amounts (the caller knows exactly
    /// which trades it is closing). Validated against availability before
    /// any trade is touched.
    pub fn apply_explicit_allocations(&self, allocations: &[TradeAllocation]) -> Result<()> {
        for allocation in allocations {
            let trade = self.get(allocation.trade_id)?;
            if !trade.is_open() || trade.available_amount < allocation.amount {
                return Err(Error::InsufficientPosition {
                    symbol: trade.target_symbol,
                    requested: allocation.amount,
                    available: trade.available_amount,
                });
            }
        }
        let now = self.clock.now();
        for allocation in allocations {
            self.store.update_trade(allocation.trade_id, |t| {
                t.available_amount -= allocation.amount;
                t.updated_at = now;
            });
        }
        Ok(())
    }

    /// Charge guard-raised reservations to their guards' `sold_amount`.
    pub fn register_guard_reservations(
        &self,
        stop_losses: &[GuardAllocation],
        take_profits: &[GuardAllocation],
    ) {
        for allocation in stop_losses {
            self.store.update_stop_loss(allocation.guard_id, |g| {
                g.sold_amount += allocation.amount;
            });
        }
        for allocation in take_profits {
            self.store.update_take_profit(allocation.guard_id, |g| {
                g.sold_amount += allocation.amount;
            });
        }
    }

    /// Close trade slices against a sell fill delta, consuming the order's
    /// allocation metadata in order.
    pub fn close_trades(&self, order: &Order, filled_delta: Decimal) -> Result<CloseOutcome> {
        let close_price = order.price;
        let now = self.clock.now();
        let mut allocations = order.trade_allocations.clone();
        let mut remaining = filled_delta;
        let mut net_gain = Decimal::ZERO;
        let mut cost_basis = Decimal::ZERO;

        for allocation in allocations.iter_mut() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let slice = remaining.min(allocation.outstanding());
            if slice <= Decimal::ZERO {
                continue;
            }
            let trade = self.get(allocation.trade_id)?;
            let slice_gain = (close_price - trade.open_price) * slice;
            let slice_basis = trade.open_price * slice;

            self.store.update_trade(trade.id, |t| {
                t.filled_amount += slice;
                t.net_gain += slice_gain;
                if !t.sell_order_ids.contains(&order.id) {
                    t.sell_order_ids.push(order.id);
                }
                if t.filled_amount >= t.amount && t.available_amount.is_zero() {
                    t.status = TradeStatus::Closed;
                    t.closed_at = Some(now);
                }
                t.updated_at = now;
            });

            let updated = self.get(trade.id)?;
            if updated.status == TradeStatus::Closed {
                info!(
                    trade_id = %updated.id,
                    net_gain = %updated.net_gain,
                    "Trade closed"
                );
            }

            allocation.consumed += slice;
            net_gain += slice_gain;
            cost_basis += slice_basis;
            remaining -= slice;
        }

        debug_assert!(remaining.is_zero(), "sell fill exceeded its allocations");
        Ok(CloseOutcome {
            net_gain,
            cost_basis,
            allocations,
        })
    }

    /// Restore exactly the unconsumed reservations of a terminally failed
    /// sell order — trades get their available amount back and guards get
    /// their `sold_amount` reduced. No re-derivation from current state:
    /// the order's metadata is the single source of what to restore.
    pub fn restore_allocations(&self, order: &Order) {
        let now = self.clock.now();
        for allocation in &order.trade_allocations {
            let outstanding = allocation.outstanding();
            if outstanding <= Decimal::ZERO {
                continue;
            }
            self.store.update_trade(allocation.trade_id, |t| {
                t.available_amount += outstanding;
                t.updated_at = now;
            });
        }
        for guard in &order.stop_loss_allocations {
            let outstanding = self.outstanding_for_trade(order, guard.trade_id, guard.amount);
            if outstanding > Decimal::ZERO {
                self.store.update_stop_loss(guard.guard_id, |g| {
                    g.sold_amount = (g.sold_amount - outstanding).max(Decimal::ZERO);
                });
            }
        }
        for guard in &order.take_profit_allocations {
            let outstanding = self.outstanding_for_trade(order, guard.trade_id, guard.amount);
            if outstanding > Decimal::ZERO {
                self.store.update_take_profit(guard.guard_id, |g| {
                    g.sold_amount = (g.sold_amount - outstanding).max(Decimal::ZERO);
                });
            }
        }
    }

    /// Close the trade of a terminally failed buy order when nothing was
    /// ever filled into it, so empty trades don't linger as open.
    pub fn finalize_buy_order_trade(&self, buy_order_id: Uuid) {
        let now = self.clock.now();
        if let Some(trade) = self.store.find_trade_by_buy_order(buy_order_id) {
            if trade.is_open() && trade.amount.is_zero() {
                self.store.update_trade(trade.id, |t| {
                    t.status = TradeStatus::Closed;
                    t.closed_at = Some(now);
                    t.updated_at = now;
                });
            }
        }
    }

    fn outstanding_for_trade(&self, order: &Order, trade_id: Uuid, cap: Decimal) -> Decimal {
        order
            .trade_allocations
            .iter()
            .find(|a| a.trade_id == trade_id)
            .map(|a| a.outstanding().min(cap))
            .unwrap_or(Decimal::ZERO)
    }

    // ── Guards ──

    pub fn add_stop_loss(
        &self,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
    ) -> Result<StopLoss> {
        self.get(trade_id)?;
        let guard = StopLoss::new(
            self.ids.next(),
            trade_id,
            risk_type,
            percentage,
            sell_percentage,
            self.clock.now(),
        );
        self.store.insert_stop_loss(guard.clone());
        Ok(guard)
    }

    pub fn add_take_profit(
        &self,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
    ) -> Result<TakeProfit> {
        self.get(trade_id)?;
        let guard = TakeProfit::new(
            self.ids.next(),
            trade_id,
            risk_type,
            percentage,
            sell_percentage,
            self.clock.now(),
        );
        self.store.insert_take_profit(guard.clone());
        Ok(guard)
    }

    /// Raise the high-water mark of every open trade for the symbol.
    pub fn update_high_water_marks(&self, portfolio_id: Uuid, symbol: &str, price: Decimal) {
        let now = self.clock.now();
        for trade in self.store.open_trades_for_symbol(portfolio_id, symbol) {
            let current = trade.high_water_mark.unwrap_or(trade.open_price);
            if price > current || trade.high_water_mark.is_none() {
                self.store.update_trade(trade.id, |t| {
                    t.high_water_mark = Some(price.max(current));
                    t.updated_at = now;
                });
            }
        }
    }
}
