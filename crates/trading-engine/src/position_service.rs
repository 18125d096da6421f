//! Per-symbol amount and cost bookkeeping.

use std::sync::Arc;

use ledger_core::clock::{Clock, IdGenerator};
use ledger_core::types::Position;
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::store::LedgerStore;

/// Position bookkeeping. Each mutation corresponds to one order
/// transition and has an exact inverse (`reserve_amount` ↔
/// `restore_amount`); position amounts never go negative.
pub struct PositionService {
    store: Arc<LedgerStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl PositionService {
    pub fn new(
        store: Arc<LedgerStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, ids, clock }
    }

    /// Find the position for (portfolio, symbol), creating an empty one
    /// if absent.
    pub fn get_or_create(&self, portfolio_id: Uuid, symbol: &str) -> Position {
        if let Some(position) = self.store.find_position(portfolio_id, symbol) {
            return position;
        }
        let position = Position::new(self.ids.next(), portfolio_id, symbol, self.clock.now());
        debug!(portfolio_id = %portfolio_id, symbol = %symbol, "Created position");
        self.store.insert_position(position.clone());
        position
    }

    pub fn get(&self, position_id: Uuid) -> Result<Position> {
        self.store
            .get_position(position_id)
            .ok_or_else(|| Error::InvalidOrder(format!("position {position_id} not found")))
    }

    /// Apply a buy fill: the held amount and its cost basis grow.
    pub fn apply_buy_fill(&self, position_id: Uuid, amount: Decimal, price: Decimal) {
        let now = self.clock.now();
        self.store.update_position(position_id, |p| {
            p.amount += amount;
            p.cost += amount * price;
            p.updated_at = now;
        });
    }

    /// Apply a sell fill: the amount was already reserved at order
    /// creation, so only the cost basis of the closed slices leaves.
    pub fn apply_sell_fill(&self, position_id: Uuid, cost_basis: Decimal) {
        let now = self.clock.now();
        self.store.update_position(position_id, |p| {
            p.cost -= cost_basis;
            p.updated_at = now;
        });
    }

    /// Reserve amount for a sell order. Inverse of [`Self::restore_amount`].
    pub fn reserve_amount(&self, position_id: Uuid, amount: Decimal) -> Result<()> {
        let position = self.get(position_id)?;
        if position.amount < amount {
            return Err(Error::InsufficientPosition {
                symbol: position.symbol,
                requested: amount,
                available: position.amount,
            });
        }
        let now = self.clock.now();
        self.store.update_position(position_id, |p| {
            p.amount -= amount;
            p.updated_at = now;
        });
        Ok(())
    }

    /// Return the unfilled remainder of a terminal sell order.
    pub fn restore_amount(&self, position_id: Uuid, amount: Decimal) {
        let now = self.clock.now();
        self.store.update_position(position_id, |p| {
            p.amount += amount;
            p.updated_at = now;
        });
    }
}
