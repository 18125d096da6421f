//! In-memory ledger store.
//!
//! Entities are kept in id-keyed arenas and hold foreign keys, never
//! references to each other; all navigation goes through the queries
//! below. Every listing query sorts on a stable key so that iteration
//! order never depends on hash-map internals.

use dashmap::DashMap;
use ledger_core::types::{
    Order, OrderSide, OrderStatus, Portfolio, PortfolioSnapshot, Position, PositionSnapshot,
    StopLoss, TakeProfit, Trade,
};
use uuid::Uuid;

/// Arena-style store shared by the ledger services.
#[derive(Debug, Default)]
pub struct LedgerStore {
    portfolios: DashMap<Uuid, Portfolio>,
    portfolio_ids: DashMap<String, Uuid>,
    positions: DashMap<Uuid, Position>,
    orders: DashMap<Uuid, Order>,
    trades: DashMap<Uuid, Trade>,
    stop_losses: DashMap<Uuid, StopLoss>,
    take_profits: DashMap<Uuid, TakeProfit>,
    snapshots: DashMap<Uuid, PortfolioSnapshot>,
    position_snapshots: DashMap<Uuid, PositionSnapshot>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Portfolios ──

    pub fn insert_portfolio(&self, portfolio: Portfolio) {
        self.portfolio_ids
            .insert(portfolio.identifier.clone(), portfolio.id);
        self.portfolios.insert(portfolio.id, portfolio);
    }

    pub fn get_portfolio(&self, id: Uuid) -> Option<Portfolio> {
        self.portfolios.get(&id).map(|p| p.clone())
    }

    pub fn find_portfolio_by_identifier(&self, identifier: &str) -> Option<Portfolio> {
        self.portfolio_ids
            .get(identifier)
            .and_then(|id| self.get_portfolio(*id))
    }

    pub fn update_portfolio(&self, id: Uuid, f: impl FnOnce(&mut Portfolio)) -> bool {
        if let Some(mut entry) = self.portfolios.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    // ── Positions ──

    pub fn insert_position(&self, position: Position) {
        self.positions.insert(position.id, position);
    }

    pub fn get_position(&self, id: Uuid) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    pub fn find_position(&self, portfolio_id: Uuid, symbol: &str) -> Option<Position> {
        self.positions
            .iter()
            .find(|e| e.value().portfolio_id == portfolio_id && e.value().symbol == symbol)
            .map(|e| e.value().clone())
    }

    pub fn positions_for_portfolio(&self, portfolio_id: Uuid) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|e| e.value().portfolio_id == portfolio_id)
            .map(|e| e.value().clone())
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn update_position(&self, id: Uuid, f: impl FnOnce(&mut Position)) -> bool {
        if let Some(mut entry) = self.positions.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    // ── Orders ──

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn contains_order(&self, id: Uuid) -> bool {
        self.orders.contains_key(&id)
    }

    pub fn get_order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn update_order(&self, id: Uuid, f: impl FnOnce(&mut Order)) -> bool {
        if let Some(mut entry) = self.orders.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    pub fn orders_for_portfolio(&self, portfolio_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|e| e.value().portfolio_id == portfolio_id)
            .map(|e| e.value().clone())
            .collect();
        orders.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        orders
    }

    /// Orders still awaiting fills (Created or Open), oldest first.
    pub fn pending_orders(&self, portfolio_id: Uuid) -> Vec<Order> {
        self.orders_for_portfolio(portfolio_id)
            .into_iter()
            .filter(|o| matches!(o.status, OrderStatus::Created | OrderStatus::Open))
            .collect()
    }

    /// Outstanding buy orders, the basis of snapshot pending value.
    pub fn pending_buy_orders(&self, portfolio_id: Uuid) -> Vec<Order> {
        self.pending_orders(portfolio_id)
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy)
            .collect()
    }

    // ── Trades ──

    pub fn insert_trade(&self, trade: Trade) {
        self.trades.insert(trade.id, trade);
    }

    pub fn get_trade(&self, id: Uuid) -> Option<Trade> {
        self.trades.get(&id).map(|t| t.clone())
    }

    pub fn update_trade(&self, id: Uuid, f: impl FnOnce(&mut Trade)) -> bool {
        if let Some(mut entry) = self.trades.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    pub fn find_trade_by_buy_order(&self, buy_order_id: Uuid) -> Option<Trade> {
        self.trades
            .iter()
            .find(|e| e.value().buy_order_id == buy_order_id)
            .map(|e| e.value().clone())
    }

    pub fn trades_for_portfolio(&self, portfolio_id: Uuid) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|e| e.value().portfolio_id == portfolio_id)
            .map(|e| e.value().clone())
            .collect();
        trades.sort_by(|a, b| (a.opened_at, a.id).cmp(&(b.opened_at, b.id)));
        trades
    }

    /// Open trades for one symbol in strict creation-time order (oldest
    /// first) — the FIFO matching order.
    pub fn open_trades_for_symbol(&self, portfolio_id: Uuid, symbol: &str) -> Vec<Trade> {
        self.trades_for_portfolio(portfolio_id)
            .into_iter()
            .filter(|t| t.is_open() && t.target_symbol == symbol)
            .collect()
    }

    pub fn open_trades(&self, portfolio_id: Uuid) -> Vec<Trade> {
        self.trades_for_portfolio(portfolio_id)
            .into_iter()
            .filter(|t| t.is_open())
            .collect()
    }

    // ── Guards ──

    pub fn insert_stop_loss(&self, stop_loss: StopLoss) {
        self.stop_losses.insert(stop_loss.id, stop_loss);
    }

    pub fn get_stop_loss(&self, id: Uuid) -> Option<StopLoss> {
        self.stop_losses.get(&id).map(|s| s.clone())
    }

    pub fn update_stop_loss(&self, id: Uuid, f: impl FnOnce(&mut StopLoss)) -> bool {
        if let Some(mut entry) = self.stop_losses.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    pub fn stop_losses_for_trade(&self, trade_id: Uuid) -> Vec<StopLoss> {
        let mut guards: Vec<StopLoss> = self
            .stop_losses
            .iter()
            .filter(|e| e.value().trade_id == trade_id)
            .map(|e| e.value().clone())
            .collect();
        guards.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        guards
    }

    pub fn insert_take_profit(&self, take_profit: TakeProfit) {
        self.take_profits.insert(take_profit.id, take_profit);
    }

    pub fn get_take_profit(&self, id: Uuid) -> Option<TakeProfit> {
        self.take_profits.get(&id).map(|t| t.clone())
    }

    pub fn update_take_profit(&self, id: Uuid, f: impl FnOnce(&mut TakeProfit)) -> bool {
        if let Some(mut entry) = self.take_profits.get_mut(&id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    pub fn take_profits_for_trade(&self, trade_id: Uuid) -> Vec<TakeProfit> {
        let mut guards: Vec<TakeProfit> = self
            .take_profits
            .iter()
            .filter(|e| e.value().trade_id == trade_id)
            .map(|e| e.value().clone())
            .collect();
        guards.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        guards
    }

    // ── Snapshots ──

    /// Insert a snapshot, replacing any existing one with the same
    /// (portfolio_id, created_at) key along with its position snapshots.
    pub fn upsert_snapshot(&self, snapshot: PortfolioSnapshot, positions: Vec<PositionSnapshot>) {
        let existing: Option<Uuid> = self
            .snapshots
            .iter()
            .find(|e| {
                e.value().portfolio_id == snapshot.portfolio_id
                    && e.value().created_at == snapshot.created_at
            })
            .map(|e| e.value().id);
        if let Some(id) = existing {
            self.snapshots.remove(&id);
            self.position_snapshots
                .retain(|_, p| p.snapshot_id != id);
        }
        for position in positions {
            self.position_snapshots.insert(position.id, position);
        }
        self.snapshots.insert(snapshot.id, snapshot);
    }

    pub fn snapshots_for_portfolio(&self, portfolio_id: Uuid) -> Vec<PortfolioSnapshot> {
        let mut snapshots: Vec<PortfolioSnapshot> = self
            .snapshots
            .iter()
            .filter(|e| e.value().portfolio_id == portfolio_id)
            .map(|e| e.value().clone())
            .collect();
        snapshots.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        snapshots
    }

    pub fn position_snapshots_for(&self, snapshot_id: Uuid) -> Vec<PositionSnapshot> {
        let mut positions: Vec<PositionSnapshot> = self
            .position_snapshots
            .iter()
            .filter(|e| e.value().snapshot_id == snapshot_id)
            .map(|e| e.value().clone())
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }
}
