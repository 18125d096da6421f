//! Trade entity (round-trip grouping of buy and sell volume) and the
//! stop-loss/take-profit guards that protect open trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// One opening buy order plus zero or more closing sell allocations.
///
/// `amount` grows with fills of the opening order; `available_amount` is
/// the part not yet reserved by sell orders; `filled_amount` is the part
/// whose closing sells have actually filled. For any symbol the sum of
/// open trades' `available_amount` never exceeds the position amount,
/// because both are debited by the same sell-order reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    /// The buy order that opened this trade.
    pub buy_order_id: Uuid,
    /// Sell orders that have closed part or all of this trade.
    pub sell_order_ids: Vec<Uuid>,
    pub target_symbol: String,
    pub trading_symbol: String,
    pub amount: Decimal,
    pub available_amount: Decimal,
    pub filled_amount: Decimal,
    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    /// Realized gain over all closed slices:
    /// Σ (close_price − open_price) × closed_amount.
    pub net_gain: Decimal,
    /// Highest price observed since opening, for trailing guards.
    pub high_water_mark: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// Open a trade for a buy order, sized to the order's current fill.
    pub fn open(
        id: Uuid,
        portfolio_id: Uuid,
        buy_order_id: Uuid,
        target_symbol: impl Into<String>,
        trading_symbol: impl Into<String>,
        filled_amount: Decimal,
        open_price: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            portfolio_id,
            buy_order_id,
            sell_order_ids: Vec::new(),
            target_symbol: target_symbol.into(),
            trading_symbol: trading_symbol.into(),
            amount: filled_amount,
            available_amount: filled_amount,
            filled_amount: Decimal::ZERO,
            open_price,
            opened_at,
            closed_at: None,
            status: TradeStatus::Open,
            net_gain: Decimal::ZERO,
            high_water_mark: None,
            updated_at: opened_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Unrealized gain of the still-open part at the given price.
    pub fn unrealized_gain(&self, price: Decimal) -> Decimal {
        (price - self.open_price) * (self.amount - self.filled_amount)
    }

    /// Market value of the still-open part at the given price.
    pub fn open_value(&self, price: Decimal) -> Decimal {
        (self.amount - self.filled_amount) * price
    }
}

/// Trigger style for a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRiskType {
    /// Threshold anchored at the trade's open price.
    Fixed,
    /// Threshold follows the trade's high-water mark.
    Trailing,
}

/// Stop-loss guard attached to an open trade.
///
/// Triggers when price falls `percentage` percent below the anchor (open
/// price for fixed, high-water mark for trailing) and sells
/// `sell_percentage` percent of the trade amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLoss {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub risk_type: TradeRiskType,
    pub percentage: Decimal,
    pub sell_percentage: Decimal,
    /// Amount already sold (or reserved by in-flight sells) under this
    /// guard. Restored on order failure.
    pub sold_amount: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl StopLoss {
    pub fn new(
        id: Uuid,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            trade_id,
            risk_type,
            percentage,
            sell_percentage,
            sold_amount: Decimal::ZERO,
            active: true,
            created_at,
        }
    }

    /// Check whether the guard fires at the given price.
    pub fn is_triggered(&self, trade: &Trade, price: Decimal) -> bool {
        if !self.active {
            return false;
        }
        let anchor = match self.risk_type {
            TradeRiskType::Fixed => trade.open_price,
            TradeRiskType::Trailing => match trade.high_water_mark {
                Some(mark) => mark,
                None => return false,
            },
        };
        let threshold = anchor * (Decimal::ONE_HUNDRED - self.percentage) / Decimal::ONE_HUNDRED;
        price <= threshold
    }

    /// Amount to sell when the guard fires, capped at what the trade still
    /// has available.
    pub fn sell_amount(&self, trade: &Trade) -> Decimal {
        let target = trade.amount * self.sell_percentage / Decimal::ONE_HUNDRED;
        (target - self.sold_amount).max(Decimal::ZERO).min(trade.available_amount)
    }
}

/// Take-profit guard attached to an open trade.
///
/// Fixed: fires when price rises `percentage` percent above the open
/// price. Trailing: arms once that threshold is reached, then fires when
/// price pulls back `percentage` percent from the high-water mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfit {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub risk_type: TradeRiskType,
    pub percentage: Decimal,
    pub sell_percentage: Decimal,
    pub sold_amount: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TakeProfit {
    pub fn new(
        id: Uuid,
        trade_id: Uuid,
        risk_type: TradeRiskType,
        percentage: Decimal,
        sell_percentage: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            trade_id,
            risk_type,
            percentage,
            sell_percentage,
            sold_amount: Decimal::ZERO,
            active: true,
            created_at,
        }
    }

    pub fn is_triggered(&self, trade: &Trade, price: Decimal) -> bool {
        if !self.active {
            return false;
        }
        let arm_threshold =
            trade.open_price * (Decimal::ONE_HUNDRED + self.percentage) / Decimal::ONE_HUNDRED;
        match self.risk_type {
            TradeRiskType::Fixed => price >= arm_threshold,
            TradeRiskType::Trailing => {
                let mark = match trade.high_water_mark {
                    Some(mark) if mark >= arm_threshold => mark,
                    _ => return false,
                };
                let pullback =
                    mark * (Decimal::ONE_HUNDRED - self.percentage) / Decimal::ONE_HUNDRED;
                price <= pullback
            }
        }
    }

    pub fn sell_amount(&self, trade: &Trade) -> Decimal {
        let target = trade.amount * self.sell_percentage / Decimal::ONE_HUNDRED;
        (target - self.sold_amount).max(Decimal::ZERO).min(trade.available_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_trade(amount: i64, price: i64) -> Trade {
        Trade::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTC",
            "EUR",
            Decimal::new(amount, 0),
            Decimal::new(price, 0),
            Utc::now(),
        )
    }

    #[test]
    fn test_trade_opens_sized_to_fill() {
        let trade = open_trade(2, 100);
        assert_eq!(trade.amount, Decimal::new(2, 0));
        assert_eq!(trade.available_amount, Decimal::new(2, 0));
        assert_eq!(trade.filled_amount, Decimal::ZERO);
        assert!(trade.is_open());
    }

    #[test]
    fn test_unrealized_gain() {
        let trade = open_trade(2, 100);
        // (110 - 100) * 2 = 20
        assert_eq!(
            trade.unrealized_gain(Decimal::new(110, 0)),
            Decimal::new(20, 0)
        );
    }

    #[test]
    fn test_fixed_stop_loss_triggers_below_threshold() {
        let trade = open_trade(1, 100);
        let stop = StopLoss::new(
            Uuid::new_v4(),
            trade.id,
            TradeRiskType::Fixed,
            Decimal::new(10, 0), // 10% below open
            Decimal::ONE_HUNDRED,
            Utc::now(),
        );

        assert!(!stop.is_triggered(&trade, Decimal::new(95, 0)));
        // Threshold: 100 * 0.90 = 90
        assert!(stop.is_triggered(&trade, Decimal::new(90, 0)));
        assert!(stop.is_triggered(&trade, Decimal::new(85, 0)));
    }

    #[test]
    fn test_trailing_stop_loss_follows_high_water_mark() {
        let mut trade = open_trade(1, 100);
        let stop = StopLoss::new(
            Uuid::new_v4(),
            trade.id,
            TradeRiskType::Trailing,
            Decimal::new(10, 0),
            Decimal::ONE_HUNDRED,
            Utc::now(),
        );

        // No mark yet: never triggers.
        assert!(!stop.is_triggered(&trade, Decimal::new(50, 0)));

        trade.high_water_mark = Some(Decimal::new(120, 0));
        // Threshold: 120 * 0.90 = 108
        assert!(!stop.is_triggered(&trade, Decimal::new(110, 0)));
        assert!(stop.is_triggered(&trade, Decimal::new(108, 0)));
    }

    #[test]
    fn test_fixed_take_profit() {
        let trade = open_trade(1, 100);
        let tp = TakeProfit::new(
            Uuid::new_v4(),
            trade.id,
            TradeRiskType::Fixed,
            Decimal::new(5, 0), // 5% above open
            Decimal::new(50, 0),
            Utc::now(),
        );

        assert!(!tp.is_triggered(&trade, Decimal::new(104, 0)));
        // Threshold: 100 * 1.05 = 105
        assert!(tp.is_triggered(&trade, Decimal::new(105, 0)));
        // 50% of 1.0 = 0.5
        assert_eq!(tp.sell_amount(&trade), Decimal::new(5, 1));
    }

    #[test]
    fn test_trailing_take_profit_arms_then_fires_on_pullback() {
        let mut trade = open_trade(1, 100);
        let tp = TakeProfit::new(
            Uuid::new_v4(),
            trade.id,
            TradeRiskType::Trailing,
            Decimal::new(5, 0),
            Decimal::ONE_HUNDRED,
            Utc::now(),
        );

        // Mark below the arm threshold (105): not armed.
        trade.high_water_mark = Some(Decimal::new(104, 0));
        assert!(!tp.is_triggered(&trade, Decimal::new(99, 0)));

        // Armed at 110; pullback threshold 110 * 0.95 = 104.5
        trade.high_water_mark = Some(Decimal::new(110, 0));
        assert!(!tp.is_triggered(&trade, Decimal::new(105, 0)));
        assert!(tp.is_triggered(&trade, Decimal::new(104, 0)));
    }

    #[test]
    fn test_guard_sell_amount_caps_at_available() {
        let mut trade = open_trade(2, 100);
        trade.available_amount = Decimal::new(5, 1); // 0.5 left available
        let stop = StopLoss::new(
            Uuid::new_v4(),
            trade.id,
            TradeRiskType::Fixed,
            Decimal::new(10, 0),
            Decimal::ONE_HUNDRED,
            Utc::now(),
        );
        // Target 100% of 2.0 but only 0.5 available.
        assert_eq!(stop.sell_amount(&trade), Decimal::new(5, 1));
    }
}
