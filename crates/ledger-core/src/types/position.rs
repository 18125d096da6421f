//! Position bookkeeping entity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-symbol holding within a portfolio.
///
/// `amount` is the net of all filled buy volume minus reserved/sold sell
/// volume for the symbol; it is never negative for non-cash positions.
/// The cash position's symbol equals the portfolio trading symbol and its
/// amount mirrors the portfolio's `unallocated` exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub amount: Decimal,
    /// Cost basis of the currently held amount.
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        id: Uuid,
        portfolio_id: Uuid,
        symbol: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            portfolio_id,
            symbol: symbol.into(),
            amount: Decimal::ZERO,
            cost: Decimal::ZERO,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount == Decimal::ZERO
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.amount * price
    }
}
