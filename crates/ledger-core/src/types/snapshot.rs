//! Point-in-time portfolio and position valuations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only valuation of a portfolio at one instant.
///
/// Unique per (portfolio_id, created_at); a second snapshot at the same
/// instant replaces the first so that retried updates stay idempotent.
/// `total_value = unallocated + pending_value + Σ position market values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub trading_symbol: String,
    pub unallocated: Decimal,
    /// Reserved cost of outstanding buy orders (Created/Open).
    pub pending_value: Decimal,
    pub total_value: Decimal,
    pub realized: Decimal,
    pub total_net_gain: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Valuation of one held position inside a portfolio snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub symbol: String,
    pub amount: Decimal,
    pub cost: Decimal,
    /// Market price at the snapshot timestamp (not wall-clock now).
    pub price: Decimal,
    pub value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snapshot = PortfolioSnapshot {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            trading_symbol: "EUR".to_string(),
            unallocated: Decimal::new(800, 0),
            pending_value: Decimal::new(100, 0),
            total_value: Decimal::new(1050, 0),
            realized: Decimal::ZERO,
            total_net_gain: Decimal::new(50, 0),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let deser: PortfolioSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.id, deser.id);
        assert_eq!(snapshot.total_value, deser.total_value);
    }
}
