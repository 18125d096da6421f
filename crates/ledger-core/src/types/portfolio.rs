//! Portfolio entity and creation configuration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate cash and accounting state for one trading identity.
///
/// The accounting identity maintained by the services: the cash position's
/// amount equals `unallocated` after every mutation, and every mutation is
/// attributable to exactly one order transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    /// Stable external identifier (idempotency key for creation).
    pub identifier: String,
    /// Market/exchange this portfolio trades on.
    pub market: String,
    /// Currency symbol the portfolio holds cash in (e.g. "EUR").
    pub trading_symbol: String,
    /// Cash not reserved by open buy orders.
    pub unallocated: Decimal,
    /// Balance the portfolio started with.
    pub initial_balance: Decimal,
    /// Realized net gain over all closed trade slices.
    pub realized: Decimal,
    /// Cumulative cost of all buy fills.
    pub total_cost: Decimal,
    /// Cumulative proceeds of all sell fills.
    pub total_revenue: Decimal,
    /// Cumulative traded notional (buys + sells).
    pub total_trade_volume: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(
        id: Uuid,
        configuration: &PortfolioConfiguration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            identifier: configuration.identifier.clone(),
            market: configuration.market.clone(),
            trading_symbol: configuration.trading_symbol.clone(),
            unallocated: configuration.initial_balance,
            initial_balance: configuration.initial_balance,
            realized: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            total_revenue: Decimal::ZERO,
            total_trade_volume: Decimal::ZERO,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Inputs for creating (or re-resolving) a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfiguration {
    pub identifier: String,
    pub market: String,
    pub trading_symbol: String,
    pub initial_balance: Decimal,
}

impl PortfolioConfiguration {
    pub fn new(
        identifier: impl Into<String>,
        market: impl Into<String>,
        trading_symbol: impl Into<String>,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            market: market.into(),
            trading_symbol: trading_symbol.into(),
            initial_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_portfolio_from_configuration() {
        let config =
            PortfolioConfiguration::new("main", "BINANCE", "EUR", Decimal::new(1000, 0));
        let portfolio = Portfolio::new(Uuid::new_v4(), &config, Utc::now());

        assert_eq!(portfolio.identifier, "main");
        assert_eq!(portfolio.unallocated, Decimal::new(1000, 0));
        assert_eq!(portfolio.initial_balance, Decimal::new(1000, 0));
        assert_eq!(portfolio.realized, Decimal::ZERO);
        assert_eq!(portfolio.total_trade_volume, Decimal::ZERO);
    }
}
