//! Portfolio creation and cash bookkeeping.

use std::sync::Arc;

use ledger_core::clock::{Clock, IdGenerator};
use ledger_core::provider::PortfolioProvider;
use ledger_core::types::{Portfolio, PortfolioConfiguration, Position};
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::LedgerStore;

/// Creates portfolios and applies their cash mutations.
///
/// Every mutation is expressed relative to exactly one order transition
/// and has an exact inverse: `reserve`/`release` for buy reservations,
/// `settle_buy_fill`/`settle_sell_fill` for fills. The cash position is
/// kept numerically equal to `unallocated` after every call.
pub struct PortfolioService {
    store: Arc<LedgerStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    /// Venue balance source, for confirming initial balances in live mode.
    provider: Option<Arc<dyn PortfolioProvider>>,
}

impl PortfolioService {
    pub fn new(
        store: Arc<LedgerStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PortfolioProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Create a portfolio from its configuration, or return the existing
    /// one unchanged if the identifier is already registered (idempotent).
    pub async fn create_from_configuration(
        &self,
        configuration: &PortfolioConfiguration,
    ) -> Result<Portfolio> {
        if let Some(existing) = self
            .store
            .find_portfolio_by_identifier(&configuration.identifier)
        {
            debug!(
                identifier = %configuration.identifier,
                "Portfolio already exists, returning unchanged"
            );
            return Ok(existing);
        }

        if let Some(provider) = &self.provider {
            let balance = provider
                .unallocated_balance(&configuration.market, &configuration.trading_symbol)
                .await?;
            if balance < configuration.initial_balance {
                return Err(Error::Config {
                    message: format!(
                        "market {} holds {} {}, configuration requires {}",
                        configuration.market,
                        balance,
                        configuration.trading_symbol,
                        configuration.initial_balance
                    ),
                });
            }
        }

        let now = self.clock.now();
        let portfolio = Portfolio::new(self.ids.next(), configuration, now);

        // The cash position mirrors unallocated from the start.
        let mut cash = Position::new(
            self.ids.next(),
            portfolio.id,
            configuration.trading_symbol.clone(),
            now,
        );
        cash.amount = configuration.initial_balance;
        cash.cost = configuration.initial_balance;

        info!(
            identifier = %portfolio.identifier,
            market = %portfolio.market,
            initial_balance = %portfolio.initial_balance,
            "Created portfolio"
        );

        self.store.insert_position(cash);
        self.store.insert_portfolio(portfolio.clone());
        Ok(portfolio)
    }

    pub fn get(&self, portfolio_id: Uuid) -> Result<Portfolio> {
        self.store
            .get_portfolio(portfolio_id)
            .ok_or_else(|| Error::PortfolioNotFound(portfolio_id.to_string()))
    }

    /// Reserve funds for a buy order. Inverse of [`Self::release`].
    pub fn reserve(&self, portfolio_id: Uuid, value: Decimal) -> Result<()> {
        let portfolio = self.get(portfolio_id)?;
        if portfolio.unallocated < value {
            return Err(Error::InsufficientFunds {
                required: value,
                available: portfolio.unallocated,
            });
        }
        self.adjust_unallocated(portfolio_id, -value);
        Ok(())
    }

    /// Return reserved funds of an unfilled buy remainder.
    pub fn release(&self, portfolio_id: Uuid, value: Decimal) {
        self.adjust_unallocated(portfolio_id, value);
    }

    /// Record a buy fill. Funds were already reserved at creation; only
    /// the running totals move.
    pub fn settle_buy_fill(&self, portfolio_id: Uuid, value: Decimal) {
        let now = self.clock.now();
        self.store.update_portfolio(portfolio_id, |p| {
            p.total_cost += value;
            p.total_trade_volume += value;
            p.updated_at = now;
        });
    }

    /// Record a sell fill: credit the proceeds and realize the gain.
    pub fn settle_sell_fill(&self, portfolio_id: Uuid, proceeds: Decimal, net_gain: Decimal) {
        let now = self.clock.now();
        self.store.update_portfolio(portfolio_id, |p| {
            p.total_revenue += proceeds;
            p.total_trade_volume += proceeds;
            p.realized += net_gain;
            p.updated_at = now;
        });
        self.adjust_unallocated(portfolio_id, proceeds);
    }

    /// Move `unallocated` and the mirroring cash position together.
    fn adjust_unallocated(&self, portfolio_id: Uuid, delta: Decimal) {
        let now = self.clock.now();
        let mut trading_symbol = None;
        self.store.update_portfolio(portfolio_id, |p| {
            p.unallocated += delta;
            p.updated_at = now;
            trading_symbol = Some(p.trading_symbol.clone());
        });
        if let Some(symbol) = trading_symbol {
            if let Some(cash) = self.store.find_position(portfolio_id, &symbol) {
                self.store.update_position(cash.id, |pos| {
                    pos.amount += delta;
                    pos.cost += delta;
                    pos.updated_at = now;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::clock::{SequentialIds, SimulatedClock};
    use ledger_core::provider::MockPortfolioProvider;
    use chrono::{TimeZone, Utc};

    fn service(store: Arc<LedgerStore>) -> PortfolioService {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PortfolioService::new(
            store,
            Arc::new(SequentialIds::new()),
            Arc::new(SimulatedClock::new(start)),
        )
    }

    fn config() -> PortfolioConfiguration {
        PortfolioConfiguration::new("main", "BINANCE", "EUR", Decimal::new(1000, 0))
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = Arc::new(LedgerStore::new());
        let service = service(store.clone());

        let first = service.create_from_configuration(&config()).await.unwrap();
        let second = service.create_from_configuration(&config()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.unallocated, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn test_cash_position_mirrors_unallocated() {
        let store = Arc::new(LedgerStore::new());
        let service = service(store.clone());
        let portfolio = service.create_from_configuration(&config()).await.unwrap();

        service.reserve(portfolio.id, Decimal::new(300, 0)).unwrap();

        let portfolio = service.get(portfolio.id).unwrap();
        let cash = store.find_position(portfolio.id, "EUR").unwrap();
        assert_eq!(portfolio.unallocated, Decimal::new(700, 0));
        assert_eq!(cash.amount, Decimal::new(700, 0));

        service.release(portfolio.id, Decimal::new(300, 0));
        let cash = store.find_position(portfolio.id, "EUR").unwrap();
        assert_eq!(cash.amount, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn test_reserve_rejects_insufficient_funds() {
        let store = Arc::new(LedgerStore::new());
        let service = service(store.clone());
        let portfolio = service.create_from_configuration(&config()).await.unwrap();

        let err = service
            .reserve(portfolio.id, Decimal::new(1001, 0))
            .unwrap_err();
        assert!(err.is_operational());
        // Nothing mutated.
        assert_eq!(
            service.get(portfolio.id).unwrap().unallocated,
            Decimal::new(1000, 0)
        );
    }

    #[tokio::test]
    async fn test_live_balance_confirmation() {
        let mut provider = MockPortfolioProvider::new();
        provider
            .expect_unallocated_balance()
            .returning(|_, _| Ok(Decimal::new(500, 0)));

        let store = Arc::new(LedgerStore::new());
        let service = service(store.clone()).with_provider(Arc::new(provider));

        // Configuration wants 1000 but the venue only holds 500.
        let err = service.create_from_configuration(&config()).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_sell_settlement_realizes_gain() {
        let store = Arc::new(LedgerStore::new());
        let service = service(store.clone());
        let portfolio = service.create_from_configuration(&config()).await.unwrap();

        service.reserve(portfolio.id, Decimal::new(100, 0)).unwrap();
        service.settle_buy_fill(portfolio.id, Decimal::new(100, 0));
        // Sold what was bought for 100 at 120: gain 20.
        service.settle_sell_fill(portfolio.id, Decimal::new(120, 0), Decimal::new(20, 0));

        let portfolio = service.get(portfolio.id).unwrap();
        assert_eq!(portfolio.unallocated, Decimal::new(1020, 0));
        assert_eq!(portfolio.realized, Decimal::new(20, 0));
        assert_eq!(portfolio.total_cost, Decimal::new(100, 0));
        assert_eq!(portfolio.total_revenue, Decimal::new(120, 0));
        assert_eq!(portfolio.total_trade_volume, Decimal::new(220, 0));
    }
}
