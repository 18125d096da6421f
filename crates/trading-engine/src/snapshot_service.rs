//! Point-in-time portfolio valuation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ledger_core::clock::IdGenerator;
use ledger_core::provider::DataProvider;
use ledger_core::types::{PortfolioSnapshot, PositionSnapshot};
use ledger_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::store::LedgerStore;

/// Values a portfolio at an instant, combining ledger state with market
/// prices fetched **at that instant** (never wall-clock now). The same
/// code path runs for live trading and backtesting, which is what makes
/// their equity curves comparable.
pub struct SnapshotService {
    store: Arc<LedgerStore>,
    data_provider: Arc<dyn DataProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl SnapshotService {
    pub fn new(
        store: Arc<LedgerStore>,
        data_provider: Arc<dyn DataProvider>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            data_provider,
            ids,
        }
    }

    /// Snapshot the portfolio at `at`:
    /// `total_value = unallocated + pending_value + Σ mark-to-market`.
    /// One position snapshot per held position; upserted on the unique
    /// (portfolio_id, at) key.
    pub async fn create_snapshot(
        &self,
        portfolio_id: Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PortfolioSnapshot> {
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .ok_or_else(|| Error::PortfolioNotFound(portfolio_id.to_string()))?;

        // Reserved cost of outstanding buys.
        let pending_value: Decimal = self
            .store
            .pending_buy_orders(portfolio_id)
            .iter()
            .map(|o| o.outstanding_value())
            .sum();

        // Symbols that need a price: held non-cash positions and open
        // trades (a fully reserved position can be flat while its trade
        // still carries unrealized gain).
        let positions = self.store.positions_for_portfolio(portfolio_id);
        let open_trades = self.store.open_trades(portfolio_id);
        let mut symbols: BTreeSet<String> = BTreeSet::new();
        for position in &positions {
            if position.symbol != portfolio.trading_symbol && position.amount > Decimal::ZERO {
                symbols.insert(position.symbol.clone());
            }
        }
        for trade in &open_trades {
            symbols.insert(trade.target_symbol.clone());
        }

        let mut prices: HashMap<String, Decimal> = HashMap::new();
        for symbol in &symbols {
            let ticker = self
                .data_provider
                .get_ticker_data(symbol, &portfolio.market, at)
                .await?;
            prices.insert(symbol.clone(), ticker.price);
        }

        let snapshot_id = self.ids.next();
        let mut position_snapshots = Vec::new();
        let mut marked_value = Decimal::ZERO;
        for position in &positions {
            let is_cash = position.symbol == portfolio.trading_symbol;
            let price = if is_cash {
                Decimal::ONE
            } else {
                match prices.get(&position.symbol) {
                    Some(price) => *price,
                    None => continue, // flat non-cash position without open trades
                }
            };
            let value = position.market_value(price);
            if !is_cash {
                marked_value += value;
            }
            position_snapshots.push(PositionSnapshot {
                id: self.ids.next(),
                snapshot_id,
                symbol: position.symbol.clone(),
                amount: position.amount,
                cost: position.cost,
                price,
                value,
            });
        }

        let unrealized: Decimal = open_trades
            .iter()
            .filter_map(|t| prices.get(&t.target_symbol).map(|p| t.unrealized_gain(*p)))
            .sum();

        let snapshot = PortfolioSnapshot {
            id: snapshot_id,
            portfolio_id,
            trading_symbol: portfolio.trading_symbol.clone(),
            unallocated: portfolio.unallocated,
            pending_value,
            total_value: portfolio.unallocated + pending_value + marked_value,
            realized: portfolio.realized,
            total_net_gain: portfolio.realized + unrealized,
            created_at: at,
        };

        debug!(
            portfolio_id = %portfolio_id,
            total_value = %snapshot.total_value,
            pending_value = %pending_value,
            "Created portfolio snapshot"
        );

        self.store
            .upsert_snapshot(snapshot.clone(), position_snapshots);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ledger_core::clock::{SequentialIds, SimulatedClock};
    use ledger_core::provider::MockDataProvider;
    use ledger_core::types::{Order, OrderData, PortfolioConfiguration, Ticker};
    use crate::{PortfolioService, PositionService};

    fn ts(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn provider_with_price(price: Decimal) -> MockDataProvider {
        let mut provider = MockDataProvider::new();
        provider.expect_get_ticker_data().returning(move |symbol, _, at| {
            Ok(Ticker {
                symbol: symbol.to_string(),
                price,
                timestamp: at,
            })
        });
        provider
    }

    #[tokio::test]
    async fn test_snapshot_totals() {
        let store = Arc::new(LedgerStore::new());
        let ids = Arc::new(SequentialIds::new());
        let clock = Arc::new(SimulatedClock::new(ts(0)));
        let portfolios = PortfolioService::new(store.clone(), ids.clone(), clock.clone());
        let positions = PositionService::new(store.clone(), ids.clone(), clock.clone());

        let portfolio = portfolios
            .create_from_configuration(&PortfolioConfiguration::new(
                "main",
                "BINANCE",
                "EUR",
                Decimal::new(1000, 0),
            ))
            .await
            .unwrap();

        // Hold 2 BTC bought at 100; one outstanding buy of 1 @ 150.
        let btc = positions.get_or_create(portfolio.id, "BTC");
        positions.apply_buy_fill(btc.id, Decimal::new(2, 0), Decimal::new(100, 0));
        portfolios.reserve(portfolio.id, Decimal::new(150, 0)).unwrap();
        portfolios.reserve(portfolio.id, Decimal::new(200, 0)).unwrap();
        portfolios.settle_buy_fill(portfolio.id, Decimal::new(200, 0));

        let data = OrderData::limit_buy(
            portfolio.id,
            "BTC",
            "EUR",
            Decimal::ONE,
            Decimal::new(150, 0),
        );
        store.insert_order(Order::new(ids.next(), &data, ts(1)));

        let service = SnapshotService::new(
            store.clone(),
            Arc::new(provider_with_price(Decimal::new(120, 0))),
            ids.clone(),
        );
        let snapshot = service.create_snapshot(portfolio.id, ts(2)).await.unwrap();

        // unallocated: 1000 − 150 − 200 = 650
        assert_eq!(snapshot.unallocated, Decimal::new(650, 0));
        // pending: 1 × 150 = 150
        assert_eq!(snapshot.pending_value, Decimal::new(150, 0));
        // mark-to-market: 2 × 120 = 240; total: 650 + 150 + 240 = 1040
        assert_eq!(snapshot.total_value, Decimal::new(1040, 0));
    }

    #[tokio::test]
    async fn test_snapshot_uses_requested_timestamp() {
        let store = Arc::new(LedgerStore::new());
        let ids = Arc::new(SequentialIds::new());
        let clock = Arc::new(SimulatedClock::new(ts(0)));
        let portfolios = PortfolioService::new(store.clone(), ids.clone(), clock.clone());
        let positions = PositionService::new(store.clone(), ids.clone(), clock.clone());

        let portfolio = portfolios
            .create_from_configuration(&PortfolioConfiguration::new(
                "main",
                "BINANCE",
                "EUR",
                Decimal::new(1000, 0),
            ))
            .await
            .unwrap();
        let btc = positions.get_or_create(portfolio.id, "BTC");
        positions.apply_buy_fill(btc.id, Decimal::ONE, Decimal::new(100, 0));

        let at = ts(7);
        let mut provider = MockDataProvider::new();
        provider
            .expect_get_ticker_data()
            .withf(move |_, _, requested| *requested == at)
            .returning(|symbol, _, at| {
                Ok(Ticker {
                    symbol: symbol.to_string(),
                    price: Decimal::new(100, 0),
                    timestamp: at,
                })
            });

        let service = SnapshotService::new(store.clone(), Arc::new(provider), ids.clone());
        let snapshot = service.create_snapshot(portfolio.id, at).await.unwrap();
        assert_eq!(snapshot.created_at, at);
    }
}
