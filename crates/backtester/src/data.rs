//! Pre-materialized market data for simulation.
//!
//! Backtests perform no network I/O: the caller loads every needed series
//! up front and the engines read from memory. This is the backtest-side
//! implementation of the external `DataProvider` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::provider::DataProvider;
use ledger_core::types::{DataSource, Ohlcv, Ticker, TimeFrame};
use ledger_core::{Error, Result};
use std::collections::HashMap;

/// In-memory `DataProvider` backed by bar series loaded before the run.
#[derive(Debug, Default)]
pub struct StaticDataProvider {
    series: HashMap<DataSource, Vec<Ohlcv>>,
}

impl StaticDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bar series for a data source. Bars are kept sorted by
    /// timestamp.
    pub fn with_series(mut self, source: DataSource, mut bars: Vec<Ohlcv>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        self.series.insert(source, bars);
        self
    }

    fn series_for(&self, symbol: &str, market: &str, time_frame: TimeFrame) -> Option<&Vec<Ohlcv>> {
        self.series
            .get(&DataSource::new(symbol, market, time_frame))
    }

    /// All registered series for one symbol/market, finest frame first.
    fn frames_for(&self, symbol: &str, market: &str) -> Vec<(TimeFrame, &Vec<Ohlcv>)> {
        let mut frames: Vec<(TimeFrame, &Vec<Ohlcv>)> = self
            .series
            .iter()
            .filter(|(source, _)| source.symbol == symbol && source.market == market)
            .map(|(source, bars)| (source.time_frame, bars))
            .collect();
        frames.sort_by_key(|(frame, _)| *frame);
        frames
    }
}

#[async_trait]
impl DataProvider for StaticDataProvider {
    async fn get_ohlcv_data(
        &self,
        symbol: &str,
        market: &str,
        time_frame: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Ohlcv>> {
        let series = self
            .series_for(symbol, market, time_frame)
            .ok_or_else(|| Error::MissingData {
                symbol: symbol.to_string(),
                market: market.to_string(),
                detail: format!("{time_frame:?}"),
            })?;
        Ok(series
            .iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn get_ticker_data(
        &self,
        symbol: &str,
        market: &str,
        at: DateTime<Utc>,
    ) -> Result<Ticker> {
        // Last close at or before `at`, from the finest frame that has one.
        for (_, bars) in self.frames_for(symbol, market) {
            if let Some(bar) = bars.iter().rev().find(|b| b.timestamp <= at) {
                return Ok(Ticker {
                    symbol: symbol.to_string(),
                    price: bar.close,
                    timestamp: bar.timestamp,
                });
            }
        }
        Err(Error::MissingData {
            symbol: symbol.to_string(),
            market: market.to_string(),
            detail: format!("no ticker at {at}"),
        })
    }

    async fn get_vectorized_backtest_data(
        &self,
        data_sources: &[DataSource],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<DataSource, Vec<Ohlcv>>> {
        let mut out = HashMap::new();
        for source in data_sources {
            let bars = self
                .get_ohlcv_data(&source.symbol, &source.market, source.time_frame, start, end)
                .await?;
            out.insert(source.clone(), bars);
        }
        Ok(out)
    }
}
