//! Market data shapes consumed from the external data provider.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Ohlcv {
    /// Whether the bar's traded range includes the given price.
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }
}

/// Last-traded price of a symbol at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Bar granularity of an OHLCV series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFrame {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl TimeFrame {
    pub fn to_duration(&self) -> Duration {
        match self {
            TimeFrame::OneMinute => Duration::minutes(1),
            TimeFrame::FiveMinutes => Duration::minutes(5),
            TimeFrame::FifteenMinutes => Duration::minutes(15),
            TimeFrame::OneHour => Duration::hours(1),
            TimeFrame::FourHours => Duration::hours(4),
            TimeFrame::OneDay => Duration::days(1),
        }
    }
}

/// Unit of a strategy's scheduling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Duration of `interval` units.
    pub fn interval_duration(&self, interval: u32) -> Duration {
        match self {
            TimeUnit::Second => Duration::seconds(interval as i64),
            TimeUnit::Minute => Duration::minutes(interval as i64),
            TimeUnit::Hour => Duration::hours(interval as i64),
            TimeUnit::Day => Duration::days(interval as i64),
        }
    }
}

/// A strategy's declared need for one OHLCV series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSource {
    pub symbol: String,
    pub market: String,
    pub time_frame: TimeFrame,
}

impl DataSource {
    pub fn new(
        symbol: impl Into<String>,
        market: impl Into<String>,
        time_frame: TimeFrame,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            market: market.into(),
            time_frame,
        }
    }
}
