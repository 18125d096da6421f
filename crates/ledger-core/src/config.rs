//! Configuration for the algoledger runtime.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backtest: BacktestConfig,
    pub execution: ExecutionConfig,
    pub credential: Option<MarketCredential>,
}

/// Backtest and checkpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    /// Directory for persisted backtest-run checkpoints.
    pub checkpoint_directory: PathBuf,
    /// Default initial balance for backtest portfolios.
    pub initial_balance: Decimal,
    /// Isolate one strategy's failure from the rest of a batch.
    pub continue_on_error: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            checkpoint_directory: PathBuf::from("backtest_runs"),
            initial_balance: Decimal::new(10000, 0),
            continue_on_error: false,
        }
    }
}

/// Live execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Whether orders are dispatched to the external executor.
    pub live_trading: bool,
    /// Poll interval for pending-order checks, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            live_trading: false,
            poll_interval_secs: 10,
        }
    }
}

/// Credential for one market. Required when live trading is enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketCredential {
    pub market: String,
    pub api_key: String,
    pub secret_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let live_trading = env::var("LIVE_TRADING")
            .ok()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let credential = match env::var("MARKET").ok() {
            Some(market) => Some(MarketCredential {
                market,
                api_key: env::var("MARKET_API_KEY").map_err(|_| Error::Config {
                    message: "MARKET_API_KEY environment variable not set".to_string(),
                })?,
                secret_key: env::var("MARKET_SECRET_KEY").map_err(|_| Error::Config {
                    message: "MARKET_SECRET_KEY environment variable not set".to_string(),
                })?,
            }),
            None => None,
        };

        if live_trading && credential.is_none() {
            return Err(Error::Config {
                message: "live trading requires MARKET and credential variables".to_string(),
            });
        }

        Ok(Self {
            backtest: BacktestConfig {
                checkpoint_directory: env::var("CHECKPOINT_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("backtest_runs")),
                initial_balance: env::var("INITIAL_BALANCE")
                    .ok()
                    .and_then(|s| Decimal::from_str(&s).ok())
                    .unwrap_or_else(|| Decimal::new(10000, 0)),
                continue_on_error: env::var("CONTINUE_ON_ERROR")
                    .ok()
                    .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            execution: ExecutionConfig {
                live_trading,
                poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            credential,
        })
    }
}
