//! Error types for the algoledger runtime.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("insufficient unallocated funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("no position for symbol {symbol} in portfolio {portfolio_id}")]
    PositionNotFound { portfolio_id: Uuid, symbol: String },

    #[error("position {symbol} holds {available}, cannot sell {requested}")]
    InsufficientPosition {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("trading symbol mismatch: order uses {order_symbol}, portfolio trades {portfolio_symbol}")]
    TradingSymbolMismatch {
        order_symbol: String,
        portfolio_symbol: String,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("portfolio {0} not found")]
    PortfolioNotFound(String),

    #[error("trade {0} not found")]
    TradeNotFound(Uuid),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("no market data for {symbol}/{market} at {detail}")]
    MissingData {
        symbol: String,
        market: String,
        detail: String,
    },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is a recoverable validation failure the caller can
    /// act on, as opposed to a fatal setup/configuration problem. Validation
    /// errors are always raised before any ledger mutation.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds { .. }
                | Error::PositionNotFound { .. }
                | Error::InsufficientPosition { .. }
                | Error::TradingSymbolMismatch { .. }
                | Error::InvalidOrder(_)
                | Error::OrderNotFound(_)
                | Error::TradeNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
