//! Error types for the trailstop system.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid price: {price} (prices must be positive)")]
    InvalidPrice { price: Decimal },

    #[error("P&L of {reference_price} against entry {entry_price} is out of range")]
    PnlOverflow {
        entry_price: Decimal,
        reference_price: Decimal,
    },

    #[error("Invalid quantity: {quantity} (quantities must be positive)")]
    InvalidQuantity { quantity: Decimal },

    #[error("Quote unavailable for {symbol}: {message}")]
    QuoteUnavailable { symbol: String, message: String },

    #[error("{stage} rejected by hook(s): {}", .hooks.join(", "))]
    HookRejected { stage: String, hooks: Vec<String> },

    #[error("Position {0} is already closed")]
    PositionAlreadyClosed(Uuid),

    #[error("Position {0} not found")]
    PositionNotFound(Uuid),

    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    #[error("Trade execution failed: {message}")]
    Execution { message: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Whether the failed operation may succeed on a later monitor cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QuoteUnavailable { .. }
                | Error::Persistence { .. }
                | Error::Timeout { .. }
                | Error::Execution { .. }
                | Error::Http(_)
                | Error::Database(_)
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
