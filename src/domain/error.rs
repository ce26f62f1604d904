//! Domain error types.

use rust_decimal::Decimal;

/// Top-level error type for stockbook.
///
/// Trading variants are recoverable values returned to the caller; any of
/// them raised inside [`crate::ports::store::Store::atomic`] rolls the unit back.
#[derive(Debug, thiserror::Error)]
pub enum StockbookError {
    #[error("invalid symbol: {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("unknown symbol {symbol}: no price source recognised it")]
    UnknownSymbol { symbol: String },

    #[error("investment amount too small: minimum required is ${minimum}")]
    AmountTooSmall { minimum: Decimal },

    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("insufficient balance: available ${available}, requested ${requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("insufficient shares: owned {owned}, requested {requested}")]
    InsufficientShares { owned: Decimal, requested: Decimal },

    #[error("position {id} not found")]
    PositionNotFound { id: i64 },

    #[error("position {position_id} is not owned by account {account_id}")]
    NotOwner { position_id: i64, account_id: i64 },

    #[error("account {id} not found")]
    AccountNotFound { id: i64 },

    #[error("instrument {symbol} not found")]
    InstrumentNotFound { symbol: String },

    #[error("instrument {symbol} already exists")]
    DuplicateSymbol { symbol: String },

    #[error("invalid date range: {from} is after {to}")]
    InvalidRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },

    #[error("price unavailable for {symbol}: all sources failed")]
    PriceUnavailable { symbol: String },

    #[error("price source {source_name} does not provide historical ranges")]
    UnsupportedRange { source_name: String },

    #[error("price source {source_name} failed: {reason}")]
    Provider { source_name: String, reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StockbookError {
    pub fn provider(source_name: &str, reason: impl Into<String>) -> Self {
        StockbookError::Provider {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        StockbookError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the errors a trade request can produce from bad input or
    /// account state, as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StockbookError::InvalidSymbol { .. }
                | StockbookError::UnknownSymbol { .. }
                | StockbookError::AmountTooSmall { .. }
                | StockbookError::InvalidAmount { .. }
                | StockbookError::InsufficientBalance { .. }
                | StockbookError::InsufficientShares { .. }
                | StockbookError::PositionNotFound { .. }
                | StockbookError::NotOwner { .. }
                | StockbookError::AccountNotFound { .. }
                | StockbookError::InstrumentNotFound { .. }
                | StockbookError::DuplicateSymbol { .. }
                | StockbookError::PriceUnavailable { .. }
        )
    }
}

impl From<&StockbookError> for std::process::ExitCode {
    fn from(err: &StockbookError) -> Self {
        let code: u8 = match err {
            StockbookError::Io(_) => 1,
            StockbookError::ConfigParse { .. }
            | StockbookError::ConfigMissing { .. }
            | StockbookError::ConfigInvalid { .. } => 2,
            StockbookError::Database { .. } | StockbookError::DatabaseQuery { .. } => 3,
            StockbookError::PriceUnavailable { .. }
            | StockbookError::UnsupportedRange { .. }
            | StockbookError::Provider { .. } => 5,
            _ => 4,
        };
        std::process::ExitCode::from(code)
    }
}
