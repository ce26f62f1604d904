//! Quote provider port trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::error::StockbookError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::symbol;

/// One external quote provider.
///
/// `fetch_price` swallows every failure (transport, status, payload, rate
/// limit, timeout) into `None`. Implementations hold no state shared with
/// other sources.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Pure format check, evaluated before any network call.
    fn is_valid_symbol(&self, symbol: &str) -> bool {
        symbol::is_quote_symbol(symbol)
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal>;

    fn supports_range(&self) -> bool {
        false
    }

    /// Daily bars for `symbol` with dates in `[from, to]`.
    async fn fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbookError> {
        let _ = (symbol, from, to);
        Err(StockbookError::UnsupportedRange {
            source_name: self.name().to_string(),
        })
    }
}

/// Reject zero and negative quotes; a source reporting one has failed.
pub fn accept_quote(price: Decimal) -> Option<Decimal> {
    (price > Decimal::ZERO).then_some(price)
}
