//! CSV file price source.
//!
//! Reads `<dir>/<SYMBOL>.csv` with a `date,open,high,low,close,volume`
//! header. The quote is the close of the latest row.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::domain::error::StockbookError;
use crate::domain::ohlcv::{clip_to_range, OhlcvBar};
use crate::ports::price_source::{accept_quote, PriceSource};

const NAME: &str = "csv";

pub struct CsvPriceSource {
    base_path: PathBuf,
}

fn parse_error(reason: String) -> StockbookError {
    StockbookError::provider(NAME, reason)
}

fn column<'r>(record: &'r csv::StringRecord, idx: usize, name: &str) -> Result<&'r str, StockbookError> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| parse_error(format!("missing {name} column")))
}

fn decimal_column(record: &csv::StringRecord, idx: usize, name: &str) -> Result<Decimal, StockbookError> {
    let raw = column(record, idx, name)?;
    Decimal::from_str(raw).map_err(|e| parse_error(format!("invalid {name} value '{raw}': {e}")))
}

impl CsvPriceSource {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }

    /// All bars in the symbol's file, sorted by date.
    pub async fn load_bars(&self, symbol: &str) -> Result<Vec<OhlcvBar>, StockbookError> {
        let path = self.csv_path(symbol);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| parse_error(format!("failed to read {}: {e}", path.display())))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| parse_error(format!("CSV parse error: {e}")))?;

            let date_str = column(&record, 0, "date")?;
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map_err(|e| parse_error(format!("invalid date format: {e}")))?;
            let volume_str = column(&record, 5, "volume")?;
            let volume: i64 = volume_str
                .parse()
                .map_err(|e| parse_error(format!("invalid volume value '{volume_str}': {e}")))?;

            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                date,
                open: decimal_column(&record, 1, "open")?,
                high: decimal_column(&record, 2, "high")?,
                low: decimal_column(&record, 3, "low")?,
                close: decimal_column(&record, 4, "close")?,
                volume,
            });
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match self.load_bars(symbol).await {
            Ok(bars) => bars.last().and_then(|b| accept_quote(b.close)),
            Err(e) => {
                warn!(symbol, error = %e, "csv quote unavailable");
                None
            }
        }
    }

    fn supports_range(&self) -> bool {
        true
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, StockbookError> {
        Ok(clip_to_range(self.load_bars(symbol).await?, from, to))
    }
}
