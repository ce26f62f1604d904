//! Alpha Vantage `GLOBAL_QUOTE` and `TIME_SERIES_DAILY` functions.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::http::get_json;
use crate::domain::error::StockbookError;
use crate::domain::ohlcv::{clip_to_range, OhlcvBar};
use crate::ports::price_source::{accept_quote, PriceSource};

const NAME: &str = "alphavantage";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Time Series (Daily)")]
    daily: Option<BTreeMap<String, DailyEntry>>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    #[serde(rename = "1. open")]
    open: Decimal,
    #[serde(rename = "2. high")]
    high: Decimal,
    #[serde(rename = "3. low")]
    low: Decimal,
    #[serde(rename = "4. close")]
    close: Decimal,
    #[serde(rename = "5. volume")]
    volume: String,
}

impl Envelope {
    /// Error, rate-limit and information notices all mean "no data".
    fn check(self) -> Result<Self, StockbookError> {
        if let Some(msg) = &self.error_message {
            return Err(StockbookError::provider(NAME, format!("API error: {msg}")));
        }
        if let Some(msg) = self.note.as_ref().or(self.information.as_ref()) {
            return Err(StockbookError::provider(NAME, format!("rate limited: {msg}")));
        }
        Ok(self)
    }
}

fn daily_bars(symbol: &str, series: BTreeMap<String, DailyEntry>) -> Vec<OhlcvBar> {
    series
        .into_iter()
        .filter_map(|(date, entry)| {
            let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
                warn!(symbol, date, "skipping row with unparsable date");
                return None;
            };
            Some(OhlcvBar {
                symbol: symbol.to_string(),
                date,
                open: entry.open,
                high: entry.high,
                low: entry.low,
                close: entry.close,
                volume: entry.volume.trim().parse().unwrap_or(0),
            })
        })
        .collect()
}

pub struct AlphaVantageSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageSource {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn call(&self, function: &str, symbol: &str) -> Result<Envelope, StockbookError> {
        let url = format!("{}/query", self.base_url);
        let envelope: Envelope = get_json(
            &self.client,
            NAME,
            &url,
            &[
                ("function", function),
                ("symbol", symbol),
                ("apikey", &self.api_key),
            ],
        )
        .await?;
        envelope.check()
    }

    pub async fn quote(&self, symbol: &str) -> Result<Decimal, StockbookError> {
        self.call("GLOBAL_QUOTE", symbol)
            .await?
            .global_quote
            .and_then(|q| q.price)
            .ok_or_else(|| StockbookError::provider(NAME, "no price in Global Quote"))
    }
}

#[async_trait]
impl PriceSource for AlphaVantageSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match self.quote(symbol).await {
            Ok(price) => accept_quote(price),
            Err(e) => {
                warn!(symbol, error = %e, "alphavantage quote unavailable");
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
        let series = self
            .call("TIME_SERIES_DAILY", symbol)
            .await?
            .daily
            .ok_or_else(|| StockbookError::provider(NAME, "no daily time series in response"))?;
        Ok(clip_to_range(daily_bars(symbol, series), from, to))
    }
}
