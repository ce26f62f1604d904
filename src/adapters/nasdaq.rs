//! Nasdaq quote API.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::warn;

use super::http::get_json;
use crate::domain::error::StockbookError;
use crate::domain::ohlcv::{clip_to_range, OhlcvBar};
use crate::ports::price_source::{accept_quote, PriceSource};

const NAME: &str = "nasdaq";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(rename = "Error")]
    error: Option<String>,
    status: Option<Status>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    b_code_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoData {
    primary_data: Option<PrimaryData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrimaryData {
    last_sale_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalData {
    trades_table: Option<TradesTable>,
}

#[derive(Debug, Deserialize)]
struct TradesTable {
    #[serde(default)]
    rows: Vec<TradeRow>,
}

#[derive(Debug, Deserialize)]
struct TradeRow {
    date: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, StockbookError> {
        if let Some(msg) = self.error {
            return Err(StockbookError::provider(NAME, format!("API error: {msg}")));
        }
        match self.data {
            Some(data) => Ok(data),
            None => {
                let detail = self
                    .status
                    .and_then(|s| s.b_code_message)
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "no data".to_string());
                Err(StockbookError::provider(NAME, detail))
            }
        }
    }
}

/// Parse a display price such as `$1,234.56`.
fn parse_money(raw: &str) -> Result<Decimal, StockbookError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    Decimal::from_str(&cleaned)
        .map_err(|e| StockbookError::provider(NAME, format!("invalid price '{raw}': {e}")))
}

fn parse_row(symbol: &str, row: &TradeRow) -> Result<OhlcvBar, StockbookError> {
    let date = NaiveDate::parse_from_str(row.date.trim(), "%m/%d/%Y")
        .map_err(|e| StockbookError::provider(NAME, format!("invalid date '{}': {e}", row.date)))?;
    let volume = row
        .volume
        .replace(',', "")
        .trim()
        .parse::<i64>()
        .unwrap_or(0);
    Ok(OhlcvBar {
        symbol: symbol.to_string(),
        date,
        open: parse_money(&row.open)?,
        high: parse_money(&row.high)?,
        low: parse_money(&row.low)?,
        close: parse_money(&row.close)?,
        volume,
    })
}

pub struct NasdaqSource {
    client: Client,
    base_url: String,
}

impl NasdaqSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `data.primaryData.lastSalePrice`.
    pub async fn quote(&self, symbol: &str) -> Result<Decimal, StockbookError> {
        let url = format!("{}/api/quote/{}/info", self.base_url, symbol);
        let envelope: Envelope<InfoData> =
            get_json(&self.client, NAME, &url, &[("assetclass", "stocks")]).await?;
        let raw = envelope
            .into_data()?
            .primary_data
            .and_then(|p| p.last_sale_price)
            .ok_or_else(|| StockbookError::provider(NAME, "no lastSalePrice in response"))?;
        parse_money(&raw)
    }
}

#[async_trait]
impl PriceSource for NasdaqSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match self.quote(symbol).await {
            Ok(price) => accept_quote(price),
            Err(e) => {
                warn!(symbol, error = %e, "nasdaq quote unavailable");
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
        let url = format!("{}/api/quote/{}/historical", self.base_url, symbol);
        let (from_s, to_s) = (from.to_string(), to.to_string());
        let envelope: Envelope<HistoricalData> = get_json(
            &self.client,
            NAME,
            &url,
            &[
                ("assetclass", "stocks"),
                ("fromdate", &from_s),
                ("todate", &to_s),
                ("limit", "9999"),
            ],
        )
        .await?;
        let rows = envelope
            .into_data()?
            .trades_table
            .map(|t| t.rows)
            .unwrap_or_default();
        let bars = rows
            .iter()
            .map(|row| parse_row(symbol, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(clip_to_range(bars, from, to))
    }
}
