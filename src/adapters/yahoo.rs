//! Yahoo Finance chart endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use super::http::get_json;
use crate::domain::error::StockbookError;
use crate::domain::money::round_cash;
use crate::domain::ohlcv::{clip_to_range, OhlcvBar};
use crate::ports::price_source::{accept_quote, PriceSource};

const NAME: &str = "yahoo";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<Decimal>>,
    #[serde(default)]
    high: Vec<Option<Decimal>>,
    #[serde(default)]
    low: Vec<Option<Decimal>>,
    #[serde(default)]
    close: Vec<Option<Decimal>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

impl ChartResponse {
    fn into_result(self) -> Result<ChartResult, StockbookError> {
        if let Some(err) = self.chart.error {
            return Err(StockbookError::provider(
                NAME,
                format!(
                    "{}: {}",
                    err.code.unwrap_or_default(),
                    err.description.unwrap_or_default()
                ),
            ));
        }
        self.chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| StockbookError::provider(NAME, "empty chart result"))
    }
}

fn at<T: Copy>(series: &[Option<T>], i: usize) -> Option<T> {
    series.get(i).copied().flatten()
}

impl ChartResult {
    fn bars(self, symbol: &str) -> Vec<OhlcvBar> {
        let quote = self
            .indicators
            .and_then(|i| i.quote.into_iter().next())
            .unwrap_or_default();
        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                // Rows with gaps (holidays, halted sessions) are dropped.
                Some(OhlcvBar {
                    symbol: symbol.to_string(),
                    date: DateTime::from_timestamp(*ts, 0)?.date_naive(),
                    open: round_cash(at(&quote.open, i)?),
                    high: round_cash(at(&quote.high, i)?),
                    low: round_cash(at(&quote.low, i)?),
                    close: round_cash(at(&quote.close, i)?),
                    volume: at(&quote.volume, i).unwrap_or(0),
                })
            })
            .collect()
    }
}

pub struct YahooSource {
    client: Client,
    base_url: String,
}

impl YahooSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!("{}/v8/finance/chart/{}", self.base_url, symbol)
    }

    /// `meta.regularMarketPrice`, HALF_UP to 2 decimals.
    pub async fn quote(&self, symbol: &str) -> Result<Decimal, StockbookError> {
        let response: ChartResponse =
            get_json(&self.client, NAME, &self.chart_url(symbol), &[]).await?;
        response
            .into_result()?
            .meta
            .regular_market_price
            .map(round_cash)
            .ok_or_else(|| StockbookError::provider(NAME, "no regularMarketPrice in response"))
    }
}

#[async_trait]
impl PriceSource for YahooSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match self.quote(symbol).await {
            Ok(price) => accept_quote(price),
            Err(e) => {
                warn!(symbol, error = %e, "yahoo quote unavailable");
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
        let period1 = from.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end = to.checked_add_days(Days::new(1)).unwrap_or(to);
        let period2 = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let (p1, p2) = (period1.to_string(), period2.to_string());

        let response: ChartResponse = get_json(
            &self.client,
            NAME,
            &self.chart_url(symbol),
            &[("period1", &p1), ("period2", &p2), ("interval", "1d")],
        )
        .await?;
        Ok(clip_to_range(response.into_result()?.bars(symbol), from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const QUOTE_BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "regularMarketPrice": 189.845},
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {"quote": [{
                    "open":   [187.15, null, 182.15],
                    "high":   [188.44, 185.88, 183.08],
                    "low":    [183.89, 183.43, 180.88],
                    "close":  [185.64, 184.25, 181.91],
                    "volume": [82488700, 58414500, null]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn quote_is_rounded_half_up() {
        let resp: ChartResponse = serde_json::from_str(QUOTE_BODY).unwrap();
        let price = resp.into_result().unwrap().meta.regular_market_price.map(round_cash);
        assert_eq!(price, Some(dec!(189.85)));
    }

    #[test]
    fn bars_skip_rows_with_gaps() {
        let resp: ChartResponse = serde_json::from_str(QUOTE_BODY).unwrap();
        let bars = resp.into_result().unwrap().bars("AAPL");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].close, dec!(185.64));
        assert_eq!(bars[1].volume, 0);
    }

    #[test]
    fn chart_error_is_provider_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(err.to_string().contains("symbol may be delisted"));
    }
}
