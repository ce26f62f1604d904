//! Stored price history: intraday ticks and authoritative daily bars.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

use super::instrument::InstrumentId;
use super::ohlcv::OhlcvBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleKind {
    /// One row per successful scheduler refresh.
    Intraday,
    /// At most one row per (instrument, date).
    Daily,
}

impl SampleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Intraday => "intraday",
            SampleKind::Daily => "daily",
        }
    }
}

impl FromStr for SampleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intraday" => Ok(SampleKind::Intraday),
            "daily" => Ok(SampleKind::Daily),
            other => Err(format!("unknown sample kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSample {
    pub id: i64,
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
    pub sample_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub kind: SampleKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceSample {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
    pub sample_date: NaiveDate,
    pub kind: SampleKind,
}

impl NewPriceSample {
    pub fn intraday(instrument_id: InstrumentId, price: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            instrument_id,
            price,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            sample_date: at.date_naive(),
            kind: SampleKind::Intraday,
        }
    }

    pub fn daily(instrument_id: InstrumentId, bar: &OhlcvBar) -> Self {
        Self {
            instrument_id,
            price: bar.close,
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: Some(bar.close),
            volume: Some(bar.volume),
            sample_date: bar.date,
            kind: SampleKind::Daily,
        }
    }
}
