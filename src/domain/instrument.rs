//! Tradable instruments and their last known prices.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub type InstrumentId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketCategory {
    Nyse,
    Nasdaq,
    Lse,
    Tse,
    Other,
}

impl MarketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCategory::Nyse => "NYSE",
            MarketCategory::Nasdaq => "NASDAQ",
            MarketCategory::Lse => "LSE",
            MarketCategory::Tse => "TSE",
            MarketCategory::Other => "OTHER",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MarketCategory::Nyse => "New York Stock Exchange",
            MarketCategory::Nasdaq => "NASDAQ Stock Market",
            MarketCategory::Lse => "London Stock Exchange",
            MarketCategory::Tse => "Tokyo Stock Exchange",
            MarketCategory::Other => "Other Market",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NYSE" => Ok(MarketCategory::Nyse),
            "NASDAQ" => Ok(MarketCategory::Nasdaq),
            "LSE" => Ok(MarketCategory::Lse),
            "TSE" => Ok(MarketCategory::Tse),
            "OTHER" => Ok(MarketCategory::Other),
            other => Err(format!("unknown market category: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub symbol: String,
    pub name: String,
    pub current_price: Decimal,
    pub previous_price: Option<Decimal>,
    pub market: MarketCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    /// Shift the current price into `previous_price` and install `price`.
    pub fn reprice(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.previous_price = Some(self.current_price);
        self.current_price = price;
        self.updated_at = at;
    }
}

#[derive(Debug, Clone)]
pub struct NewInstrument {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub market: MarketCategory,
}
