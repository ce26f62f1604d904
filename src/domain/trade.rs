//! Append-only trade log and activity trail records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::account::AccountId;
use super::instrument::InstrumentId;

pub type TradeId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: TradeId,
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub account_id: AccountId,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

/// Activity trail line for a trade, e.g.
/// `Bought 2.0000 shares of AAPL at $150.00 per share (Total: $300.00)`.
pub fn describe(side: Side, quantity: Decimal, symbol: &str, price: Decimal, total: Decimal) -> String {
    let verb = match side {
        Side::Buy => "Bought",
        Side::Sell => "Sold",
    };
    format!(
        "{verb} {quantity:.4} shares of {symbol} at ${price:.2} per share (Total: ${total:.2})"
    )
}
