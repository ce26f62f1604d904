//! Change notification emitted after a committed price refresh.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::instrument::Instrument;
use super::money::percent_change;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChangeEvent {
    pub symbol: String,
    pub name: String,
    pub new_price: Decimal,
    pub previous_price: Option<Decimal>,
    pub delta: Decimal,
    pub delta_percent: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceChangeEvent {
    /// Build from an instrument that has just been repriced.
    pub fn from_instrument(instrument: &Instrument, timestamp: DateTime<Utc>) -> Self {
        let new_price = instrument.current_price;
        let (delta, delta_percent) = match instrument.previous_price {
            Some(prev) if prev > Decimal::ZERO => {
                (new_price - prev, percent_change(prev, new_price))
            }
            _ => (Decimal::ZERO, Decimal::ZERO),
        };
        Self {
            symbol: instrument.symbol.clone(),
            name: instrument.name.clone(),
            new_price,
            previous_price: instrument.previous_price,
            delta,
            delta_percent,
            timestamp,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.delta.is_zero()
    }
}
