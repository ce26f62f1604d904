//! Holdings and weighted-average cost arithmetic.

use rust_decimal::Decimal;
use serde::Serialize;

use super::account::AccountId;
use super::error::StockbookError;
use super::instrument::InstrumentId;
use super::money::{in_range, round_cash, round_quantity};

pub type PositionId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub book_value: Decimal,
}

impl Position {
    pub fn market_value(&self, price: Decimal) -> Decimal {
        round_cash(self.quantity * price)
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.market_value(price) - self.book_value
    }

    /// Fold a purchase into the holding.
    ///
    /// The new average is taken from the pre-purchase quantity:
    /// `(q0*a0 + q*p) / (q0 + q)`, HALF_UP at 4 decimals.
    pub fn absorb_buy(&mut self, quantity: Decimal, unit_price: Decimal) -> Result<(), StockbookError> {
        let held_cost = in_range(self.quantity.checked_mul(self.average_cost), "position cost")?;
        let added_cost = in_range(quantity.checked_mul(unit_price), "purchase cost")?;
        let total_cost = in_range(held_cost.checked_add(added_cost), "position cost")?;
        let new_quantity = in_range(self.quantity.checked_add(quantity), "position quantity")?;
        let new_average = round_quantity(in_range(
            total_cost.checked_div(new_quantity),
            "average cost",
        )?);

        self.quantity = new_quantity;
        self.average_cost = new_average;
        self.book_value = book_value(new_quantity, new_average);
        Ok(())
    }

    /// Remove sold shares; average cost is untouched. Returns the
    /// remaining quantity. Caller guarantees `quantity <= self.quantity`.
    pub fn release(&mut self, quantity: Decimal) -> Decimal {
        self.quantity -= quantity;
        self.book_value = book_value(self.quantity, self.average_cost);
        self.quantity
    }
}

pub fn book_value(quantity: Decimal, average_cost: Decimal) -> Decimal {
    round_cash(quantity * average_cost)
}

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub account_id: AccountId,
    pub instrument_id: InstrumentId,
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

impl NewPosition {
    pub fn book_value(&self) -> Decimal {
        book_value(self.quantity, self.average_cost)
    }
}
