//! Position ledger: applies buy/sell deltas inside a caller's atomic unit.

use rust_decimal::Decimal;

use super::account::AccountId;
use super::error::StockbookError;
use super::instrument::InstrumentId;
use super::position::{NewPosition, Position};
use crate::ports::store::{RecordTx, StoreResult};

/// Result of applying a sell to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SellEffect {
    /// Shares remain; the updated position.
    Reduced(Position),
    /// Quantity reached exactly zero and the position was deleted.
    Closed { average_cost: Decimal },
}

/// Add `quantity` bought at `unit_price`, creating the position if the
/// account holds none of the instrument.
pub fn apply_buy(
    tx: &mut dyn RecordTx,
    account_id: AccountId,
    instrument_id: InstrumentId,
    quantity: Decimal,
    unit_price: Decimal,
) -> StoreResult<Position> {
    match tx.position_for(account_id, instrument_id)? {
        Some(mut position) => {
            position.absorb_buy(quantity, unit_price)?;
            tx.update_position(&position)?;
            Ok(position)
        }
        None => tx.insert_position(NewPosition {
            account_id,
            instrument_id,
            quantity,
            average_cost: unit_price,
        }),
    }
}

/// Remove `quantity` shares. Fails with `InsufficientShares` when the
/// account holds fewer (or none).
pub fn apply_sell(
    tx: &mut dyn RecordTx,
    account_id: AccountId,
    instrument_id: InstrumentId,
    quantity: Decimal,
) -> StoreResult<SellEffect> {
    let Some(mut position) = tx.position_for(account_id, instrument_id)? else {
        return Err(StockbookError::InsufficientShares {
            owned: Decimal::ZERO,
            requested: quantity,
        });
    };

    if quantity > position.quantity {
        return Err(StockbookError::InsufficientShares {
            owned: position.quantity,
            requested: quantity,
        });
    }

    if position.release(quantity).is_zero() {
        tx.delete_position(position.id)?;
        Ok(SellEffect::Closed {
            average_cost: position.average_cost,
        })
    } else {
        tx.update_position(&position)?;
        Ok(SellEffect::Reduced(position))
    }
}
