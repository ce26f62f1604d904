//! Fixed-point rounding rules for cash, prices and share quantities.
//!
//! Cash and prices carry 2 fractional digits, quantities and average cost
//! carry 4. Rounding is HALF_UP except for share quantisation, which
//! truncates so a purchase never costs more than was asked for.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::error::StockbookError;

pub const CASH_SCALE: u32 = 2;
pub const QUANTITY_SCALE: u32 = 4;

/// Smallest tradable share fraction (10^-4).
pub const MIN_FRACTION: Decimal = dec!(0.0001);

/// Rounds a cash amount or price HALF_UP to 2 decimals.
pub fn round_cash(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CASH_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a quantity or average cost HALF_UP to 4 decimals.
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Truncates a quantity DOWN to 4 decimals.
/// Example: 2.99999 -> 2.9999
pub fn truncate_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero)
}

/// True when `quantity` has no digits past the quantity scale.
pub fn is_whole_fraction(quantity: Decimal) -> bool {
    truncate_quantity(quantity) == quantity
}

/// Unwraps a checked arithmetic result, reporting overflow as an invalid
/// amount.
pub fn in_range(value: Option<Decimal>, what: &str) -> Result<Decimal, StockbookError> {
    value.ok_or_else(|| StockbookError::InvalidAmount {
        reason: format!("{what} is out of range"),
    })
}

/// Shares purchasable with `investment` at `unit_price`, truncated to the
/// quantity scale. `unit_price` must be positive.
pub fn shares_for(investment: Decimal, unit_price: Decimal) -> Result<Decimal, StockbookError> {
    let shares = in_range(investment.checked_div(unit_price), "share count")?;
    Ok(truncate_quantity(shares))
}

/// Percentage change from `previous` to `current`, HALF_UP at 4 decimals
/// before scaling by 100. Zero when `previous` is not positive.
pub fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_quantity((current - previous) / previous) * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_cash_half_up() {
        assert_eq!(round_cash(dec!(1.005)), dec!(1.01));
        assert_eq!(round_cash(dec!(1.004)), dec!(1.00));
        assert_eq!(round_cash(dec!(-1.005)), dec!(-1.01));
    }

    #[test]
    fn truncate_never_rounds_up() {
        assert_eq!(truncate_quantity(dec!(2.99999)), dec!(2.9999));
        assert_eq!(truncate_quantity(dec!(0.00009)), dec!(0.0000));
    }

    #[test]
    fn shares_for_exact_division() {
        assert_eq!(shares_for(dec!(300.00), dec!(150.00)).unwrap(), dec!(2));
    }

    #[test]
    fn shares_for_repeating_division() {
        // 100 / 3 = 33.3333...
        let shares = shares_for(dec!(100.00), dec!(3.00)).unwrap();
        assert_eq!(shares, dec!(33.3333));
        assert!(shares * dec!(3.00) <= dec!(100.00));
    }

    #[test]
    fn shares_for_overflow_is_invalid_amount() {
        let err = shares_for(Decimal::MAX, dec!(0.01)).unwrap_err();
        assert!(matches!(err, StockbookError::InvalidAmount { .. }));
    }

    #[test]
    fn whole_fraction_allows_four_places() {
        assert!(is_whole_fraction(dec!(1.0001)));
        assert!(is_whole_fraction(dec!(3)));
        assert!(!is_whole_fraction(dec!(1.00005)));
        assert!(!is_whole_fraction(dec!(0.00019)));
    }

    #[test]
    fn percent_change_rounds_ratio_first() {
        // (160 - 150) / 150 = 0.066666.. -> 0.0667 -> 6.67%
        assert_eq!(percent_change(dec!(150.00), dec!(160.00)), dec!(6.67));
    }

    #[test]
    fn percent_change_without_previous_is_zero() {
        assert_eq!(percent_change(Decimal::ZERO, dec!(10.00)), Decimal::ZERO);
    }
}
