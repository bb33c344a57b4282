//! Percentage profit/loss arithmetic.

use crate::{Error, Result};
use rust_decimal::Decimal;

/// Percentage P&L of `reference_price` relative to `entry_price`.
///
/// Returns `(reference - entry) / entry * 100`. Both prices must be strictly
/// positive, otherwise [`Error::InvalidPrice`] is returned for the first
/// offending input. A ratio too large for `Decimal` is [`Error::PnlOverflow`].
pub fn percent_pnl(entry_price: Decimal, reference_price: Decimal) -> Result<Decimal> {
    ensure_positive(entry_price)?;
    ensure_positive(reference_price)?;

    reference_price
        .checked_sub(entry_price)
        .and_then(|diff| diff.checked_div(entry_price))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or(Error::PnlOverflow {
            entry_price,
            reference_price,
        })
}

/// Reject zero and negative prices.
pub fn ensure_positive(price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(Error::InvalidPrice { price });
    }
    Ok(price)
}
