//! Profit and loss of a leveraged position.

use rust_decimal::Decimal;
use vigil_domain::{Leverage, Pnl, Price, Quantity, Side};

use crate::error::EngineError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Compute leveraged PnL for a position
///
/// - LONG:  `percent = (current - entry) / entry * 100 * leverage`
/// - SHORT: same with the sign inverted
/// - `usd = quantity * percent / 100`
///
/// `quantity` is the USD amount the percentage applies to. When callers store a
/// notional that already includes leverage, leverage is counted twice; the
/// formula is kept as is until the product decision is made.
///
/// Fails with [`EngineError::PnlOverflow`] when a price is so far from entry
/// that the result does not fit a `Decimal`.
pub fn compute_pnl(
    side: Side,
    entry_price: Price,
    current_price: Price,
    quantity: Quantity,
    leverage: Leverage,
) -> Result<Pnl, EngineError> {
    let entry = entry_price.as_decimal();
    let current = current_price.as_decimal();
    let overflow = || EngineError::PnlOverflow {
        entry: entry.to_string(),
        price: current.to_string(),
    };

    let percent = current
        .checked_sub(entry)
        .and_then(|delta| delta.checked_div(entry))
        .and_then(|ratio| ratio.checked_mul(HUNDRED))
        .and_then(|p| p.checked_mul(leverage.as_decimal()))
        .and_then(|p| p.checked_mul(side.sign()))
        .ok_or_else(overflow)?;
    let usd = quantity
        .as_decimal()
        .checked_mul(percent)
        .and_then(|u| u.checked_div(HUNDRED))
        .ok_or_else(overflow)?;

    Ok(Pnl {
        usd: usd.normalize(),
        percent: percent.normalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(v: Decimal) -> Price {
        Price::new(v).unwrap()
    }

    fn calc(side: Side, entry: Decimal, current: Decimal, qty: Decimal, lev: u32) -> Pnl {
        compute_pnl(
            side,
            price(entry),
            price(current),
            Quantity::new(qty).unwrap(),
            Leverage::new(lev).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_long_profit() {
        let pnl = calc(Side::Long, dec!(100), dec!(110), dec!(1000), 5);
        assert_eq!(pnl.percent, dec!(50));
        assert_eq!(pnl.usd, dec!(500));
    }

    #[test]
    fn test_short_mirrors_long() {
        let pnl = calc(Side::Short, dec!(100), dec!(90), dec!(1000), 5);
        assert_eq!(pnl.percent, dec!(50));
        assert_eq!(pnl.usd, dec!(500));
    }

    #[test]
    fn test_losses_are_negative() {
        let long = calc(Side::Long, dec!(100), dec!(98), dec!(1000), 5);
        assert_eq!(long.percent, dec!(-10));
        assert_eq!(long.usd, dec!(-100));

        let short = calc(Side::Short, dec!(100), dec!(102), dec!(1000), 5);
        assert_eq!(short.percent, dec!(-10));
        assert!(!short.is_profit());
    }

    #[test]
    fn test_flat_price_is_zero() {
        let pnl = calc(Side::Long, dec!(60000), dec!(60000), dec!(250), 10);
        assert_eq!(pnl.percent, Decimal::ZERO);
        assert_eq!(pnl.usd, Decimal::ZERO);
    }

    #[test]
    fn test_unleveraged_fractional_move() {
        // 60000 → 66000 is +10%
        let pnl = calc(Side::Long, dec!(60000), dec!(66000), dec!(200), 1);
        assert_eq!(pnl.percent, dec!(10));
        assert_eq!(pnl.usd, dec!(20));
    }

    #[test]
    fn test_extreme_price_overflows_instead_of_panicking() {
        let result = compute_pnl(
            Side::Long,
            price(dec!(60000)),
            price(dec!(70000000000000000000000000000)),
            Quantity::new(dec!(1000)).unwrap(),
            Leverage::new(5).unwrap(),
        );
        assert!(matches!(result, Err(EngineError::PnlOverflow { .. })));
    }
}
