//! Loyalty point redemption and earning math.
//!
//! Pure; balances live in the store and move only inside the settlement
//! transaction.

use rust_decimal::Decimal;

use crate::domain::{round_currency, LoyaltySettings};
use crate::error::ValidationError;

/// A granted redemption: currency value and the whole points consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub amount: Decimal,
    pub points_used: Decimal,
}

impl Redemption {
    pub fn zero() -> Self {
        Self {
            amount: Decimal::ZERO,
            points_used: Decimal::ZERO,
        }
    }
}

/// Convert a requested number of points into a currency discount.
///
/// The redeemable value is capped at `max_redeem_percent` of the subtotal
/// remaining after the BNPC and promo discounts; the point count is floored
/// so only whole points convert.
pub fn redeem(
    settings: &LoyaltySettings,
    balance: Decimal,
    requested_points: u64,
    subtotal_after_other: Decimal,
) -> Result<Redemption, ValidationError> {
    if !settings.enabled {
        return Err(ValidationError::ProgramDisabled);
    }
    if settings.points_to_currency_rate <= Decimal::ZERO {
        return Err(ValidationError::InvalidAmount(
            "pointsToCurrencyRate must be positive".into(),
        ));
    }
    if requested_points == 0 {
        return Ok(Redemption::zero());
    }

    let requested = Decimal::from(requested_points);
    if requested > balance {
        return Err(ValidationError::InsufficientPoints {
            available: balance,
            requested: requested_points,
        });
    }

    let max_currency =
        (subtotal_after_other * settings.max_redeem_percent / Decimal::from(100))
            .min(subtotal_after_other);
    let max_points = (max_currency / settings.points_to_currency_rate).floor();

    let points_used = requested.min(max_points).max(Decimal::ZERO);
    let amount = round_currency(points_used * settings.points_to_currency_rate);

    Ok(Redemption { amount, points_used })
}

/// Points earned on the amount actually paid, never on the pre-discount
/// subtotal. May be fractional.
pub fn earn(settings: &LoyaltySettings, final_amount_paid: Decimal) -> Decimal {
    if !settings.enabled || final_amount_paid <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_currency(final_amount_paid * settings.earn_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> LoyaltySettings {
        LoyaltySettings {
            points_to_currency_rate: dec!(1),
            max_redeem_percent: dec!(20),
            earn_rate: dec!(0.1),
            enabled: true,
        }
    }

    #[test]
    fn test_redeem_capped_by_percent() {
        // 500 requested against a 1000 base: 20% caps the value at 200.
        let redemption = redeem(&settings(), dec!(500), 500, dec!(1000)).unwrap();
        assert_eq!(redemption.points_used, dec!(200));
        assert_eq!(redemption.amount, dec!(200.00));
    }

    #[test]
    fn test_redeem_below_cap_uses_request() {
        let redemption = redeem(&settings(), dec!(500), 50, dec!(1000)).unwrap();
        assert_eq!(redemption.points_used, dec!(50));
        assert_eq!(redemption.amount, dec!(50.00));
    }

    #[test]
    fn test_insufficient_points() {
        let err = redeem(&settings(), dec!(10), 50, dec!(1000)).unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientPoints { .. }));
    }

    #[test]
    fn test_program_disabled() {
        let mut s = settings();
        s.enabled = false;
        assert_eq!(
            redeem(&s, dec!(500), 50, dec!(1000)).unwrap_err(),
            ValidationError::ProgramDisabled
        );
    }

    #[test]
    fn test_fractional_rate_floors_points() {
        // Rate 0.3: 20% of 10 = 2.00 currency, 6.66 points floor to 6.
        let mut s = settings();
        s.points_to_currency_rate = dec!(0.3);
        let redemption = redeem(&s, dec!(100), 100, dec!(10)).unwrap();
        assert_eq!(redemption.points_used, dec!(6));
        assert_eq!(redemption.amount, dec!(1.80));
    }

    #[test]
    fn test_zero_request_is_zero() {
        assert_eq!(redeem(&settings(), dec!(0), 0, dec!(1000)).unwrap(), Redemption::zero());
    }

    #[test]
    fn test_earn_on_paid_amount() {
        assert_eq!(earn(&settings(), dec!(575.00)), dec!(57.50));
        assert_eq!(earn(&settings(), dec!(0)), dec!(0));
    }

    #[test]
    fn test_earn_disabled_program() {
        let mut s = settings();
        s.enabled = false;
        assert_eq!(earn(&s, dec!(1000)), dec!(0));
    }
}
