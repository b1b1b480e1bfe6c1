//! Promo validation against an order snapshot.
//!
//! Pure: the caller loads the promo and supplies `now`. Exactly one promo may
//! be applied per order; exclusivity is enforced by the request shape
//! carrying a single optional code.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{round_currency, OrderSnapshot, Promo, PromoScope, PromoType};
use crate::error::ValidationError;

/// Validate `promo` against `order` and return the discount amount.
///
/// Checks, in order: active flag, date window, usage limit, minimum
/// purchase, then scope match. The returned amount never exceeds the
/// eligible base and is rounded to currency precision.
pub fn validate(
    promo: &Promo,
    order: &OrderSnapshot,
    now: DateTime<Utc>,
) -> Result<Decimal, ValidationError> {
    if !promo.active {
        return Err(ValidationError::PromoInactive);
    }
    if now < promo.start_date || now > promo.end_date {
        return Err(ValidationError::PromoExpired);
    }
    if promo.usage_exhausted() {
        return Err(ValidationError::UsageLimitReached);
    }

    let subtotal = order.subtotal();
    if let Some(min) = promo.min_purchase {
        if subtotal < min {
            return Err(ValidationError::MinPurchaseNotMet {
                required: min,
                subtotal,
            });
        }
    }

    let base = eligible_base(promo, order);
    if base <= Decimal::ZERO {
        return Err(ValidationError::NoEligibleItems);
    }

    let raw = match promo.promo_type {
        PromoType::Percentage => base * promo.value / Decimal::from(100),
        PromoType::Fixed => promo.value.min(base),
    };
    Ok(round_currency(raw))
}

/// The portion of the order the promo is allowed to act on.
fn eligible_base(promo: &Promo, order: &OrderSnapshot) -> Decimal {
    match promo.scope {
        PromoScope::Cart => order.subtotal(),
        PromoScope::Category => order
            .lines
            .iter()
            .filter(|l| promo.target_ids.contains(&l.category_id))
            .map(|l| l.line_total())
            .sum(),
        PromoScope::Product => order
            .lines
            .iter()
            .filter(|l| promo.target_ids.contains(&l.product_id))
            .map(|l| l.line_total())
            .sum(),
    }
}
