//! Discount composition in the fixed stacking order.
//!
//! BNPC first (full eligible lines), promo second (original line totals,
//! independent base), loyalty last against what remains. The three components
//! are additive; bases may overlap. Loyalty is clamped first when the sum
//! would overshoot, and a sum that still overshoots with loyalty at zero is a
//! consistency fault, not something to clamp quietly.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;

use crate::caps::{self, CapAssessment};
use crate::domain::{
    BnpcDiscount, BnpcProfile, DiscountBreakdown, LoyaltyAccount, LoyaltyDiscount,
    LoyaltySettings, OrderSnapshot, Promo, PromoDiscount, WeeklyCapWindow,
};
use crate::error::SettlementError;
use crate::ledger::{self, Redemption};
use crate::promo_validator;

/// Everything the composer needs for one settlement, loaded by the caller.
pub struct ComposerInput<'a> {
    pub order: &'a OrderSnapshot,
    pub promo: Option<&'a Promo>,
    pub bnpc_profile: Option<&'a BnpcProfile>,
    pub cap_window: Option<WeeklyCapWindow>,
    pub settings: &'a LoyaltySettings,
    pub account: Option<&'a LoyaltyAccount>,
    pub now: DateTime<Utc>,
    pub week_offset: FixedOffset,
}

/// The composed breakdown plus the cap consumption to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub breakdown: DiscountBreakdown,
    pub caps: CapAssessment,
}

/// Compose one authoritative breakdown for the order.
pub fn compose(input: ComposerInput<'_>) -> Result<Composition, SettlementError> {
    let subtotal = input.order.subtotal();
    if subtotal < Decimal::ZERO {
        return Err(SettlementError::Consistency(format!(
            "negative order subtotal {subtotal}"
        )));
    }

    // 1. BNPC, off the full eligible lines.
    let caps = match input.bnpc_profile {
        Some(profile) => caps::apply(
            profile,
            input.order,
            input.cap_window,
            input.now,
            input.week_offset,
        ),
        None => CapAssessment {
            discount: Decimal::ZERO,
            window: None,
            purchase_delta: Decimal::ZERO,
            discount_delta: Decimal::ZERO,
        },
    };

    // 2. Promo, off the original line totals, independent of BNPC.
    let promo_discount = match input.promo {
        Some(promo) => PromoDiscount {
            code: Some(promo.code.clone()),
            amount: promo_validator::validate(promo, input.order, input.now)?,
        },
        None => PromoDiscount {
            code: None,
            amount: Decimal::ZERO,
        },
    };

    // 3. Loyalty, against what the first two left over.
    let remaining = subtotal - caps.discount - promo_discount.amount;
    if remaining < Decimal::ZERO {
        // Even with loyalty clamped to zero the order would go negative.
        return Err(SettlementError::Consistency(format!(
            "bnpc {} + promo {} exceed subtotal {}",
            caps.discount, promo_discount.amount, subtotal
        )));
    }

    let requested_points = input.order.points_to_redeem.unwrap_or(0);
    let redemption = if requested_points > 0 {
        let balance = input
            .account
            .map(|a| a.points_balance)
            .unwrap_or(Decimal::ZERO);
        ledger::redeem(input.settings, balance, requested_points, remaining)?
    } else {
        Redemption::zero()
    };

    let total = caps.discount + promo_discount.amount + redemption.amount;
    let final_amount_paid = subtotal - total;
    if final_amount_paid < Decimal::ZERO {
        return Err(SettlementError::Consistency(format!(
            "final amount {final_amount_paid} below zero after composition"
        )));
    }

    let points_earned = ledger::earn(input.settings, final_amount_paid);

    Ok(Composition {
        breakdown: DiscountBreakdown {
            bnpc_discount: BnpcDiscount {
                total: caps.discount,
            },
            promo_discount,
            loyalty_discount: LoyaltyDiscount {
                amount: redemption.amount,
                points_used: redemption.points_used,
                points_earned,
            },
            total,
            base_amount: subtotal,
            final_amount_paid,
        },
        caps,
    })
}
