//! BNPC weekly cap enforcement.
//!
//! Pure assessment of how much of an order's eligible base may be discounted
//! this week. Persistence of the advanced window happens in the settlement
//! transaction, never here.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;

use crate::domain::{round_currency, BnpcProfile, OrderSnapshot, WeeklyCapWindow};

/// Outcome of a cap assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct CapAssessment {
    /// Final BNPC discount for this order.
    pub discount: Decimal,
    /// Window with both counters advanced; `None` when nothing was consumed
    /// (unverified profile or no eligible purchase).
    pub window: Option<WeeklyCapWindow>,
    /// Portion of the eligible base counted against the purchase cap.
    pub purchase_delta: Decimal,
    /// Portion counted against the discount cap (equals `discount`).
    pub discount_delta: Decimal,
}

impl CapAssessment {
    fn none() -> Self {
        Self {
            discount: Decimal::ZERO,
            window: None,
            purchase_delta: Decimal::ZERO,
            discount_delta: Decimal::ZERO,
        }
    }
}

/// Assess the BNPC discount for `order` against the customer's weekly window.
///
/// Rolls the window forward when `now` has passed `week_start + 7d`. The
/// discountable base is bounded by the remaining purchase headroom, the raw
/// 5% discount by the remaining discount headroom. Purchase headroom is
/// consumed by the discountable base even when the discount cap leaves
/// nothing to pay out.
pub fn apply(
    profile: &BnpcProfile,
    order: &OrderSnapshot,
    window: Option<WeeklyCapWindow>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> CapAssessment {
    if !profile.verified {
        return CapAssessment::none();
    }

    let eligible_base = order.bnpc_eligible_subtotal();
    if eligible_base <= Decimal::ZERO {
        return CapAssessment::none();
    }

    let mut window = window
        .unwrap_or_else(|| WeeklyCapWindow::fresh(profile.customer_id, now, offset))
        .rolled_forward(now, offset);

    let purchase_headroom =
        (profile.weekly_purchase_cap - window.purchase_consumed).max(Decimal::ZERO);
    let discountable = eligible_base.min(purchase_headroom);

    let discount_headroom =
        (profile.weekly_discount_cap - window.discount_consumed).max(Decimal::ZERO);
    let discount = round_currency((discountable * profile.rate).min(discount_headroom));

    if discountable <= Decimal::ZERO {
        return CapAssessment {
            discount: Decimal::ZERO,
            window: None,
            purchase_delta: Decimal::ZERO,
            discount_delta: Decimal::ZERO,
        };
    }

    window.purchase_consumed += discountable;
    window.discount_consumed += discount;

    CapAssessment {
        discount,
        window: Some(window),
        purchase_delta: discountable,
        discount_delta: discount,
    }
}
