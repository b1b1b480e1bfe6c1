//! The authoritative discount breakdown and the persisted settlement record.
//!
//! The breakdown is always fully populated, so downstream consumers never
//! need fallback arithmetic over optional fields. Serialized field names
//! match the admin order table contract exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// BNPC component of a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BnpcDiscount {
    pub total: Decimal,
}

/// Promo component. `code` is `None` when no promo was applied; `amount` is
/// then zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoDiscount {
    pub code: Option<String>,
    pub amount: Decimal,
}

/// Loyalty component: redeemed value plus the points movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyDiscount {
    pub amount: Decimal,
    pub points_used: Decimal,
    pub points_earned: Decimal,
}

/// One settlement's discounts, summed additively.
///
/// Invariants: `total` equals the sum of the three components, and
/// `final_amount_paid = base_amount - total >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountBreakdown {
    pub bnpc_discount: BnpcDiscount,
    pub promo_discount: PromoDiscount,
    pub loyalty_discount: LoyaltyDiscount,
    pub total: Decimal,
    pub base_amount: Decimal,
    pub final_amount_paid: Decimal,
}

/// Terminal states of a settled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Confirmed,
    Refunded,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Confirmed => "confirmed",
            OrderState::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(OrderState::Confirmed),
            "refunded" => Some(OrderState::Refunded),
            _ => None,
        }
    }
}

/// The persisted record of a settlement.
///
/// Carries the exact consumption deltas so a refund can compensate the cap
/// window, the promo usage slot, and the point movement precisely.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRecord {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub state: OrderState,
    pub breakdown: DiscountBreakdown,
    pub promo_id: Option<Uuid>,
    pub purchase_consumed_delta: Decimal,
    pub discount_consumed_delta: Decimal,
    pub points_used: Decimal,
    pub points_earned: Decimal,
    pub settled_at: DateTime<Utc>,
}
