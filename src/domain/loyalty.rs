//! Loyalty account and tenant-wide program settings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer's point balance. Fractional points accumulate; redemption
/// requests are always whole numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct LoyaltyAccount {
    pub customer_id: Uuid,
    pub points_balance: Decimal,
}

impl LoyaltyAccount {
    pub fn empty(customer_id: Uuid) -> Self {
        Self {
            customer_id,
            points_balance: Decimal::ZERO,
        }
    }
}

/// Tenant-wide loyalty program settings, administered at runtime and
/// hot-reloaded by the settings poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltySettings {
    /// Currency value of one point.
    pub points_to_currency_rate: Decimal,
    /// Ceiling on the redeemed value, as a percent of the order subtotal
    /// after the other discounts.
    pub max_redeem_percent: Decimal,
    /// Points earned per unit of currency actually paid.
    pub earn_rate: Decimal,
    pub enabled: bool,
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        Self {
            points_to_currency_rate: Decimal::ONE,
            max_redeem_percent: Decimal::from(20),
            earn_rate: Decimal::new(1, 1),
            enabled: true,
        }
    }
}
