//! Domain types for orders, promos, BNPC eligibility, and loyalty.

pub mod bnpc;
pub mod breakdown;
pub mod loyalty;
pub mod order;
pub mod promo;

pub use bnpc::{week_start, BnpcProfile, WeeklyCapWindow};
pub use breakdown::{
    BnpcDiscount, DiscountBreakdown, LoyaltyDiscount, OrderState, PromoDiscount, SettlementRecord,
};
pub use loyalty::{LoyaltyAccount, LoyaltySettings};
pub use order::{LineItem, OrderSnapshot};
pub use promo::{Promo, PromoScope, PromoType};

/// Round a currency amount to 2 decimal places, half away from zero.
///
/// All stored currency values go through this; intermediate arithmetic stays
/// at full precision.
pub fn round_currency(amount: rust_decimal::Decimal) -> rust_decimal::Decimal {
    amount.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}
