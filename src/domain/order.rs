//! Order snapshot handed to the engine at checkout.
//!
//! Immutable once constructed; the subtotal is always computed from the
//! lines, so the sum invariant holds by construction.

use rust_decimal::Decimal;
use uuid::Uuid;

/// One cart line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: u32,
    /// Whether the BNPC (senior/PWD) discount may act on this line.
    pub bnpc_eligible: bool,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A customer's cart at checkout, plus the discounts they asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub lines: Vec<LineItem>,
    pub promo_code: Option<String>,
    pub points_to_redeem: Option<u64>,
}

impl OrderSnapshot {
    /// Sum of all line totals.
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(LineItem::line_total).sum()
    }

    /// Sum of line totals where the BNPC discount applies.
    pub fn bnpc_eligible_subtotal(&self) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.bnpc_eligible)
            .map(LineItem::line_total)
            .sum()
    }
}
