//! Wire contract of the settlement entry point.
//!
//! Field names are the ones the checkout UI and the admin order table
//! already consume; they must not drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{LineItem, OrderSnapshot};
use crate::error::ValidationError;

/// One cart line as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLine {
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub bnpc_eligible: bool,
}

/// Settlement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub lines: Vec<RequestLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_to_redeem: Option<u64>,
}

impl SettleRequest {
    /// Validate amounts and freeze the request into an order snapshot.
    pub fn into_order(self) -> Result<OrderSnapshot, ValidationError> {
        let mut lines = Vec::with_capacity(self.lines.len());
        for line in self.lines {
            if line.unit_price < Decimal::ZERO {
                return Err(ValidationError::InvalidAmount(format!(
                    "negative unit price for product {}",
                    line.product_id
                )));
            }
            if line.quantity == 0 {
                return Err(ValidationError::InvalidAmount(format!(
                    "zero quantity for product {}",
                    line.product_id
                )));
            }
            lines.push(LineItem {
                product_id: line.product_id,
                category_id: line.category_id,
                unit_price: line.unit_price,
                quantity: line.quantity,
                bnpc_eligible: line.bnpc_eligible,
            });
        }
        Ok(OrderSnapshot {
            order_id: self.order_id,
            customer_id: self.customer_id,
            lines,
            promo_code: self.promo_code.filter(|c| !c.trim().is_empty()),
            points_to_redeem: self.points_to_redeem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> SettleRequest {
        SettleRequest {
            customer_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            lines: vec![RequestLine {
                product_id: Uuid::new_v4(),
                category_id: Uuid::new_v4(),
                unit_price: dec!(10.00),
                quantity: 2,
                bnpc_eligible: true,
            }],
            promo_code: Some("SUMMER24".to_string()),
            points_to_redeem: Some(50),
        }
    }

    #[test]
    fn test_request_field_names() {
        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("customerId").is_some());
        assert!(json.get("orderId").is_some());
        assert!(json.get("promoCode").is_some());
        assert!(json.get("pointsToRedeem").is_some());
        let line = &json["lines"][0];
        assert!(line.get("productId").is_some());
        assert!(line.get("categoryId").is_some());
        assert!(line.get("unitPrice").is_some());
        assert!(line.get("bnpcEligible").is_some());
    }

    #[test]
    fn test_rejects_negative_price() {
        let mut req = request();
        req.lines[0].unit_price = dec!(-1);
        assert!(matches!(
            req.into_order(),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_rejects_zero_quantity() {
        let mut req = request();
        req.lines[0].quantity = 0;
        assert!(matches!(
            req.into_order(),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_blank_promo_code_treated_as_none() {
        let mut req = request();
        req.promo_code = Some("  ".to_string());
        let order = req.into_order().unwrap();
        assert_eq!(order.promo_code, None);
    }
}
