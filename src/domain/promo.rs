//! Promo records and their shape invariants.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ValidationError;

/// How the promo value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoType {
    /// `value` is a percentage of the eligible base, in (0, 100].
    Percentage,
    /// `value` is a currency amount, capped at the eligible base.
    Fixed,
}

impl PromoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoType::Percentage => "percentage",
            PromoType::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(PromoType::Percentage),
            "fixed" => Some(PromoType::Fixed),
            _ => None,
        }
    }
}

/// The subset of a cart the promo acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoScope {
    Cart,
    Category,
    Product,
}

impl PromoScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoScope::Cart => "cart",
            PromoScope::Category => "category",
            PromoScope::Product => "product",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cart" => Some(PromoScope::Cart),
            "category" => Some(PromoScope::Category),
            "product" => Some(PromoScope::Product),
            _ => None,
        }
    }
}

/// An administered promo code.
#[derive(Debug, Clone, PartialEq)]
pub struct Promo {
    pub id: Uuid,
    pub code: String,
    pub promo_type: PromoType,
    pub value: Decimal,
    pub scope: PromoScope,
    /// Category or product ids the promo targets. Empty for `Cart` scope.
    pub target_ids: Vec<Uuid>,
    pub min_purchase: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// `None` or `Some(0)` means unlimited use.
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub active: bool,
}

impl Promo {
    /// Whether the usage limit (if any) has been consumed.
    pub fn usage_exhausted(&self) -> bool {
        match self.usage_limit {
            Some(limit) if limit > 0 => self.used_count >= limit,
            _ => false,
        }
    }

    /// Enforce the shape invariants at admin create/update time.
    ///
    /// `Cart` scope must carry no targets, `Category`/`Product` must carry at
    /// least one; percentage values lie in (0, 100], fixed values are positive.
    pub fn validate_shape(&self) -> Result<(), ValidationError> {
        if self.code.trim().is_empty() {
            return Err(ValidationError::InvalidPromo("code must not be empty".into()));
        }
        match self.scope {
            PromoScope::Cart if !self.target_ids.is_empty() => {
                return Err(ValidationError::InvalidPromo(
                    "cart-scoped promo must not carry target ids".into(),
                ));
            }
            PromoScope::Category | PromoScope::Product if self.target_ids.is_empty() => {
                return Err(ValidationError::InvalidPromo(
                    "category/product-scoped promo requires target ids".into(),
                ));
            }
            _ => {}
        }
        match self.promo_type {
            PromoType::Percentage => {
                if self.value <= Decimal::ZERO || self.value > Decimal::from(100) {
                    return Err(ValidationError::InvalidPromo(
                        "percentage value must be in (0, 100]".into(),
                    ));
                }
            }
            PromoType::Fixed => {
                if self.value <= Decimal::ZERO {
                    return Err(ValidationError::InvalidPromo(
                        "fixed value must be positive".into(),
                    ));
                }
            }
        }
        if self.end_date < self.start_date {
            return Err(ValidationError::InvalidPromo(
                "end date precedes start date".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base_promo() -> Promo {
        Promo {
            id: Uuid::new_v4(),
            code: "SUMMER24".to_string(),
            promo_type: PromoType::Percentage,
            value: dec!(10),
            scope: PromoScope::Cart,
            target_ids: vec![],
            min_purchase: None,
            start_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 8, 31, 23, 59, 59).unwrap(),
            usage_limit: None,
            used_count: 0,
            active: true,
        }
    }

    #[test]
    fn test_valid_shape() {
        assert!(base_promo().validate_shape().is_ok());
    }

    #[test]
    fn test_cart_scope_rejects_targets() {
        let mut p = base_promo();
        p.target_ids = vec![Uuid::new_v4()];
        assert!(p.validate_shape().is_err());
    }

    #[test]
    fn test_category_scope_requires_targets() {
        let mut p = base_promo();
        p.scope = PromoScope::Category;
        assert!(p.validate_shape().is_err());
        p.target_ids = vec![Uuid::new_v4()];
        assert!(p.validate_shape().is_ok());
    }

    #[test]
    fn test_percentage_range() {
        let mut p = base_promo();
        p.value = dec!(0);
        assert!(p.validate_shape().is_err());
        p.value = dec!(100.01);
        assert!(p.validate_shape().is_err());
        p.value = dec!(100);
        assert!(p.validate_shape().is_ok());
    }

    #[test]
    fn test_zero_usage_limit_is_unlimited() {
        let mut p = base_promo();
        p.usage_limit = Some(0);
        p.used_count = 500;
        assert!(!p.usage_exhausted());
        p.usage_limit = Some(500);
        assert!(p.usage_exhausted());
    }
}
