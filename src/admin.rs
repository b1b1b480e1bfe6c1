//! Admin surface: promo catalog management and loyalty program controls.
//!
//! Everything here is back-office. Promo usage counters and point balances
//! consumed at checkout are mutated only through the settlement store's
//! atomic commit; this surface covers the catalog, the program settings,
//! and manual adjustments.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::domain::{LoyaltySettings, OrderSnapshot, Promo};
use crate::error::{SettlementError, ValidationError};
use crate::interfaces::{LoyaltyStore, PromoStore, StorageError};
use crate::promo_validator;

/// Admin operations over promos and the loyalty program.
pub struct AdminService {
    promos: Arc<dyn PromoStore>,
    loyalty: Arc<dyn LoyaltyStore>,
}

/// A promo the customer could apply right now, with the discount it would
/// yield on the given cart.
#[derive(Debug, Clone, PartialEq)]
pub struct EligiblePromo {
    pub promo: Promo,
    pub discount: Decimal,
}

impl AdminService {
    pub fn new(promos: Arc<dyn PromoStore>, loyalty: Arc<dyn LoyaltyStore>) -> Self {
        Self { promos, loyalty }
    }

    pub async fn list_promos(&self) -> Result<Vec<Promo>, SettlementError> {
        Ok(self.promos.list().await?)
    }

    pub async fn promo(&self, id: Uuid) -> Result<Promo, SettlementError> {
        self.promos
            .by_id(id)
            .await?
            .ok_or_else(|| ValidationError::PromoNotFound(id.to_string()).into())
    }

    /// Create a promo. Codes are unique; shape invariants (scope targets,
    /// positive value, ordered dates) are enforced before the insert.
    pub async fn create_promo(&self, promo: Promo) -> Result<Promo, SettlementError> {
        promo.validate_shape()?;
        if self.promos.by_code(&promo.code).await?.is_some() {
            return Err(ValidationError::InvalidPromo(format!(
                "code {} already exists",
                promo.code
            ))
            .into());
        }
        self.promos.insert(promo.clone()).await?;
        info!(promo = %promo.id, code = %promo.code, "promo created");
        Ok(promo)
    }

    /// Replace a promo by id. `used_count` is carried over from the stored
    /// row; the admin surface never rewrites consumption history.
    pub async fn update_promo(&self, promo: Promo) -> Result<Promo, SettlementError> {
        promo.validate_shape()?;
        let existing = self
            .promos
            .by_id(promo.id)
            .await?
            .ok_or_else(|| ValidationError::PromoNotFound(promo.id.to_string()))?;
        if promo.code != existing.code && self.promos.by_code(&promo.code).await?.is_some() {
            return Err(ValidationError::InvalidPromo(format!(
                "code {} already exists",
                promo.code
            ))
            .into());
        }
        let promo = Promo {
            used_count: existing.used_count,
            ..promo
        };
        self.promos.update(promo.clone()).await?;
        info!(promo = %promo.id, code = %promo.code, "promo updated");
        Ok(promo)
    }

    pub async fn delete_promo(&self, id: Uuid) -> Result<(), SettlementError> {
        match self.promos.delete(id).await {
            Ok(()) => {
                info!(promo = %id, "promo deleted");
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                Err(ValidationError::PromoNotFound(id.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_promo_active(&self, id: Uuid, active: bool) -> Result<(), SettlementError> {
        match self.promos.set_active(id, active).await {
            Ok(()) => {
                info!(promo = %id, active, "promo active flag set");
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                Err(ValidationError::PromoNotFound(id.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Promos that would validate against this cart right now. Advisory only;
    /// settlement re-validates whatever code the customer actually submits.
    pub async fn eligible_promos(
        &self,
        order: &OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligiblePromo>, SettlementError> {
        let mut eligible = Vec::new();
        for promo in self.promos.list().await? {
            if let Ok(discount) = promo_validator::validate(&promo, order, now) {
                eligible.push(EligiblePromo { promo, discount });
            }
        }
        Ok(eligible)
    }

    pub async fn loyalty_settings(&self) -> Result<LoyaltySettings, SettlementError> {
        Ok(self.loyalty.settings().await?)
    }

    /// Replace the loyalty settings. Rates must be positive and the redeem
    /// ceiling a percentage.
    pub async fn update_loyalty_settings(
        &self,
        settings: LoyaltySettings,
    ) -> Result<LoyaltySettings, SettlementError> {
        if settings.points_to_currency_rate <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount(
                "pointsToCurrencyRate must be positive".into(),
            )
            .into());
        }
        if settings.max_redeem_percent < Decimal::ZERO
            || settings.max_redeem_percent > Decimal::ONE_HUNDRED
        {
            return Err(ValidationError::InvalidAmount(
                "maxRedeemPercent must be between 0 and 100".into(),
            )
            .into());
        }
        if settings.earn_rate < Decimal::ZERO {
            return Err(ValidationError::InvalidAmount(
                "earnRate must not be negative".into(),
            )
            .into());
        }
        self.loyalty.put_settings(settings.clone()).await?;
        info!(
            rate = %settings.points_to_currency_rate,
            redeem_cap = %settings.max_redeem_percent,
            earn = %settings.earn_rate,
            enabled = settings.enabled,
            "loyalty settings updated"
        );
        Ok(settings)
    }

    pub async fn set_loyalty_enabled(&self, enabled: bool) -> Result<(), SettlementError> {
        self.loyalty.set_enabled(enabled).await?;
        info!(enabled, "loyalty program toggled");
        Ok(())
    }

    pub async fn credit_points(
        &self,
        customer_id: Uuid,
        points: Decimal,
    ) -> Result<(), SettlementError> {
        if points <= Decimal::ZERO {
            return Err(
                ValidationError::InvalidAmount("credit must be positive".into()).into(),
            );
        }
        self.loyalty.credit(customer_id, points).await?;
        info!(customer = %customer_id, %points, "points credited");
        Ok(())
    }

    /// Zero every balance in the tenant. Destructive and deliberate; the
    /// caller confirms upstream.
    pub async fn reset_all_points(&self) -> Result<(), SettlementError> {
        self.loyalty.reset_all_points().await?;
        info!("all loyalty balances reset");
        Ok(())
    }
}
