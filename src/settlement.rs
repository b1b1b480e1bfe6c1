//! Settlement service: the public entry point.
//!
//! Wraps the composer in the transactional discipline: one exclusive lock
//! per customer, an optimistic compare-and-increment on the promo usage
//! slot with bounded backoff, a deadline on the whole settlement, and
//! idempotent replay by order id. All writes land in one atomic commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::composer::{self, ComposerInput};
use crate::config::SettlementConfig;
use crate::contract::SettleRequest;
use crate::domain::{DiscountBreakdown, LoyaltySettings, OrderSnapshot, OrderState, SettlementRecord};
use crate::error::{SettlementError, ValidationError};
use crate::interfaces::{PromoUsage, SettlementCommit, StorageError};
use crate::storage::Stores;

/// Transaction tuning, derived from [`SettlementConfig`].
#[derive(Debug, Clone)]
pub struct SettlementTuning {
    /// Deadline for one settlement.
    pub timeout: Duration,
    /// Bound on promo compare-and-increment retries.
    pub promo_retry_max: usize,
    /// Base delay for the retry backoff.
    pub promo_retry_base: Duration,
    /// Local offset for the Sunday week boundary.
    pub week_offset: FixedOffset,
}

impl SettlementTuning {
    pub fn from_config(config: &SettlementConfig) -> Self {
        let week_offset = FixedOffset::east_opt(config.week_offset_minutes * 60)
            .unwrap_or_else(|| {
                warn!(
                    minutes = config.week_offset_minutes,
                    "invalid week offset, falling back to UTC"
                );
                FixedOffset::east_opt(0).unwrap()
            });
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            promo_retry_max: config.promo_retry_max,
            promo_retry_base: Duration::from_millis(config.promo_retry_base_ms),
            week_offset,
        }
    }
}

impl Default for SettlementTuning {
    fn default() -> Self {
        Self::from_config(&SettlementConfig::default())
    }
}

/// The settlement service.
pub struct SettlementService {
    stores: Stores,
    tuning: SettlementTuning,
    /// Injected loyalty settings snapshot, fed by the poller. When absent,
    /// settings are read from the store at settlement entry.
    settings_feed: Option<watch::Receiver<LoyaltySettings>>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SettlementService {
    pub fn new(stores: Stores, tuning: SettlementTuning) -> Self {
        Self {
            stores,
            tuning,
            settings_feed: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Read loyalty settings from the poller's watch channel instead of the
    /// store on every settlement.
    pub fn with_settings_feed(mut self, feed: watch::Receiver<LoyaltySettings>) -> Self {
        self.settings_feed = Some(feed);
        self
    }

    /// Settle a checkout now.
    pub async fn settle(
        &self,
        request: SettleRequest,
    ) -> Result<DiscountBreakdown, SettlementError> {
        self.settle_at(request, Utc::now()).await
    }

    /// Settle a checkout at an explicit instant. The whole settlement runs
    /// under the configured deadline; expiry surfaces as `Timeout` and the
    /// caller retries the checkout (replays are idempotent by order id).
    pub async fn settle_at(
        &self,
        request: SettleRequest,
        now: DateTime<Utc>,
    ) -> Result<DiscountBreakdown, SettlementError> {
        let order = request.into_order().map_err(SettlementError::Validation)?;
        match tokio::time::timeout(self.tuning.timeout, self.settle_locked(order, now)).await {
            Ok(result) => result,
            Err(_) => Err(SettlementError::Timeout),
        }
    }

    /// Reverse a confirmed settlement: promo usage, cap consumption, and the
    /// net point movement all come back in one atomic unit.
    pub async fn refund(&self, order_id: Uuid) -> Result<SettlementRecord, SettlementError> {
        let record = self
            .stores
            .settlements
            .record(order_id)
            .await?
            .ok_or(ValidationError::RecordNotFound)?;

        let lock = self.customer_lock(record.customer_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.stores.settlements.revert(order_id).await {
                Ok(reverted) => {
                    info!(order = %order_id, customer = %reverted.customer_id, "settlement refunded");
                    Ok(reverted)
                }
                Err(StorageError::AlreadyReverted(_)) => {
                    Err(ValidationError::AlreadyRefunded.into())
                }
                Err(StorageError::NotFound(_)) => Err(ValidationError::RecordNotFound.into()),
                Err(e) => Err(e.into()),
            }
        };
        drop(lock);
        self.prune_lock(record.customer_id).await;
        result
    }

    async fn customer_lock(&self, customer_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(customer_id).or_default())
    }

    /// Remove the customer's lock slot once nothing holds it, so the map only
    /// ever carries in-flight customers.
    async fn prune_lock(&self, customer_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(&customer_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&customer_id);
            }
        }
    }

    async fn settings_snapshot(&self) -> Result<LoyaltySettings, SettlementError> {
        match &self.settings_feed {
            Some(feed) => Ok(feed.borrow().clone()),
            None => Ok(self.stores.loyalty.settings().await?),
        }
    }

    async fn settle_locked(
        &self,
        order: OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DiscountBreakdown, SettlementError> {
        let customer_id = order.customer_id;
        let lock = self.customer_lock(customer_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.settle_exclusive(&order, now).await
        };
        drop(lock);
        self.prune_lock(customer_id).await;
        result
    }

    async fn settle_exclusive(
        &self,
        order: &OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DiscountBreakdown, SettlementError> {
        // Idempotent replay: same order id, same breakdown, nothing consumed
        // twice.
        if let Some(existing) = self.stores.settlements.record(order.order_id).await? {
            info!(order = %order.order_id, "replaying recorded settlement");
            return Ok(existing.breakdown);
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.tuning.promo_retry_base)
            .with_max_delay(Duration::from_secs(1))
            .with_max_times(self.tuning.promo_retry_max)
            .with_jitter();

        let result = (|| async { self.attempt(order, now).await })
            .retry(backoff)
            .when(|e: &SettlementError| {
                matches!(e, SettlementError::Storage(StorageError::UsageConflict))
            })
            .notify(|_err: &SettlementError, delay: Duration| {
                warn!(delay = ?delay, "promo usage contended, retrying");
            })
            .await;

        match result {
            Err(SettlementError::Storage(StorageError::UsageConflict)) => {
                Err(SettlementError::PromoContended {
                    attempts: self.tuning.promo_retry_max + 1,
                })
            }
            Err(SettlementError::Storage(StorageError::DuplicateOrder(order_id))) => {
                // Lost a replay race outside our lock scope; serve the record.
                let existing = self
                    .stores
                    .settlements
                    .record(order_id)
                    .await?
                    .ok_or_else(|| {
                        SettlementError::Consistency(format!(
                            "order {order_id} reported settled but has no record"
                        ))
                    })?;
                Ok(existing.breakdown)
            }
            other => other,
        }
    }

    /// One settlement attempt: load, compose, commit.
    ///
    /// Reads the promo fresh on every attempt so a lost compare-and-increment
    /// re-validates against the new `used_count`.
    async fn attempt(
        &self,
        order: &OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DiscountBreakdown, SettlementError> {
        let promo = match &order.promo_code {
            Some(code) => Some(
                self.stores
                    .promos
                    .by_code(code)
                    .await?
                    .ok_or_else(|| ValidationError::PromoNotFound(code.clone()))?,
            ),
            None => None,
        };

        let profile = self.stores.settlements.bnpc_profile(order.customer_id).await?;
        let window = self.stores.settlements.cap_window(order.customer_id).await?;
        let settings = self.settings_snapshot().await?;
        let account = if order.points_to_redeem.unwrap_or(0) > 0 {
            Some(self.stores.loyalty.account(order.customer_id).await?)
        } else {
            None
        };

        let composition = composer::compose(ComposerInput {
            order,
            promo: promo.as_ref(),
            bnpc_profile: profile.as_ref(),
            cap_window: window,
            settings: &settings,
            account: account.as_ref(),
            now,
            week_offset: self.tuning.week_offset,
        })?;

        let breakdown = composition.breakdown;
        let record = SettlementRecord {
            order_id: order.order_id,
            customer_id: order.customer_id,
            state: OrderState::Confirmed,
            breakdown: breakdown.clone(),
            promo_id: promo.as_ref().map(|p| p.id),
            purchase_consumed_delta: composition.caps.purchase_delta,
            discount_consumed_delta: composition.caps.discount_delta,
            points_used: breakdown.loyalty_discount.points_used,
            points_earned: breakdown.loyalty_discount.points_earned,
            settled_at: now,
        };

        self.stores
            .settlements
            .commit(SettlementCommit {
                record,
                window: composition.caps.window,
                promo_usage: promo.as_ref().map(|p| PromoUsage {
                    promo_id: p.id,
                    expected_used_count: p.used_count,
                }),
            })
            .await?;

        info!(
            order = %order.order_id,
            customer = %order.customer_id,
            total = %breakdown.total,
            paid = %breakdown.final_amount_paid,
            "settlement committed"
        );
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{RequestLine, SettleRequest};
    use crate::storage::MemoryBackend;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn service(backend: &MemoryBackend) -> SettlementService {
        SettlementService::new(
            Stores {
                promos: backend.promo_store(),
                loyalty: backend.loyalty_store(),
                settlements: backend.settlement_store(),
            },
            SettlementTuning::default(),
        )
    }

    fn request(customer_id: Uuid) -> SettleRequest {
        SettleRequest {
            customer_id,
            order_id: Uuid::new_v4(),
            lines: vec![RequestLine {
                product_id: Uuid::new_v4(),
                category_id: Uuid::new_v4(),
                unit_price: dec!(100),
                quantity: 1,
                bnpc_eligible: false,
            }],
            promo_code: None,
            points_to_redeem: None,
        }
    }

    #[tokio::test]
    async fn test_lock_slots_released_after_settlement() {
        let backend = MemoryBackend::new();
        let svc = service(&backend);
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 4, 0, 0).unwrap();

        let req = request(Uuid::new_v4());
        let order_id = req.order_id;
        svc.settle_at(req, now).await.unwrap();
        assert!(svc.locks.lock().await.is_empty());

        svc.refund(order_id).await.unwrap();
        assert!(svc.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_lock_slots_released_after_failed_settlement() {
        let backend = MemoryBackend::new();
        let svc = service(&backend);
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 4, 0, 0).unwrap();

        let mut req = request(Uuid::new_v4());
        req.points_to_redeem = Some(500);
        assert!(svc.settle_at(req, now).await.is_err());
        assert!(svc.locks.lock().await.is_empty());
    }
}
