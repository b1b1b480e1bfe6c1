//! In-memory storage for tests and standalone runs.
//!
//! One shared state behind a single async mutex, so every commit and revert
//! is atomic by construction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    BnpcProfile, LoyaltyAccount, LoyaltySettings, OrderState, Promo, SettlementRecord,
    WeeklyCapWindow,
};
use crate::interfaces::{
    LoyaltyStore, PromoStore, Result, SettlementCommit, SettlementStore, StorageError,
};

#[derive(Default)]
struct MemoryState {
    promos: HashMap<Uuid, Promo>,
    settings: Option<LoyaltySettings>,
    balances: HashMap<Uuid, Decimal>,
    profiles: HashMap<Uuid, BnpcProfile>,
    windows: HashMap<Uuid, WeeklyCapWindow>,
    records: HashMap<Uuid, SettlementRecord>,
}

/// Shared in-memory backend; hand out one store per interface.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promo_store(&self) -> Arc<dyn PromoStore> {
        Arc::new(MemoryPromoStore {
            state: Arc::clone(&self.state),
        })
    }

    pub fn loyalty_store(&self) -> Arc<dyn LoyaltyStore> {
        Arc::new(MemoryLoyaltyStore {
            state: Arc::clone(&self.state),
        })
    }

    pub fn settlement_store(&self) -> Arc<dyn SettlementStore> {
        Arc::new(MemorySettlementStore {
            state: Arc::clone(&self.state),
        })
    }
}

struct MemoryPromoStore {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl PromoStore for MemoryPromoStore {
    async fn by_code(&self, code: &str) -> Result<Option<Promo>> {
        let state = self.state.lock().await;
        Ok(state.promos.values().find(|p| p.code == code).cloned())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<Promo>> {
        let state = self.state.lock().await;
        Ok(state.promos.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Promo>> {
        let state = self.state.lock().await;
        Ok(state.promos.values().cloned().collect())
    }

    async fn insert(&self, promo: Promo) -> Result<()> {
        let mut state = self.state.lock().await;
        state.promos.insert(promo.id, promo);
        Ok(())
    }

    async fn update(&self, promo: Promo) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.promos.contains_key(&promo.id) {
            return Err(StorageError::NotFound(format!("promo {}", promo.id)));
        }
        state.promos.insert(promo.id, promo);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .promos
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("promo {id}")))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.promos.get_mut(&id) {
            Some(promo) => {
                promo.active = active;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("promo {id}"))),
        }
    }
}

struct MemoryLoyaltyStore {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl LoyaltyStore for MemoryLoyaltyStore {
    async fn settings(&self) -> Result<LoyaltySettings> {
        let state = self.state.lock().await;
        Ok(state.settings.clone().unwrap_or_default())
    }

    async fn put_settings(&self, settings: LoyaltySettings) -> Result<()> {
        let mut state = self.state.lock().await;
        state.settings = Some(settings);
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut settings = state.settings.clone().unwrap_or_default();
        settings.enabled = enabled;
        state.settings = Some(settings);
        Ok(())
    }

    async fn account(&self, customer_id: Uuid) -> Result<LoyaltyAccount> {
        let state = self.state.lock().await;
        Ok(LoyaltyAccount {
            customer_id,
            points_balance: state
                .balances
                .get(&customer_id)
                .copied()
                .unwrap_or(Decimal::ZERO),
        })
    }

    async fn credit(&self, customer_id: Uuid, points: Decimal) -> Result<()> {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(customer_id).or_insert(Decimal::ZERO);
        *balance += points;
        Ok(())
    }

    async fn reset_all_points(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.balances.clear();
        Ok(())
    }
}

struct MemorySettlementStore {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl SettlementStore for MemorySettlementStore {
    async fn bnpc_profile(&self, customer_id: Uuid) -> Result<Option<BnpcProfile>> {
        let state = self.state.lock().await;
        Ok(state.profiles.get(&customer_id).cloned())
    }

    async fn put_bnpc_profile(&self, profile: BnpcProfile) -> Result<()> {
        let mut state = self.state.lock().await;
        state.profiles.insert(profile.customer_id, profile);
        Ok(())
    }

    async fn cap_window(&self, customer_id: Uuid) -> Result<Option<WeeklyCapWindow>> {
        let state = self.state.lock().await;
        Ok(state.windows.get(&customer_id).cloned())
    }

    async fn record(&self, order_id: Uuid) -> Result<Option<SettlementRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&order_id).cloned())
    }

    async fn commit(&self, commit: SettlementCommit) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = &commit.record;

        if state.records.contains_key(&record.order_id) {
            return Err(StorageError::DuplicateOrder(record.order_id));
        }

        // Validate every piece before mutating anything; an aborted commit
        // must leave no trace.
        if let Some(usage) = &commit.promo_usage {
            let promo = state
                .promos
                .get(&usage.promo_id)
                .ok_or_else(|| StorageError::NotFound(format!("promo {}", usage.promo_id)))?;
            if promo.used_count != usage.expected_used_count {
                return Err(StorageError::UsageConflict);
            }
        }

        let balance = state
            .balances
            .get(&record.customer_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let next = balance - record.points_used + record.points_earned;
        if next < Decimal::ZERO {
            return Err(StorageError::Consistency(format!(
                "balance for {} would go negative",
                record.customer_id
            )));
        }

        if let Some(usage) = &commit.promo_usage {
            if let Some(promo) = state.promos.get_mut(&usage.promo_id) {
                promo.used_count += 1;
            }
        }
        state.balances.insert(record.customer_id, next);

        if let Some(window) = commit.window {
            state.windows.insert(window.customer_id, window);
        }

        state.records.insert(record.order_id, commit.record);
        Ok(())
    }

    async fn revert(&self, order_id: Uuid) -> Result<SettlementRecord> {
        let mut state = self.state.lock().await;

        let record = state
            .records
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("settlement {order_id}")))?;
        if record.state != OrderState::Confirmed {
            return Err(StorageError::AlreadyReverted(order_id));
        }

        if let Some(promo_id) = record.promo_id {
            if let Some(promo) = state.promos.get_mut(&promo_id) {
                promo.used_count = promo.used_count.saturating_sub(1);
            }
        }

        // Hand back cap consumption only if the window still covers the week
        // the order settled in; a rolled window already reset it.
        if let Some(window) = state.windows.get_mut(&record.customer_id) {
            if record.settled_at >= window.week_start {
                window.purchase_consumed =
                    (window.purchase_consumed - record.purchase_consumed_delta).max(Decimal::ZERO);
                window.discount_consumed =
                    (window.discount_consumed - record.discount_consumed_delta).max(Decimal::ZERO);
            }
        }

        let balance = state
            .balances
            .entry(record.customer_id)
            .or_insert(Decimal::ZERO);
        let next = *balance + record.points_used - record.points_earned;
        if next < Decimal::ZERO {
            warn!(customer = %record.customer_id, "refund would drive balance negative; clamping");
        }
        *balance = next.max(Decimal::ZERO);

        let stored = state
            .records
            .get_mut(&order_id)
            .ok_or_else(|| StorageError::NotFound(format!("settlement {order_id}")))?;
        stored.state = OrderState::Refunded;
        Ok(stored.clone())
    }
}
