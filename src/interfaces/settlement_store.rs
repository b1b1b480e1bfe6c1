//! Settlement persistence: atomic commit and compensation.

use async_trait::async_trait;
use uuid::Uuid;

use super::Result;
use crate::domain::{BnpcProfile, SettlementRecord, WeeklyCapWindow};

/// Optimistic concurrency token for a promo usage slot.
///
/// The commit increments `used_count` only if it still equals
/// `expected_used_count`; otherwise the whole commit fails with
/// `StorageError::UsageConflict` and the caller re-validates and retries.
#[derive(Debug, Clone, PartialEq)]
pub struct PromoUsage {
    pub promo_id: Uuid,
    pub expected_used_count: u32,
}

/// Everything a settlement writes, applied as one atomic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCommit {
    /// Record to insert; its deltas drive the other writes.
    pub record: SettlementRecord,
    /// Updated weekly cap window, when BNPC consumed anything.
    pub window: Option<WeeklyCapWindow>,
    /// Promo compare-and-increment, when a promo was applied.
    pub promo_usage: Option<PromoUsage>,
}

/// Interface for settlement state.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// A customer's BNPC eligibility profile, if enrolled.
    async fn bnpc_profile(&self, customer_id: Uuid) -> Result<Option<BnpcProfile>>;

    /// Upsert a BNPC profile (verification flow, test seeding).
    async fn put_bnpc_profile(&self, profile: BnpcProfile) -> Result<()>;

    /// The customer's current weekly cap window, if one exists.
    async fn cap_window(&self, customer_id: Uuid) -> Result<Option<WeeklyCapWindow>>;

    /// The settlement record for an order, if the order was settled.
    async fn record(&self, order_id: Uuid) -> Result<Option<SettlementRecord>>;

    /// Apply a settlement atomically: insert the record, upsert the cap
    /// window, compare-and-increment the promo usage, and move the loyalty
    /// balance by `points_earned - points_used`. Any failure aborts the
    /// whole unit.
    async fn commit(&self, commit: SettlementCommit) -> Result<()>;

    /// Reverse a confirmed settlement atomically: release the promo usage
    /// slot, hand back the cap consumption, undo the net point movement, and
    /// mark the record refunded. Fails with `AlreadyReverted` when the
    /// record is not in the confirmed state.
    async fn revert(&self, order_id: Uuid) -> Result<SettlementRecord>;
}
