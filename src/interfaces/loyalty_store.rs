//! Loyalty settings and account interface.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::Result;
use crate::domain::{LoyaltyAccount, LoyaltySettings};

/// Interface for the tenant-wide loyalty settings and per-customer balances.
///
/// Settings writes are serialized against in-flight settlements: a settlement
/// reads its snapshot once at entry, so an admin toggle lands fully-before or
/// fully-after, never mid-transaction.
#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    /// Current tenant-wide settings.
    async fn settings(&self) -> Result<LoyaltySettings>;

    /// Replace the settings.
    async fn put_settings(&self, settings: LoyaltySettings) -> Result<()>;

    /// Flip the program on or off without touching the rates.
    async fn set_enabled(&self, enabled: bool) -> Result<()>;

    /// A customer's account; customers without history have a zero balance.
    async fn account(&self, customer_id: Uuid) -> Result<LoyaltyAccount>;

    /// Add points to a customer's balance (admin adjustments, seeding).
    async fn credit(&self, customer_id: Uuid, points: Decimal) -> Result<()>;

    /// Zero every balance in the tenant.
    async fn reset_all_points(&self) -> Result<()>;
}
