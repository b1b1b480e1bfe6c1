//! Promo persistence interface.

use async_trait::async_trait;
use uuid::Uuid;

use super::Result;
use crate::domain::Promo;

/// Interface for promo records.
///
/// `used_count` is mutated only through `SettlementStore::commit`/`revert`;
/// the mutators here are the admin surface.
#[async_trait]
pub trait PromoStore: Send + Sync {
    /// Look up a promo by its code.
    async fn by_code(&self, code: &str) -> Result<Option<Promo>>;

    /// Look up a promo by id.
    async fn by_id(&self, id: Uuid) -> Result<Option<Promo>>;

    /// All promos, for the admin table.
    async fn list(&self) -> Result<Vec<Promo>>;

    /// Insert a new promo.
    async fn insert(&self, promo: Promo) -> Result<()>;

    /// Replace an existing promo by id.
    async fn update(&self, promo: Promo) -> Result<()>;

    /// Delete a promo by id.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Toggle the active flag.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<()>;
}
