//! Storage interfaces.
//!
//! Settlement reads go through these traits; writes land in a single atomic
//! `SettlementStore::commit`. Implementations: SQLite (feature `sqlite`) and
//! in-memory.

pub mod loyalty_store;
pub mod promo_store;
pub mod settlement_store;

pub use loyalty_store::LoyaltyStore;
pub use promo_store::PromoStore;
pub use settlement_store::{PromoUsage, SettlementCommit, SettlementStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic promo compare-and-increment lost to a concurrent commit.
    #[error("Promo usage conflict")]
    UsageConflict,

    /// A settlement record already exists for this order id.
    #[error("Order {0} already settled")]
    DuplicateOrder(uuid::Uuid),

    /// The order was already reverted.
    #[error("Order {0} already reverted")]
    AlreadyReverted(uuid::Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored state contradicts an invariant (e.g. a balance going negative).
    #[error("Storage consistency fault: {0}")]
    Consistency(String),

    #[error("Invalid decimal value: {0}")]
    InvalidDecimal(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
