//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::interfaces::{LoyaltyStore, PromoStore, SettlementStore};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteLoyaltyStore, SqlitePromoStore, SqliteSettlementStore};

/// The trait handles one backend hands out.
#[derive(Clone)]
pub struct Stores {
    pub promos: Arc<dyn PromoStore>,
    pub loyalty: Arc<dyn LoyaltyStore>,
    pub settlements: Arc<dyn SettlementStore>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "memory" => {
            let backend = MemoryBackend::new();
            Ok(Stores {
                promos: backend.promo_store(),
                loyalty: backend.loyalty_store(),
                settlements: backend.settlement_store(),
            })
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;

            let promos = Arc::new(SqlitePromoStore::new(pool.clone()));
            promos.init().await?;

            let loyalty = Arc::new(SqliteLoyaltyStore::new(pool.clone()));
            loyalty.init().await?;

            let settlements = Arc::new(SqliteSettlementStore::new(pool));
            settlements.init().await?;

            Ok(Stores {
                promos,
                loyalty,
                settlements,
            })
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => Err("SQLite storage requested but 'sqlite' feature is not enabled".into()),
        other => Err(format!("Unknown storage type: {other}").into()),
    }
}
