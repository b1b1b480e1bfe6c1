//! Configuration for the settlement engine.
//!
//! Supports YAML file and environment variable overrides.

use serde::Deserialize;
use std::path::Path;

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Settlement transaction tuning.
    pub settlement: SettlementConfig,
    /// Loyalty settings hot-reload.
    pub loyalty: LoyaltyPollConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type (sqlite, memory).
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Path to database file.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "./data/settlements.db".to_string(),
        }
    }
}

/// Settlement transaction tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Deadline for one settlement, in milliseconds.
    pub timeout_ms: u64,
    /// Bound on promo compare-and-increment retries.
    pub promo_retry_max: usize,
    /// Base delay for the retry backoff, in milliseconds.
    pub promo_retry_base_ms: u64,
    /// Local timezone offset in minutes east of UTC; weekly caps reset at
    /// Sunday 00:00 in this offset.
    pub week_offset_minutes: i32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            promo_retry_max: 5,
            promo_retry_base_ms: 10,
            week_offset_minutes: 8 * 60,
        }
    }
}

/// Loyalty settings poller configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoyaltyPollConfig {
    /// How often the settings poller re-reads the store, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for LoyaltyPollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SUKLI_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STORAGE_PATH") {
            self.storage.path = path;
        }

        if let Ok(raw) = std::env::var("SETTLEMENT_TIMEOUT_MS") {
            if let Ok(ms) = raw.parse() {
                self.settlement.timeout_ms = ms;
            }
        }

        if let Ok(raw) = std::env::var("WEEK_OFFSET_MINUTES") {
            if let Ok(minutes) = raw.parse() {
                self.settlement.week_offset_minutes = minutes;
            }
        }

        if let Ok(raw) = std::env::var("LOYALTY_POLL_INTERVAL_SECS") {
            if let Ok(secs) = raw.parse() {
                self.loyalty.poll_interval_secs = secs;
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}
