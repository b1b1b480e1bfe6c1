//! Background refresh of the loyalty settings snapshot.
//!
//! Settlements read their settings once at entry. The poller keeps a shared
//! snapshot warm so the hot path never waits on the store for tenant config;
//! admin writes become visible within one poll interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::LoyaltySettings;
use crate::interfaces::{LoyaltyStore, StorageError};

/// Handle to the running poller. Dropping the handle does not stop the task;
/// call [`SettingsPoller::shutdown`] or drop every receiver.
pub struct SettingsPoller {
    rx: watch::Receiver<LoyaltySettings>,
    task: JoinHandle<()>,
}

impl SettingsPoller {
    /// Read the settings once, then keep refreshing them every `interval`.
    ///
    /// The initial read is fatal: a service that cannot see its loyalty
    /// config should not start. Later read failures keep the last good
    /// snapshot and log.
    pub async fn spawn(
        loyalty: Arc<dyn LoyaltyStore>,
        interval: Duration,
    ) -> Result<Self, StorageError> {
        let initial = loyalty.settings().await?;
        info!(enabled = initial.enabled, "loyalty settings loaded");
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it, the snapshot is fresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }
                match loyalty.settings().await {
                    Ok(settings) => {
                        tx.send_if_modified(|current| {
                            if *current == settings {
                                false
                            } else {
                                info!(enabled = settings.enabled, "loyalty settings changed");
                                *current = settings;
                                true
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "loyalty settings refresh failed, keeping last snapshot");
                    }
                }
            }
        });

        Ok(Self { rx, task })
    }

    /// A receiver for the current snapshot; hand this to the settlement
    /// service.
    pub fn subscribe(&self) -> watch::Receiver<LoyaltySettings> {
        self.rx.clone()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}
