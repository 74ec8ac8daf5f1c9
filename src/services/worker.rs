use crate::config::{DepositConfig, OrphanPolicy};
use crate::services::transfer_store::TransferStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodically purges incomplete transfers older than the configured age.
/// Only active when the orphan policy is `Purge`; under `Retain` abandoned
/// transfers stay visible in the collection feed.
pub struct BackgroundWorker {
    store: Arc<TransferStore>,
    config: DepositConfig,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        store: Arc<TransferStore>,
        config: DepositConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("background worker shutting down");
                    break;
                }
                _ = sleep(SWEEP_INTERVAL) => {
                    self.sweep_orphans().await;
                }
            }
        }
    }

    async fn sweep_orphans(&self) {
        if self.config.orphan_policy != OrphanPolicy::Purge {
            return;
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.orphan_max_age)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let stale = match self.store.stale_incomplete_transfers(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!("failed to query stale transfers: {}", e);
                return;
            }
        };

        for transfer in stale {
            tracing::info!(transfer_id = %transfer.id, "purging abandoned transfer");
            if let Err(e) = self.store.rollback_transfer(&transfer).await {
                tracing::error!(transfer_id = %transfer.id, "failed to purge transfer: {}", e);
            }
        }
    }
}
