use crate::config::DepositConfig;
use std::path::PathBuf;
use tracing::info;

/// Ensures the storage root exists and returns its path.
pub async fn setup_storage(config: &DepositConfig) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(&config.storage_root).await?;
    info!("storage root: {}", config.storage_root.display());
    Ok(config.storage_root.clone())
}
