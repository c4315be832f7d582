pub mod capture;
pub mod cleanup;
pub mod consolidate;
pub mod endpoints;
pub mod offline;
pub mod status;

use anyhow::Result;
use surfacemap_core::AppConfig;
use surfacemap_storage::Storage;

/// Connect with the configured pool size and bring the schema up to date.
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let storage =
        Storage::with_pool_size(&config.database.postgres_url, config.database.max_connections).await?;
    storage.run_migrations().await?;
    Ok(storage)
}
