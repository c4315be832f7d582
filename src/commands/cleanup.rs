use anyhow::Result;
use surfacemap_core::AppConfig;

use crate::commands::open_storage;

pub async fn run(config: AppConfig, stale_after: Option<i64>) -> Result<()> {
    let stale_after = stale_after.unwrap_or(config.capture.stale_after_seconds).max(0);
    let storage = open_storage(&config).await?;
    let closed = storage.cleanup_stale_sessions(stale_after).await?;
    println!("Closed {closed} stale capture session(s) older than {stale_after}s");
    Ok(())
}
