use std::path::Path;

use anyhow::{bail, Result};
use tracing::{info, warn};

use surfacemap_core::{AppConfig, CaptureError, CaptureSession, CapturedRequest};

use crate::commands::open_storage;

/// Replay an exported capture file as one manual crawl session.
pub async fn run(config: AppConfig, scope_target: &str, target_url: &str, file: &Path) -> Result<()> {
    let storage = open_storage(&config).await?;
    if storage.load_scope_target(scope_target).await?.is_none() {
        bail!("unknown scope target {scope_target}");
    }

    let content = tokio::fs::read_to_string(file).await?;

    let mut session = CaptureSession::start(scope_target, target_url);
    storage.start_capture_session(&session).await?;
    info!(session = %session.id, scope = scope_target, "capture session started");

    let mut rejected = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: CapturedRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "undecodable capture, skipping");
                rejected += 1;
                continue;
            }
        };
        match session.record(request) {
            Ok(capture) => storage.store_capture(&capture).await?,
            Err(CaptureError::InvalidUrl(url)) => {
                warn!(line = line_no + 1, url = %url, "capture has no usable url, skipping");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let summary = session.stop()?;
    storage.complete_capture_session(&summary).await?;

    println!(
        "Session {}: {} requests across {} endpoints ({} rejected)",
        summary.session_id, summary.request_count, summary.endpoint_count, rejected
    );
    Ok(())
}
