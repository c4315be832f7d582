use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use surfacemap_core::{AppConfig, SourceScanner, SourceTag};
use surfacemap_parser::UrlListSource;

use crate::commands::open_storage;
use crate::consolidate::{consolidate_scope, ScopeRegistry};

pub async fn run(
    config: AppConfig,
    scope_targets: Vec<String>,
    probe: bool,
    urls: Option<PathBuf>,
    tag: String,
) -> Result<()> {
    let storage = open_storage(&config).await?;
    let config = Arc::new(config);
    let registry = ScopeRegistry::new();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling; nothing from this run will be stored");
                cancel.cancel();
            }
        });
    }

    let mut runs = JoinSet::new();
    for scope_target in scope_targets {
        let config = config.clone();
        let storage = storage.clone();
        let registry = registry.clone();
        let cancel = cancel.clone();
        let extra: Vec<Box<dyn SourceScanner>> = match &urls {
            Some(path) => vec![Box::new(UrlListSource::new(path.clone(), SourceTag::tool(&tag)))],
            None => Vec::new(),
        };

        runs.spawn(async move {
            let result =
                consolidate_scope(&config, &storage, &registry, &scope_target, extra, probe, &cancel).await;
            (scope_target, result)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = runs.join_next().await {
        let (scope_target, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "consolidation task panicked");
                failed += 1;
                continue;
            }
        };
        match result {
            Ok(summary) => {
                info!(scope = %scope_target, "catalog replaced");
                println!(
                    "{scope_target}: {} observations -> {} endpoints, {} parameters",
                    summary.observations, summary.endpoints, summary.parameters
                );
                if probe {
                    println!("  probed {}, unreachable {}", summary.probed, summary.unreachable);
                }
                if !summary.skipped_sources.is_empty() {
                    println!("  skipped sources: {}", summary.skipped_sources.join(", "));
                }
            }
            Err(e) => {
                error!(scope = %scope_target, error = %e, "consolidation failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} consolidation run(s) failed");
    }
    Ok(())
}
