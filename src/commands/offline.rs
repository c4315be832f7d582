use std::path::PathBuf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use surfacemap_core::{AppConfig, ScopeTarget, SourceScanner, SourceTag};
use surfacemap_parser::UrlListSource;
use surfacemap_prober::StatusProber;

use crate::consolidate::build_catalog;

/// Consolidate plain URL files in memory. Nothing touches the database.
pub async fn run(
    config: AppConfig,
    root_domain: &str,
    urls: Vec<PathBuf>,
    tag: &str,
    probe: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let target = ScopeTarget::new("offline", root_domain);
    let scanners: Vec<Box<dyn SourceScanner>> = urls
        .into_iter()
        .map(|path| Box::new(UrlListSource::new(path, SourceTag::tool(tag))) as Box<dyn SourceScanner>)
        .collect();

    let prober = if probe {
        Some(StatusProber::new(&config.prober)?)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (endpoints, summary) = build_catalog(&config, &target, &scanners, prober.as_ref(), &cancel).await?;
    info!(
        observations = summary.observations,
        endpoints = summary.endpoints,
        parameters = summary.parameters,
        "offline catalog built"
    );

    let json = serde_json::to_string_pretty(&endpoints)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            println!("Wrote {} endpoints to {}", endpoints.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
