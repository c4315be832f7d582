use anyhow::Result;
use surfacemap_core::AppConfig;

use crate::commands::open_storage;

pub async fn run(config: AppConfig, scope_target: &str, json: bool) -> Result<()> {
    let storage = open_storage(&config).await?;
    let endpoints = storage.list_catalog(scope_target).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
        return Ok(());
    }

    if endpoints.is_empty() {
        println!("No consolidated endpoints for {scope_target}. Run `surfacemap consolidate` first.");
        return Ok(());
    }

    println!("{} endpoints:\n", endpoints.len());
    for ep in &endpoints {
        let statuses = ep
            .status_codes
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let probe = match ep.probe_status {
            Some(0) => "down".to_string(),
            Some(s) => s.to_string(),
            None => "-".to_string(),
        };
        let sources = ep
            .sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "  {:<7} {}{}  [{}] live={} x{} ({})",
            ep.method,
            ep.domain,
            ep.templated_path,
            statuses,
            probe,
            ep.request_count,
            sources
        );
        for p in &ep.parameters {
            let more = if p.values_truncated { ", ..." } else { "" };
            println!(
                "      {}:{} x{} e.g. {}{}",
                p.location.as_str(),
                p.name,
                p.frequency,
                p.example_values.join(", "),
                more
            );
        }
    }
    Ok(())
}
