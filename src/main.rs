mod cli;
mod commands;
mod consolidate;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use surfacemap_core::AppConfig;

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    apply_env_overrides(&mut config);

    match cli.command {
        Commands::Consolidate {
            scope_target,
            no_probe,
            urls,
            tag,
        } => {
            let probe = config.prober.enabled && !no_probe;
            commands::consolidate::run(config, scope_target, probe, urls, tag).await?;
        }
        Commands::Offline {
            root_domain,
            urls,
            tag,
            probe,
            output,
        } => {
            commands::offline::run(config, &root_domain, urls, &tag, probe, output).await?;
        }
        Commands::Endpoints { scope_target, json } => {
            commands::endpoints::run(config, &scope_target, json).await?;
        }
        Commands::Capture {
            scope_target,
            target_url,
            file,
        } => {
            commands::capture::run(config, &scope_target, &target_url, &file).await?;
        }
        Commands::CleanupSessions { stale_after } => {
            commands::cleanup::run(config, stale_after).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
    }

    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) {
    let parse_positive = |v: &str| -> Option<usize> { v.parse::<usize>().ok().filter(|&n| n > 0 && n <= 256) };

    if let Ok(v) = std::env::var("DATABASE_URL") {
        if !v.trim().is_empty() {
            config.database.postgres_url = v;
        }
    }
    if let Ok(v) = std::env::var("PROBE_ENABLED") {
        config.prober.enabled = v != "0" && v.to_lowercase() != "false";
    }
    if let Ok(v) = std::env::var("PROBE_WORKERS") {
        if let Some(n) = parse_positive(&v) {
            config.prober.workers = n;
        }
    }
    // 0 turns the per-host limit off
    if let Ok(v) = std::env::var("PROBE_RPS") {
        if let Ok(n) = v.parse::<u32>() {
            config.prober.requests_per_second = n;
        }
    }
}
