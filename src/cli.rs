use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "surfacemap", about = "Consolidate discovered URLs into a per-scope endpoint catalog")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rebuild the consolidated catalog of one or more scope targets
    Consolidate {
        /// Scope target id (repeatable)
        #[arg(short, long, required = true)]
        scope_target: Vec<String>,

        /// Skip the liveness probe
        #[arg(long)]
        no_probe: bool,

        /// Extra URL list file to merge in, one URL per line
        #[arg(short, long)]
        urls: Option<PathBuf>,

        /// Source name recorded for URLs from --urls
        #[arg(short, long, default_value = "import")]
        tag: String,
    },
    /// Consolidate URL list files without a database and print the catalog as JSON
    Offline {
        /// Domain treated as the direct scope
        #[arg(short, long)]
        root_domain: String,

        /// URL list file, one URL per line (repeatable)
        #[arg(short, long, required = true)]
        urls: Vec<PathBuf>,

        /// Source name recorded for every file
        #[arg(short, long, default_value = "import")]
        tag: String,

        /// Probe every endpoint for a live status code
        #[arg(long)]
        probe: bool,

        /// Write the JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the stored catalog of a scope target
    Endpoints {
        #[arg(short, long)]
        scope_target: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Record a manual capture session from a JSON-lines file of captured requests
    Capture {
        #[arg(short, long)]
        scope_target: String,

        /// Page the session was started on
        #[arg(short = 'u', long)]
        target_url: String,

        /// One captured request per line
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Close capture sessions that never recorded a request
    CleanupSessions {
        /// Override the configured staleness cutoff, in seconds
        #[arg(long)]
        stale_after: Option<i64>,
    },
    /// Show database connectivity and table counts
    Status,
}
