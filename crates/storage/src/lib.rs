use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use surfacemap_core::{CaptureSession, ConsolidatedEndpoint, RecordedCapture, ScopeTarget, SessionSummary};

mod capture_queries;
mod catalog_queries;
pub mod sources;

pub use sources::{BruteforceSource, DiscoveredEndpointSource, ManualCaptureSource};

const COUNTED_TABLES: &[&str] = &[
    "scope_targets",
    "discovered_endpoints",
    "manual_crawl_sessions",
    "manual_crawl_captures",
    "ffuf_url_scans",
    "consolidated_url_endpoints",
    "consolidated_url_parameters",
];

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Row counts of every table this crate owns, for the status command.
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(COUNTED_TABLES.len());
        for table in COUNTED_TABLES {
            let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push((*table, row.0));
        }
        Ok(counts)
    }

    pub async fn load_scope_target(&self, id: &str) -> Result<Option<ScopeTarget>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT scope_target FROM scope_targets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(scope_target,)| ScopeTarget::from_stored(id, &scope_target)))
    }

    /// Tool names that have raw discovered endpoints for the scope target.
    pub async fn list_discovered_tools(&self, scope_target_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT scan_type FROM discovered_endpoints WHERE scope_target_id = $1 ORDER BY scan_type",
        )
        .bind(scope_target_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Atomically swap the consolidated catalog of one scope target.
    pub async fn replace_catalog(
        &self,
        scope_target_id: &str,
        endpoints: &[ConsolidatedEndpoint],
    ) -> Result<()> {
        catalog_queries::replace_catalog(&self.pool, scope_target_id, endpoints).await
    }

    pub async fn list_catalog(&self, scope_target_id: &str) -> Result<Vec<ConsolidatedEndpoint>> {
        catalog_queries::list_catalog(&self.pool, scope_target_id).await
    }

    // --- Manual capture sessions ---

    pub async fn start_capture_session(&self, session: &CaptureSession) -> Result<()> {
        capture_queries::insert_session(&self.pool, session).await
    }

    pub async fn store_capture(&self, capture: &RecordedCapture) -> Result<()> {
        capture_queries::insert_capture(&self.pool, capture).await
    }

    pub async fn complete_capture_session(&self, summary: &SessionSummary) -> Result<()> {
        capture_queries::complete_session(&self.pool, summary).await
    }

    /// Close active sessions that never captured a request and are older
    /// than `stale_after_seconds`. Returns how many were closed.
    pub async fn cleanup_stale_sessions(&self, stale_after_seconds: i64) -> Result<u64> {
        capture_queries::cleanup_stale_sessions(&self.pool, stale_after_seconds).await
    }
}
