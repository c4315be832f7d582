use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};

use surfacemap_core::{ConsolidatedEndpoint, ConsolidatedParameter, ParamLocation, SourceTag};

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: String,
    scope_target_id: String,
    url: String,
    normalized_url: String,
    templated_path: String,
    domain: String,
    path: String,
    method: String,
    is_direct: bool,
    status_codes: Json<BTreeSet<u16>>,
    sources: Json<BTreeSet<SourceTag>>,
    request_count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    headers: Json<BTreeMap<String, String>>,
    response_headers: Json<BTreeMap<String, String>>,
    probe_status: Option<i32>,
}

#[derive(sqlx::FromRow)]
struct ParameterRow {
    endpoint_id: String,
    param_type: String,
    param_name: String,
    example_values: Json<Vec<String>>,
    frequency: i64,
    values_truncated: bool,
}

/// Delete then re-insert inside one transaction. Any failure drops the
/// transaction, which rolls back and leaves the previous catalog in place.
pub async fn replace_catalog(
    pool: &PgPool,
    scope_target_id: &str,
    endpoints: &[ConsolidatedEndpoint],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM consolidated_url_endpoints WHERE scope_target_id = $1")
        .bind(scope_target_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if !endpoints.is_empty() {
        let mut ids = Vec::with_capacity(endpoints.len());
        let mut urls = Vec::with_capacity(endpoints.len());
        let mut normalized = Vec::with_capacity(endpoints.len());
        let mut templated = Vec::with_capacity(endpoints.len());
        let mut domains = Vec::with_capacity(endpoints.len());
        let mut paths = Vec::with_capacity(endpoints.len());
        let mut methods = Vec::with_capacity(endpoints.len());
        let mut direct = Vec::with_capacity(endpoints.len());
        let mut status_codes = Vec::with_capacity(endpoints.len());
        let mut sources = Vec::with_capacity(endpoints.len());
        let mut request_counts = Vec::with_capacity(endpoints.len());
        let mut first_seen = Vec::with_capacity(endpoints.len());
        let mut last_seen = Vec::with_capacity(endpoints.len());
        let mut headers = Vec::with_capacity(endpoints.len());
        let mut response_headers = Vec::with_capacity(endpoints.len());
        let mut probe_status: Vec<Option<i32>> = Vec::with_capacity(endpoints.len());

        for ep in endpoints {
            ids.push(ep.id.clone());
            urls.push(ep.url.clone());
            normalized.push(ep.normalized_url.clone());
            templated.push(ep.templated_path.clone());
            domains.push(ep.domain.clone());
            paths.push(ep.path.clone());
            methods.push(ep.method.clone());
            direct.push(ep.is_direct);
            status_codes.push(serde_json::to_value(&ep.status_codes)?);
            sources.push(serde_json::to_value(&ep.sources)?);
            request_counts.push(ep.request_count as i64);
            first_seen.push(ep.first_seen);
            last_seen.push(ep.last_seen);
            headers.push(serde_json::to_value(&ep.headers)?);
            response_headers.push(serde_json::to_value(&ep.response_headers)?);
            probe_status.push(ep.probe_status.map(i32::from));
        }

        sqlx::query(
            "INSERT INTO consolidated_url_endpoints (scope_target_id, id, url, normalized_url, templated_path, domain, path, method, is_direct, status_codes, sources, request_count, first_seen, last_seen, headers, response_headers, probe_status)
             SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::text[], $5::text[], $6::text[], $7::text[], $8::varchar[], $9::bool[], $10::jsonb[], $11::jsonb[], $12::int8[], $13::timestamptz[], $14::timestamptz[], $15::jsonb[], $16::jsonb[], $17::int4[])",
        )
        .bind(scope_target_id)
        .bind(&ids)
        .bind(&urls)
        .bind(&normalized)
        .bind(&templated)
        .bind(&domains)
        .bind(&paths)
        .bind(&methods)
        .bind(&direct)
        .bind(&status_codes)
        .bind(&sources)
        .bind(&request_counts)
        .bind(&first_seen)
        .bind(&last_seen)
        .bind(&headers)
        .bind(&response_headers)
        .bind(&probe_status)
        .execute(&mut *tx)
        .await?;
    }

    let mut param_endpoint_ids = Vec::new();
    let mut param_types = Vec::new();
    let mut param_names = Vec::new();
    let mut param_examples = Vec::new();
    let mut param_frequencies = Vec::new();
    let mut param_truncated = Vec::new();
    for ep in endpoints {
        for p in &ep.parameters {
            param_endpoint_ids.push(ep.id.clone());
            param_types.push(p.location.as_str().to_string());
            param_names.push(p.name.clone());
            param_examples.push(serde_json::to_value(&p.example_values)?);
            param_frequencies.push(p.frequency as i64);
            param_truncated.push(p.values_truncated);
        }
    }
    if !param_endpoint_ids.is_empty() {
        sqlx::query(
            "INSERT INTO consolidated_url_parameters (endpoint_id, param_type, param_name, example_values, frequency, values_truncated)
             SELECT * FROM UNNEST($1::text[], $2::varchar[], $3::text[], $4::jsonb[], $5::int8[], $6::bool[])",
        )
        .bind(&param_endpoint_ids)
        .bind(&param_types)
        .bind(&param_names)
        .bind(&param_examples)
        .bind(&param_frequencies)
        .bind(&param_truncated)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        scope = scope_target_id,
        replaced = deleted,
        endpoints = endpoints.len(),
        parameters = param_endpoint_ids.len(),
        "catalog persisted"
    );
    Ok(())
}

/// Read-only listing: direct endpoints first, then by domain and path.
pub async fn list_catalog(pool: &PgPool, scope_target_id: &str) -> Result<Vec<ConsolidatedEndpoint>> {
    let rows: Vec<EndpointRow> = sqlx::query_as(
        "SELECT id, scope_target_id, url, normalized_url, templated_path, domain, path, method, is_direct,
                status_codes, sources, request_count, first_seen, last_seen, headers, response_headers, probe_status
         FROM consolidated_url_endpoints
         WHERE scope_target_id = $1
         ORDER BY is_direct DESC, domain, path, method",
    )
    .bind(scope_target_id)
    .fetch_all(pool)
    .await?;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let param_rows: Vec<ParameterRow> = sqlx::query_as(
        "SELECT endpoint_id, param_type, param_name, example_values, frequency, values_truncated
         FROM consolidated_url_parameters
         WHERE endpoint_id = ANY($1)
         ORDER BY endpoint_id, param_type, param_name",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut params: HashMap<String, Vec<ConsolidatedParameter>> = HashMap::new();
    for row in param_rows {
        let Some(location) = ParamLocation::parse(&row.param_type) else {
            warn!(endpoint = %row.endpoint_id, param_type = %row.param_type, "unknown parameter location, skipping");
            continue;
        };
        params.entry(row.endpoint_id).or_default().push(ConsolidatedParameter {
            location,
            name: row.param_name,
            example_values: row.example_values.0,
            frequency: row.frequency.max(0) as u64,
            values_truncated: row.values_truncated,
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut parameters = params.remove(&row.id).unwrap_or_default();
            parameters.sort_by(|a, b| (a.location, &a.name).cmp(&(b.location, &b.name)));
            ConsolidatedEndpoint {
                id: row.id,
                scope_target_id: row.scope_target_id,
                url: row.url,
                normalized_url: row.normalized_url,
                templated_path: row.templated_path,
                domain: row.domain,
                path: row.path,
                method: row.method,
                is_direct: row.is_direct,
                status_codes: row.status_codes.0,
                sources: row.sources.0,
                request_count: row.request_count.max(0) as u64,
                first_seen: row.first_seen,
                last_seen: row.last_seen,
                headers: row.headers.0,
                response_headers: row.response_headers.0,
                probe_status: row.probe_status.and_then(|s| u16::try_from(s).ok()),
                parameters,
            }
        })
        .collect())
}
