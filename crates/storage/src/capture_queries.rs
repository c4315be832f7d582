use anyhow::Result;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;

use surfacemap_core::{CaptureSession, ParamLocation, RawParameter, RecordedCapture, SessionSummary};
use surfacemap_parser::capture_parameters;

pub async fn insert_session(pool: &PgPool, session: &CaptureSession) -> Result<()> {
    sqlx::query(
        "INSERT INTO manual_crawl_sessions (id, scope_target_id, target_url, status, started_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(session.id)
    .bind(&session.scope_target_id)
    .bind(&session.target_url)
    .bind(session.state().as_str())
    .bind(session.started_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store one capture and bump the owning session's request count.
pub async fn insert_capture(pool: &PgPool, capture: &RecordedCapture) -> Result<()> {
    let request = &capture.request;
    let params = capture_parameters(request);
    let get_params = params_object(&params, ParamLocation::Query);
    let post_params = params_object(&params, ParamLocation::Body);
    let method = if request.method.trim().is_empty() {
        "GET".to_string()
    } else {
        request.method.trim().to_uppercase()
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO manual_crawl_captures (id, session_id, scope_target_id, url, endpoint, method, status_code, headers, response_headers, get_params, post_params, post_data, mime_type, captured_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(capture.id)
    .bind(capture.session_id)
    .bind(&capture.scope_target_id)
    .bind(&request.url)
    .bind(&request.endpoint)
    .bind(&method)
    .bind(request.status_code.map(i32::from))
    .bind(serde_json::to_value(&request.headers)?)
    .bind(serde_json::to_value(&request.response_headers)?)
    .bind(get_params)
    .bind(post_params)
    .bind(&request.post_data)
    .bind(&request.mime_type)
    .bind(capture.timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE manual_crawl_sessions SET request_count = request_count + 1 WHERE id = $1")
        .bind(capture.session_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn complete_session(pool: &PgPool, summary: &SessionSummary) -> Result<()> {
    sqlx::query(
        "UPDATE manual_crawl_sessions
         SET status = 'completed', ended_at = $2, request_count = $3, endpoint_count = $4
         WHERE id = $1",
    )
    .bind(summary.session_id)
    .bind(summary.ended_at)
    .bind(summary.request_count as i32)
    .bind(summary.endpoint_count as i32)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn cleanup_stale_sessions(pool: &PgPool, stale_after_seconds: i64) -> Result<u64> {
    let closed = sqlx::query(
        "UPDATE manual_crawl_sessions
         SET status = 'completed', ended_at = NOW()
         WHERE status = 'active'
           AND request_count = 0
           AND started_at < NOW() - ($1::bigint * INTERVAL '1 second')",
    )
    .bind(stale_after_seconds)
    .execute(pool)
    .await?
    .rows_affected();

    if closed > 0 {
        info!(closed, "stale capture sessions closed");
    }
    Ok(closed)
}

/// `{name: example}` for the parameters at one location; first value wins.
fn params_object(params: &[RawParameter], location: ParamLocation) -> Value {
    let mut object = Map::new();
    for p in params.iter().filter(|p| p.location == location) {
        if !object.contains_key(&p.name) {
            let value = p.example_value.clone().map(Value::String).unwrap_or(Value::Null);
            object.insert(p.name.clone(), value);
        }
    }
    Value::Object(object)
}
