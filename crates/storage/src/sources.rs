use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use surfacemap_core::{
    ParamLocation, RawObservation, RawParameter, ScanError, ScopeTarget, SourceScanner, SourceTag,
};
use surfacemap_parser::{bruteforce_to_observations, host_of};

use crate::Storage;

type DiscoveredRow = (i64, String, Option<i32>, Option<String>, Option<String>, Option<String>);
type CaptureRow = (String, String, Option<i32>, Value, Value, Value, Value);

fn query_error(e: sqlx::Error) -> ScanError {
    ScanError::Query(e.to_string())
}

/// Stored status codes use 0 for "never answered"; that is unknown here.
fn status_from_db(status: Option<i32>) -> Option<u16> {
    status.and_then(|s| u16::try_from(s).ok()).filter(|s| *s != 0)
}

/// Endpoints recorded by one automated crawler or archive scraper.
pub struct DiscoveredEndpointSource {
    storage: Storage,
    tool: String,
}

impl DiscoveredEndpointSource {
    pub fn new(storage: Storage, tool: &str) -> Self {
        Self {
            storage,
            tool: tool.to_string(),
        }
    }
}

#[async_trait]
impl SourceScanner for DiscoveredEndpointSource {
    fn tag(&self) -> SourceTag {
        SourceTag::tool(&self.tool)
    }

    async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError> {
        let rows: Vec<DiscoveredRow> = sqlx::query_as(
            "SELECT e.id, e.url, e.status_code, p.param_type, p.param_name, p.example_value
             FROM discovered_endpoints e
             LEFT JOIN endpoint_parameters p ON p.endpoint_id = e.id
             WHERE e.scope_target_id = $1 AND e.scan_type = $2
             ORDER BY e.id, p.id",
        )
        .bind(&target.id)
        .bind(&self.tool)
        .fetch_all(self.storage.pool())
        .await
        .map_err(query_error)?;

        let (observations, skipped) = fold_discovered_rows(rows, &self.tag(), target);
        info!(source = %self.tool, observations = observations.len(), skipped, "discovered endpoints loaded");
        Ok(observations)
    }
}

/// Collapse joined endpoint/parameter rows (ordered by endpoint id) into one
/// observation per endpoint. Returns the observations and the number of
/// records skipped because they did not decode.
fn fold_discovered_rows(
    rows: Vec<DiscoveredRow>,
    tag: &SourceTag,
    target: &ScopeTarget,
) -> (Vec<RawObservation>, usize) {
    let mut observations: Vec<RawObservation> = Vec::new();
    let mut current: Option<i64> = None;
    let mut skipped = 0usize;
    let mut skipping = false;

    for (id, url, status, param_type, param_name, example) in rows {
        if current != Some(id) {
            current = Some(id);
            let Some(host) = host_of(&url) else {
                warn!(endpoint = id, url = %url, "discovered endpoint has no host, skipping");
                skipped += 1;
                skipping = true;
                continue;
            };
            skipping = false;
            let mut obs = RawObservation::new(&url, tag.clone()).direct(target.is_direct(&host));
            obs.status_code = status_from_db(status);
            observations.push(obs);
        }
        if skipping {
            continue;
        }

        let (Some(param_type), Some(name)) = (param_type, param_name) else {
            continue;
        };
        let location = match ParamLocation::parse(&param_type) {
            // path parameters come from templating, not from the crawler
            Some(ParamLocation::Path) => continue,
            Some(location) => location,
            None => {
                warn!(endpoint = id, param_type = %param_type, "unknown parameter type, skipping");
                skipped += 1;
                continue;
            }
        };
        if let Some(obs) = observations.last_mut() {
            obs.parameters.push(RawParameter::new(location, &name, example.as_deref()));
        }
    }
    (observations, skipped)
}

/// Requests captured through the browser extension, across all sessions.
pub struct ManualCaptureSource {
    storage: Storage,
}

impl ManualCaptureSource {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SourceScanner for ManualCaptureSource {
    fn tag(&self) -> SourceTag {
        SourceTag::ManualCapture
    }

    async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError> {
        let rows: Vec<CaptureRow> = sqlx::query_as(
            "SELECT url, method, status_code, headers, response_headers, get_params, post_params
             FROM manual_crawl_captures
             WHERE scope_target_id = $1
             ORDER BY captured_at, id",
        )
        .bind(&target.id)
        .fetch_all(self.storage.pool())
        .await
        .map_err(query_error)?;

        let total = rows.len();
        let observations: Vec<RawObservation> = rows
            .into_iter()
            .filter_map(|row| capture_row_to_observation(row, target))
            .collect();
        info!(
            observations = observations.len(),
            skipped = total - observations.len(),
            "manual captures loaded"
        );
        Ok(observations)
    }
}

fn capture_row_to_observation(row: CaptureRow, target: &ScopeTarget) -> Option<RawObservation> {
    let (url, method, status, headers, response_headers, get_params, post_params) = row;
    let Some(host) = host_of(&url) else {
        warn!(url = %url, "captured request has no host, skipping");
        return None;
    };

    let mut obs = RawObservation::new(&url, SourceTag::ManualCapture)
        .with_method(&method)
        .direct(target.is_direct(&host));
    obs.status_code = status_from_db(status);
    obs.headers = string_map(headers);
    obs.response_headers = string_map(response_headers);
    obs.parameters = object_parameters(get_params, ParamLocation::Query);
    obs.parameters
        .extend(object_parameters(post_params, ParamLocation::Body));
    Some(obs)
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn string_map(value: Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, value_to_string(v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn object_parameters(value: Value, location: ParamLocation) -> Vec<RawParameter> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(name, v)| {
                let example = match v {
                    Value::Null => None,
                    other => Some(value_to_string(other)),
                };
                RawParameter::new(location, &name, example.as_deref())
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Hits of the most recent successful directory brute-force run. Optional:
/// a failure here is logged and the run continues without it.
pub struct BruteforceSource {
    storage: Storage,
}

impl BruteforceSource {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SourceScanner for BruteforceSource {
    fn tag(&self) -> SourceTag {
        SourceTag::DirectoryBruteforce
    }

    fn required(&self) -> bool {
        false
    }

    async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT url, result FROM ffuf_url_scans
             WHERE scope_target_id = $1 AND status = 'success'
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(&target.id)
        .fetch_optional(self.storage.pool())
        .await
        .map_err(query_error)?;

        let Some((base_url, Some(result))) = row else {
            info!(scope = %target.id, "no successful brute force run");
            return Ok(Vec::new());
        };
        let observations = bruteforce_to_observations(&base_url, &result, target)?;
        info!(observations = observations.len(), base = %base_url, "brute force results loaded");
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> ScopeTarget {
        ScopeTarget::new("scope-1", "example.com")
    }

    #[test]
    fn test_status_zero_is_unknown() {
        assert_eq!(status_from_db(Some(0)), None);
        assert_eq!(status_from_db(Some(200)), Some(200));
        assert_eq!(status_from_db(Some(-1)), None);
        assert_eq!(status_from_db(None), None);
    }

    #[test]
    fn test_fold_joined_rows() {
        let some = |s: &str| Some(s.to_string());
        let rows = vec![
            (1, "https://example.com/a?x=1".to_string(), Some(200), some("query"), some("x"), some("1")),
            (1, "https://example.com/a?x=1".to_string(), Some(200), some("query"), some("y"), None),
            (2, "https://api.example.com/b".to_string(), Some(0), None, None, None),
            (3, "   ".to_string(), None, some("query"), some("z"), None),
            (4, "https://example.com/c".to_string(), None, some("cookie"), some("sid"), None),
        ];
        let (obs, skipped) = fold_discovered_rows(rows, &SourceTag::tool("katana"), &target());

        assert_eq!(obs.len(), 3);
        assert_eq!(skipped, 2);
        assert_eq!(obs[0].parameters.len(), 2);
        assert!(obs[0].is_direct);
        assert_eq!(obs[0].status_code, Some(200));
        assert!(!obs[1].is_direct);
        assert_eq!(obs[1].status_code, None);
        assert!(obs[2].parameters.is_empty());
    }

    #[test]
    fn test_stored_path_parameters_are_not_forwarded() {
        let some = |s: &str| Some(s.to_string());
        let rows = vec![
            (7, "https://example.com/users/101/profile".to_string(), None, some("path"), some("path_param_1"), some("101")),
            (7, "https://example.com/users/101/profile".to_string(), None, some("query"), some("tab"), some("bio")),
        ];
        let (obs, skipped) = fold_discovered_rows(rows, &SourceTag::tool("katana"), &target());

        assert_eq!(skipped, 0);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].parameters.len(), 1);
        assert_eq!(obs[0].parameters[0].location, ParamLocation::Query);
    }

    #[test]
    fn test_capture_row_decodes_json_columns() {
        let row = (
            "https://example.com/login".to_string(),
            "POST".to_string(),
            Some(302),
            json!({"accept": "*/*", "x-count": 3}),
            json!(null),
            json!({"next": "/home"}),
            json!({"user": "alice", "token": null}),
        );
        let obs = capture_row_to_observation(row, &target()).unwrap();
        assert_eq!(obs.effective_method(), "POST");
        assert_eq!(obs.headers.get("x-count").map(String::as_str), Some("3"));
        assert!(obs.response_headers.is_empty());
        assert_eq!(obs.parameters.len(), 3);
        let token = obs.parameters.iter().find(|p| p.name == "token").unwrap();
        assert_eq!(token.location, ParamLocation::Body);
        assert_eq!(token.example_value, None);
    }
}
