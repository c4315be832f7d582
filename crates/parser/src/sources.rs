use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Position;

use surfacemap_core::{
    CapturedRequest, ParamLocation, RawObservation, RawParameter, RecordedCapture, ScanError,
    ScopeTarget, SourceScanner, SourceTag,
};

use crate::filters::{classify, FilterStats, Rejection};
use crate::normalize::{extract_query_parameters, host_of, parse_lenient};

/// Raw line-oriented output of a crawler or archive scraper, one URL per
/// line, optionally followed by a status code (`200` or `[200]`).
pub struct UrlListSource {
    path: PathBuf,
    tag: SourceTag,
}

impl UrlListSource {
    pub fn new(path: impl Into<PathBuf>, tag: SourceTag) -> Self {
        Self {
            path: path.into(),
            tag,
        }
    }
}

#[async_trait]
impl SourceScanner for UrlListSource {
    fn tag(&self) -> SourceTag {
        self.tag.clone()
    }

    async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let (observations, stats) = observations_from_lines(&text, &self.tag, target);
        info!(
            source = %self.tag,
            file = %self.path.display(),
            kept = stats.kept,
            images = stats.images,
            static_assets = stats.static_assets,
            invalid = stats.invalid,
            rejected = stats.rejected(),
            "url list loaded"
        );
        Ok(observations)
    }
}

pub fn observations_from_lines(
    text: &str,
    tag: &SourceTag,
    target: &ScopeTarget,
) -> (Vec<RawObservation>, FilterStats) {
    let mut stats = FilterStats::default();
    let mut observations = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(raw_url) = parts.next() else {
            continue;
        };

        // relative paths carry no host to attribute them to
        let host = if raw_url.starts_with('/') {
            None
        } else {
            host_of(raw_url)
        };
        let Some(host) = host else {
            stats.record(Some(Rejection::InvalidPath));
            continue;
        };

        let verdict = classify(raw_url);
        stats.record(verdict);
        if verdict.is_some() {
            continue;
        }

        let mut obs = RawObservation::new(raw_url, tag.clone()).direct(target.is_direct(&host));
        if let Some(status) = parts.next().and_then(parse_status) {
            obs = obs.with_status(status);
        }
        obs.parameters = extract_query_parameters(raw_url);
        observations.push(obs);
    }

    (observations, stats)
}

fn parse_status(token: &str) -> Option<u16> {
    token
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<u16>()
        .ok()
        .filter(|s| (100..600).contains(s))
}

/// Query and body parameters carried by a captured browser request.
pub fn capture_parameters(request: &CapturedRequest) -> Vec<RawParameter> {
    let mut params = extract_query_parameters(&request.url);
    if let Some(body) = request.post_data.as_deref() {
        params.extend(body_parameters(body));
    }
    params
}

/// Top-level fields of a JSON object body, or the pairs of a form-encoded one.
pub fn body_parameters(body: &str) -> Vec<RawParameter> {
    let body = body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    if body.starts_with('{') {
        return match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(body) {
            Ok(fields) => fields
                .iter()
                .map(|(name, value)| {
                    let example = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    RawParameter::new(ParamLocation::Body, name, Some(&example))
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "json body did not parse, ignoring");
                Vec::new()
            }
        };
    }

    if !body.contains('=') {
        return Vec::new();
    }
    let mut seen = BTreeSet::new();
    let mut params = Vec::new();
    for pair in body.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = form_decode(name);
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        params.push(RawParameter::new(ParamLocation::Body, &name, Some(&form_decode(value))));
    }
    params
}

fn form_decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

pub fn capture_to_observation(capture: &RecordedCapture, target: &ScopeTarget) -> RawObservation {
    let request = &capture.request;
    let host = host_of(&request.url).unwrap_or_default();

    let mut obs = RawObservation::new(&request.url, SourceTag::ManualCapture)
        .direct(target.is_direct(&host));
    if !request.method.trim().is_empty() {
        obs = obs.with_method(&request.method);
    }
    if let Some(status) = request.status_code {
        obs = obs.with_status(status);
    }
    obs.headers = request.headers.clone();
    obs.response_headers = request.response_headers.clone();
    obs.parameters = capture_parameters(request);
    obs
}

#[derive(Debug, Deserialize)]
struct BruteforceResult {
    #[serde(default)]
    endpoints: Vec<BruteforceHit>,
}

#[derive(Debug, Deserialize)]
struct BruteforceHit {
    path: String,
    #[serde(default)]
    status: Option<u16>,
}

/// Observations from one directory brute-force run. Paths are taken
/// relative to the origin of `base_url`.
pub fn bruteforce_to_observations(
    base_url: &str,
    result_json: &str,
    target: &ScopeTarget,
) -> Result<Vec<RawObservation>, ScanError> {
    let base = parse_lenient(base_url)
        .ok_or_else(|| ScanError::Decode(format!("invalid brute force base url: {base_url}")))?;
    let result: BruteforceResult =
        serde_json::from_str(result_json).map_err(|e| ScanError::Decode(e.to_string()))?;

    let origin = &base[..Position::BeforePath];
    let host = base.host_str().unwrap_or_default().to_string();
    let is_direct = target.is_direct(&host);

    let mut observations = Vec::with_capacity(result.endpoints.len());
    for hit in result.endpoints {
        let path = hit.path.trim();
        if path.is_empty() {
            warn!(base = %base_url, "brute force hit without a path, skipping");
            continue;
        }
        let url = if path.starts_with('/') {
            format!("{origin}{path}")
        } else {
            format!("{origin}/{path}")
        };
        let mut obs = RawObservation::new(&url, SourceTag::DirectoryBruteforce)
            .with_method("GET")
            .direct(is_direct);
        if let Some(status) = hit.status {
            obs = obs.with_status(status);
        }
        observations.push(obs);
    }
    Ok(observations)
}
