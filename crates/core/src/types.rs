use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

use crate::error::ScanError;

/// Every upstream producer of observations implements this.
///
/// The consolidation run only ever sees the observations a scanner returns;
/// how the underlying tool was invoked (container, file import, database
/// table) stays behind this trait.
#[async_trait]
pub trait SourceScanner: Send + Sync {
    fn tag(&self) -> SourceTag;

    async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError>;

    /// Whether a failure of this scanner aborts the whole consolidation run.
    /// Optional scanners are logged and skipped instead.
    fn required(&self) -> bool {
        true
    }
}

/// Which scanner or capture mechanism produced an observation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SourceTag {
    /// Automated crawler or archive scraper, by tool name (katana, gau, ...).
    Tool(String),
    ManualCapture,
    DirectoryBruteforce,
}

impl SourceTag {
    pub fn tool(name: &str) -> Self {
        SourceTag::Tool(name.to_lowercase())
    }

    /// Merge order: automated tools first, then manual capture, then
    /// directory brute forcing. Later tiers only add to existing records.
    pub fn precedence(&self) -> u8 {
        match self {
            SourceTag::Tool(_) => 0,
            SourceTag::ManualCapture => 1,
            SourceTag::DirectoryBruteforce => 2,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceTag::Tool(name) => name,
            SourceTag::ManualCapture => "manual_crawl",
            SourceTag::DirectoryBruteforce => "ffuf",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SourceTag {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "manual_crawl" | "manual_capture" => SourceTag::ManualCapture,
            "ffuf" | "directory_bruteforce" => SourceTag::DirectoryBruteforce,
            other => SourceTag::Tool(other.to_string()),
        }
    }
}

impl From<String> for SourceTag {
    fn from(value: String) -> Self {
        SourceTag::from(value.as_str())
    }
}

impl From<SourceTag> for String {
    fn from(tag: SourceTag) -> Self {
        tag.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Body,
    Path,
}

impl ParamLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Body => "body",
            ParamLocation::Path => "path",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(ParamLocation::Query),
            "body" => Some(ParamLocation::Body),
            "path" => Some(ParamLocation::Path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawParameter {
    pub location: ParamLocation,
    pub name: String,
    pub example_value: Option<String>,
}

impl RawParameter {
    pub fn new(location: ParamLocation, name: &str, example_value: Option<&str>) -> Self {
        Self {
            location,
            name: name.to_string(),
            example_value: example_value.map(str::to_string),
        }
    }
}

/// One (url, method) sighting from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    pub source: SourceTag,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub is_direct: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
}

impl RawObservation {
    pub fn new(url: &str, source: SourceTag) -> Self {
        Self {
            url: url.to_string(),
            method: None,
            source,
            status_code: None,
            is_direct: false,
            headers: BTreeMap::new(),
            response_headers: BTreeMap::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn direct(mut self, is_direct: bool) -> Self {
        self.is_direct = is_direct;
        self
    }

    pub fn with_parameter(mut self, parameter: RawParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Upper-cased method, `GET` when the source did not supply one.
    pub fn effective_method(&self) -> String {
        match self.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_uppercase(),
            _ => "GET".to_string(),
        }
    }
}

/// The scope a consolidation run is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTarget {
    pub id: String,
    pub root_domain: String,
}

impl ScopeTarget {
    pub fn new(id: &str, root_domain: &str) -> Self {
        Self {
            id: id.to_string(),
            root_domain: canonical_host(root_domain),
        }
    }

    /// Build from the stored scope target string, which is either a bare
    /// domain or a full URL.
    pub fn from_stored(id: &str, scope_target: &str) -> Self {
        let trimmed = scope_target.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            if let Some(host) = Url::parse(trimmed).ok().and_then(|u| u.host_str().map(str::to_string)) {
                return Self::new(id, &host);
            }
        }
        Self::new(id, trimmed)
    }

    pub fn is_direct(&self, host: &str) -> bool {
        !host.is_empty() && canonical_host(host) == self.root_domain
    }
}

fn canonical_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_lowercase()
}

/// Aggregated parameter occurrence under one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedParameter {
    pub location: ParamLocation,
    pub name: String,
    pub example_values: Vec<String>,
    pub frequency: u64,
    /// Set once a distinct example value was dropped because the cap was hit.
    #[serde(default)]
    pub values_truncated: bool,
}

/// The merged, canonical record for one (normalized URL, method).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedEndpoint {
    pub id: String,
    pub scope_target_id: String,
    /// Concrete URL of the first contributing observation.
    pub url: String,
    pub normalized_url: String,
    pub templated_path: String,
    pub domain: String,
    pub path: String,
    pub method: String,
    pub is_direct: bool,
    pub status_codes: BTreeSet<u16>,
    pub sources: BTreeSet<SourceTag>,
    pub request_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    /// Result of the liveness probe; `Some(0)` means unreachable.
    #[serde(default)]
    pub probe_status: Option<u16>,
    pub parameters: Vec<ConsolidatedParameter>,
}

impl ConsolidatedEndpoint {
    pub fn parameter(&self, location: ParamLocation, name: &str) -> Option<&ConsolidatedParameter> {
        self.parameters
            .iter()
            .find(|p| p.location == location && p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_round_trips_datastore_names() {
        assert_eq!(SourceTag::from("manual_crawl"), SourceTag::ManualCapture);
        assert_eq!(SourceTag::from("manual_capture"), SourceTag::ManualCapture);
        assert_eq!(SourceTag::from("directory_bruteforce"), SourceTag::DirectoryBruteforce);
        assert_eq!(SourceTag::from("Katana"), SourceTag::tool("katana"));
        assert_eq!(SourceTag::ManualCapture.to_string(), "manual_crawl");

        let json = serde_json::to_string(&SourceTag::tool("gau")).unwrap();
        assert_eq!(json, "\"gau\"");
    }

    #[test]
    fn test_precedence_orders_tools_before_manual_before_bruteforce() {
        assert!(SourceTag::tool("katana").precedence() < SourceTag::ManualCapture.precedence());
        assert!(SourceTag::ManualCapture.precedence() < SourceTag::DirectoryBruteforce.precedence());
    }

    #[test]
    fn test_effective_method_defaults_to_get() {
        let obs = RawObservation::new("https://example.com", SourceTag::tool("gau"));
        assert_eq!(obs.effective_method(), "GET");
        assert_eq!(obs.with_method(" post ").effective_method(), "POST");
    }

    #[test]
    fn test_scope_target_from_url_and_bare_domain() {
        let from_url = ScopeTarget::from_stored("1", "https://Example.com/app");
        assert_eq!(from_url.root_domain, "example.com");
        assert!(from_url.is_direct("EXAMPLE.com."));
        assert!(!from_url.is_direct("api.example.com"));

        let bare = ScopeTarget::from_stored("2", "example.org");
        assert!(bare.is_direct("example.org"));
        assert!(!bare.is_direct(""));
    }
}
