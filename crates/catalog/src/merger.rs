use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use surfacemap_core::config::ConsolidationConfig;
use surfacemap_core::{ConsolidatedEndpoint, ParamLocation, RawObservation, ScopeTarget};
use surfacemap_discovery::{Template, TemplateDetector};
use surfacemap_parser::{normalize, parse_lenient};

use crate::parameters::{record_parameter, sort_parameters};

/// Deterministic endpoint id for `(scope target, normalized url, method)`.
pub fn endpoint_id(scope_target_id: &str, normalized_url: &str, method: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope_target_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_url.as_bytes());
    hasher.update(b"|");
    hasher.update(method.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An observation with its merge key parts computed once.
struct Keyed {
    normalized: String,
    method: String,
    obs: RawObservation,
}

/// Builds the endpoint catalog for one scope target from raw observations.
pub struct Consolidator {
    detector: TemplateDetector,
    max_example_values: usize,
}

impl Consolidator {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            detector: TemplateDetector::new(config),
            max_example_values: config.max_example_values,
        }
    }

    pub fn merge(
        &self,
        target: &ScopeTarget,
        observations: Vec<RawObservation>,
    ) -> Vec<ConsolidatedEndpoint> {
        self.merge_at(target, observations, Utc::now())
    }

    /// Same as [`merge`](Self::merge) with an explicit merge clock.
    pub fn merge_at(
        &self,
        target: &ScopeTarget,
        observations: Vec<RawObservation>,
        now: DateTime<Utc>,
    ) -> Vec<ConsolidatedEndpoint> {
        let total = observations.len();
        let mut keyed: Vec<Keyed> = observations
            .into_iter()
            .map(|obs| Keyed {
                normalized: normalize(&obs.url),
                method: obs.effective_method(),
                obs,
            })
            .collect();

        keyed.sort_by(merge_order);

        // URLs go in merge order so a URL reported with conflicting
        // direct flags is templated under the first one.
        let templates = self
            .detector
            .templates_for(keyed.iter().map(|k| (k.normalized.as_str(), k.obs.is_direct)));

        let mut catalog: BTreeMap<(String, String), ConsolidatedEndpoint> = BTreeMap::new();
        for item in &keyed {
            let fallback;
            let template = match templates.get(&item.normalized) {
                Some(t) => t,
                None => {
                    fallback = Template {
                        normalized_url: item.normalized.clone(),
                        templated_path: String::new(),
                        path_params: Vec::new(),
                    };
                    &fallback
                }
            };
            self.fold(&mut catalog, target, item, template, now);
        }

        let mut endpoints: Vec<ConsolidatedEndpoint> = catalog.into_values().collect();
        for endpoint in &mut endpoints {
            sort_parameters(&mut endpoint.parameters);
        }

        info!(
            scope = %target.id,
            observations = total,
            endpoints = endpoints.len(),
            "observations merged"
        );
        endpoints
    }

    fn fold(
        &self,
        catalog: &mut BTreeMap<(String, String), ConsolidatedEndpoint>,
        target: &ScopeTarget,
        item: &Keyed,
        template: &Template,
        now: DateTime<Utc>,
    ) {
        let key = (template.normalized_url.clone(), item.method.clone());
        let obs = &item.obs;

        let endpoint = catalog.entry(key).or_insert_with(|| {
            let parsed = parse_lenient(&item.normalized);
            let domain = parsed
                .as_ref()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();
            let path = parsed
                .as_ref()
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            let templated_path = if template.templated_path.is_empty() {
                path.clone()
            } else {
                template.templated_path.clone()
            };
            debug!(url = %template.normalized_url, method = %item.method, source = %obs.source, "new endpoint");

            ConsolidatedEndpoint {
                id: endpoint_id(&target.id, &template.normalized_url, &item.method),
                scope_target_id: target.id.clone(),
                url: item.normalized.clone(),
                normalized_url: template.normalized_url.clone(),
                templated_path,
                domain,
                path,
                method: item.method.clone(),
                is_direct: obs.is_direct,
                status_codes: BTreeSet::new(),
                sources: BTreeSet::new(),
                request_count: 0,
                first_seen: now,
                last_seen: now,
                headers: BTreeMap::new(),
                response_headers: BTreeMap::new(),
                probe_status: None,
                parameters: Vec::new(),
            }
        });

        if let Some(status) = obs.status_code {
            endpoint.status_codes.insert(status);
        }
        endpoint.sources.insert(obs.source.clone());
        endpoint.request_count += 1;
        endpoint.last_seen = now;

        // header maps are taken from the first observation that carries any
        if endpoint.headers.is_empty() {
            endpoint.headers = obs.headers.clone();
        }
        if endpoint.response_headers.is_empty() {
            endpoint.response_headers = obs.response_headers.clone();
        }

        // a templated endpoint derives its path parameters from the template
        let templated = !template.path_params.is_empty();
        let observed = obs
            .parameters
            .iter()
            .filter(|p| !(templated && p.location == ParamLocation::Path));
        for raw in observed.chain(template.path_params.iter()) {
            record_parameter(&mut endpoint.parameters, raw, self.max_example_values);
        }
    }
}

/// Merge order: source precedence first, then every field that feeds the
/// fold, so observations that compare equal fold identically and input order
/// never shows in the catalog.
fn merge_order(a: &Keyed, b: &Keyed) -> Ordering {
    a.obs
        .source
        .precedence()
        .cmp(&b.obs.source.precedence())
        .then_with(|| a.normalized.cmp(&b.normalized))
        .then_with(|| a.method.cmp(&b.method))
        .then_with(|| a.obs.source.as_str().cmp(b.obs.source.as_str()))
        .then_with(|| a.obs.status_code.cmp(&b.obs.status_code))
        .then_with(|| a.obs.url.cmp(&b.obs.url))
        .then_with(|| a.obs.is_direct.cmp(&b.obs.is_direct))
        .then_with(|| a.obs.parameters.cmp(&b.obs.parameters))
        .then_with(|| a.obs.headers.cmp(&b.obs.headers))
        .then_with(|| a.obs.response_headers.cmp(&b.obs.response_headers))
}

/// Annotate endpoints with probe results keyed by endpoint id. Observed
/// status codes are left as the sources reported them.
pub fn apply_probe_statuses(endpoints: &mut [ConsolidatedEndpoint], statuses: &BTreeMap<String, u16>) {
    for endpoint in endpoints.iter_mut() {
        if let Some(&status) = statuses.get(&endpoint.id) {
            endpoint.probe_status = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use surfacemap_core::{CaptureSession, CapturedRequest, RawParameter, SourceTag};
    use surfacemap_parser::sources::observations_from_lines;
    use surfacemap_parser::{bruteforce_to_observations, capture_to_observation};

    fn target() -> ScopeTarget {
        ScopeTarget::new("scope-1", "example.com")
    }

    fn consolidator() -> Consolidator {
        Consolidator::new(&ConsolidationConfig::default())
    }

    fn tool(url: &str) -> RawObservation {
        RawObservation::new(url, SourceTag::tool("katana")).direct(true)
    }

    #[test]
    fn test_equivalent_urls_merge() {
        let obs = vec![
            tool("https://example.com/a/b").with_status(200),
            tool("https://example.com/a/b/").with_status(301),
            tool("HTTPS://Example.com./a/b/"),
        ];
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.normalized_url, "https://example.com/a/b");
        assert_eq!(ep.request_count, 3);
        assert_eq!(ep.status_codes, BTreeSet::from([200, 301]));
        assert_eq!(ep.method, "GET");
    }

    #[test]
    fn test_method_splits_endpoints() {
        let obs = vec![
            tool("https://example.com/login"),
            tool("https://example.com/login").with_method("post"),
        ];
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 2);
        assert_ne!(endpoints[0].id, endpoints[1].id);
    }

    #[test]
    fn test_sources_union_keeps_first_identity() {
        let obs = vec![
            RawObservation::new("https://example.com/login", SourceTag::ManualCapture)
                .direct(true)
                .with_status(302),
            tool("https://example.com/login/").with_status(200),
        ];
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        let tags: Vec<String> = ep.sources.iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, vec!["katana", "manual_crawl"]);
        assert_eq!(ep.status_codes, BTreeSet::from([200, 302]));
        assert_eq!(ep.path, "/login");
        assert!(ep.is_direct);
    }

    #[test]
    fn test_template_group_collapses_with_path_params() {
        let obs: Vec<_> = [101, 202, 303, 404, 505]
            .iter()
            .map(|id| tool(&format!("https://example.com/users/{id}/profile")))
            .collect();
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.normalized_url, "https://example.com/users/{id}/profile");
        assert_eq!(ep.templated_path, "/users/{id}/profile");
        assert_eq!(ep.url, "https://example.com/users/101/profile");
        assert_eq!(ep.request_count, 5);

        let param = ep.parameter(ParamLocation::Path, "path_param_1").unwrap();
        assert_eq!(param.frequency, 5);
        assert_eq!(param.example_values.len(), 5);
    }

    #[test]
    fn test_small_group_stays_literal() {
        let obs = vec![
            tool("https://example.com/users/101/profile"),
            tool("https://example.com/users/202/profile"),
        ];
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|e| !e.normalized_url.contains("{id}")));
    }

    #[test]
    fn test_query_parameter_frequency() {
        let obs: Vec<_> = (0..3)
            .map(|_| {
                tool("https://example.com/search?q=foo")
                    .with_parameter(RawParameter::new(ParamLocation::Query, "q", Some("foo")))
            })
            .collect();
        let endpoints = consolidator().merge(&target(), obs);
        let param = endpoints[0].parameter(ParamLocation::Query, "q").unwrap();
        assert_eq!(param.frequency, 3);
        assert_eq!(param.example_values, vec!["foo"]);
    }

    fn with_header(mut obs: RawObservation, name: &str, value: &str) -> RawObservation {
        obs.headers.insert(name.to_string(), value.to_string());
        obs
    }

    fn lines(text: &str, tool: &str) -> Vec<RawObservation> {
        observations_from_lines(text, &SourceTag::tool(tool), &target()).0
    }

    fn catalog_json(obs: Vec<RawObservation>) -> serde_json::Value {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        serde_json::to_value(consolidator().merge_at(&target(), obs, now)).unwrap()
    }

    #[test]
    fn test_order_independent_and_idempotent() {
        let mut obs = lines(
            "https://example.com/a?x=1\n\
             https://example.com/a?x=2&y=3\n\
             https://api.example.com/v1/items/9f8e7d6c\n\
             https://example.com/b 404\n",
            "katana",
        );
        obs.push(with_header(tool("https://example.com/a/"), "accept", "text/html"));
        obs.push(with_header(tool("https://example.com/a"), "accept", "application/json"));
        obs.push(RawObservation::new("https://example.com/a", SourceTag::DirectoryBruteforce).with_status(403));
        obs.push(RawObservation::new("https://example.com/b", SourceTag::ManualCapture));

        let mut reversed = obs.clone();
        reversed.reverse();
        let mut rotated = obs.clone();
        rotated.rotate_left(3);

        let first = catalog_json(obs.clone());
        assert_eq!(first, catalog_json(reversed));
        assert_eq!(first, catalog_json(rotated));
        assert_eq!(first, catalog_json(obs));

        let endpoints: Vec<ConsolidatedEndpoint> = serde_json::from_value(first).unwrap();
        let subdomain = endpoints.iter().find(|e| e.domain == "api.example.com").unwrap();
        assert!(!subdomain.is_direct);
    }

    #[test]
    fn test_tied_observations_fold_in_url_order() {
        let a = with_header(
            tool("https://example.com/s?q=a").with_parameter(RawParameter::new(ParamLocation::Query, "q", Some("a"))),
            "x",
            "from-a",
        );
        let b = with_header(
            tool("https://example.com/s?q=b").with_parameter(RawParameter::new(ParamLocation::Query, "q", Some("b"))),
            "x",
            "from-b",
        );

        let forward = catalog_json(vec![a.clone(), b.clone()]);
        assert_eq!(forward, catalog_json(vec![b, a]));

        let endpoints: Vec<ConsolidatedEndpoint> = serde_json::from_value(forward).unwrap();
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.url, "https://example.com/s");
        assert_eq!(ep.headers.get("x").map(String::as_str), Some("from-a"));
        let q = ep.parameter(ParamLocation::Query, "q").unwrap();
        assert_eq!(q.example_values, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reported_path_parameters_are_not_double_counted() {
        let obs: Vec<_> = [101, 202, 303]
            .iter()
            .map(|id| {
                tool(&format!("https://example.com/users/{id}/profile")).with_parameter(RawParameter::new(
                    ParamLocation::Path,
                    "path_param_1",
                    Some(&id.to_string()),
                ))
            })
            .collect();
        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.request_count, 3);
        assert_eq!(ep.parameters.len(), 1);
        let param = ep.parameter(ParamLocation::Path, "path_param_1").unwrap();
        assert_eq!(param.frequency, 3);
        assert_eq!(param.example_values.len(), 3);
    }

    #[test]
    fn test_conflicting_direct_flag_keeps_one_endpoint() {
        let mut obs: Vec<_> = [101, 202, 303]
            .iter()
            .map(|id| RawObservation::new(&format!("https://example.com/item/{id}"), SourceTag::tool("katana")))
            .collect();
        obs.push(RawObservation::new("https://example.com/item/101", SourceTag::ManualCapture).direct(true));

        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.normalized_url, "https://example.com/item/{id}");
        assert_eq!(ep.request_count, 4);
        assert!(!ep.is_direct);
        assert_eq!(ep.parameter(ParamLocation::Path, "path_param_1").unwrap().frequency, 4);
    }

    #[test]
    fn test_equivalent_spellings_from_a_url_list() {
        let obs = lines(
            "https://Example.com/account/\n\
             example.com/account?tab=billing\n\
             https://example.com./account#top\n\
             https://EXAMPLE.COM/account 200\n",
            "katana",
        );
        let endpoints = consolidator().merge(&target(), obs);

        assert_eq!(endpoints.len(), 1);
        let ep = &endpoints[0];
        assert_eq!(ep.normalized_url, "https://example.com/account");
        assert_eq!(ep.request_count, 4);
        assert!(ep.is_direct);
        assert!(ep.status_codes.contains(&200));
        assert!(ep.parameter(ParamLocation::Query, "tab").is_some());
    }

    #[test]
    fn test_sources_union_across_tools_capture_and_bruteforce() {
        let mut obs = lines("https://example.com/admin\n", "katana");

        let mut session = CaptureSession::start("scope-1", "https://example.com/");
        let request: CapturedRequest = serde_json::from_value(serde_json::json!({
            "url": "https://example.com/admin?view=users",
            "endpoint": "/admin",
            "method": "get",
            "statusCode": 403,
            "headers": {"accept": "text/html"}
        }))
        .unwrap();
        let capture = session.record(request).unwrap();
        obs.push(capture_to_observation(&capture, &target()));

        obs.extend(
            bruteforce_to_observations(
                "https://example.com",
                r#"{"endpoints": [{"path": "admin", "status": 401}, {"path": "/backup", "status": 200}]}"#,
                &target(),
            )
            .unwrap(),
        );

        let endpoints = consolidator().merge(&target(), obs);
        assert_eq!(endpoints.len(), 2);

        let admin = endpoints.iter().find(|e| e.path == "/admin").unwrap();
        assert_eq!(admin.request_count, 3);
        assert_eq!(
            admin.sources.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["katana", "manual_crawl", "ffuf"]
        );
        assert_eq!(admin.status_codes, BTreeSet::from([401, 403]));
        assert_eq!(admin.headers.get("accept").map(String::as_str), Some("text/html"));

        let backup = endpoints.iter().find(|e| e.path == "/backup").unwrap();
        assert_eq!(backup.sources.len(), 1);
    }

    #[test]
    fn test_apply_probe_statuses() {
        let mut endpoints = consolidator().merge(&target(), vec![tool("https://example.com/a"), tool("https://example.com/b")]);
        let statuses = BTreeMap::from([
            (endpoints[0].id.clone(), 200u16),
            (endpoints[1].id.clone(), 0u16),
        ]);
        apply_probe_statuses(&mut endpoints, &statuses);
        assert_eq!(endpoints[0].probe_status, Some(200));
        assert!(endpoints[0].status_codes.is_empty());
        assert_eq!(endpoints[1].probe_status, Some(0));
        assert!(endpoints[1].status_codes.is_empty());
    }

    #[test]
    fn test_endpoint_id_is_stable() {
        let a = endpoint_id("1", "https://example.com/a", "GET");
        assert_eq!(a, endpoint_id("1", "https://example.com/a", "GET"));
        assert_ne!(a, endpoint_id("2", "https://example.com/a", "GET"));
        assert_eq!(a.len(), 64);
    }
}
