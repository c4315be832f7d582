use std::collections::BTreeSet;

use url::{Position, Url};

use surfacemap_core::{ParamLocation, RawParameter};

/// Canonical form of an observed URL, used as the merge key.
///
/// Never fails: input that does not parse comes back trimmed, minus a
/// trailing slash.
pub fn normalize(raw: &str) -> String {
    let mut trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_suffix('.') {
        trimmed = stripped;
    }

    let Some(mut url) = parse_lenient(trimmed) else {
        return trimmed.strip_suffix('/').unwrap_or(trimmed).to_string();
    };

    if let Some(host) = url.host_str() {
        if host.ends_with('.') {
            let bare = host.trim_end_matches('.').to_string();
            // ignore: an unsettable host keeps the dotted form
            let _ = url.set_host(Some(&bare));
        }
    }
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path();
    let path = if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        "/"
    };

    format!("{}{}", &url[..Position::BeforePath], path)
}

/// Parse with an `https://` default when the input carries no scheme.
pub fn parse_lenient(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if has_scheme(raw) {
        Url::parse(raw).ok()
    } else {
        Url::parse(&format!("https://{raw}")).ok()
    }
}

fn has_scheme(raw: &str) -> bool {
    match raw.find("://") {
        Some(idx) if idx > 0 => {
            let scheme = &raw[..idx];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

pub fn host_of(raw: &str) -> Option<String> {
    parse_lenient(raw).and_then(|u| {
        u.host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
            .filter(|h| !h.is_empty())
    })
}

/// Non-empty path segments; the root path has none.
pub fn path_segments(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(str::to_string).collect()
}

/// Split a normalized URL into `(origin, path)`. Strings that do not parse
/// are treated as a bare path-less origin.
pub fn split_origin(normalized: &str) -> (String, String) {
    match Url::parse(normalized) {
        Ok(url) => (
            url[..Position::BeforePath].to_string(),
            url.path().to_string(),
        ),
        Err(_) => (normalized.to_string(), "/".to_string()),
    }
}

/// Query parameters of `raw`, first value per name, in order of appearance.
pub fn extract_query_parameters(raw: &str) -> Vec<RawParameter> {
    let Some(url) = parse_lenient(raw) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    let mut params = Vec::new();
    for (name, value) in url.query_pairs() {
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        params.push(RawParameter::new(ParamLocation::Query, &name, Some(&value)));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_equivalent_forms() {
        let expected = "https://example.com/a/b";
        assert_eq!(normalize("https://example.com/a/b"), expected);
        assert_eq!(normalize("https://example.com/a/b/"), expected);
        assert_eq!(normalize("  HTTPS://Example.com./a/b/  "), expected);
        assert_eq!(normalize("example.com/a/b?x=1#frag"), expected);
    }

    #[test]
    fn test_normalize_root_keeps_single_slash() {
        assert_eq!(normalize("https://example.com"), "https://example.com/");
        assert_eq!(normalize("https://example.com/"), "https://example.com/");
        assert_eq!(normalize("example.com."), "https://example.com/");
    }

    #[test]
    fn test_normalize_keeps_port_and_scheme() {
        assert_eq!(normalize("http://example.com:8080/x/"), "http://example.com:8080/x");
        assert_eq!(normalize("https://example.com:443/x"), "https://example.com/x");
    }

    #[test]
    fn test_normalize_unparsable_falls_back() {
        assert_eq!(normalize("http://[bad/"), "http://[bad");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_path_segments() {
        assert!(path_segments("/").is_empty());
        assert_eq!(path_segments("/users/42/profile"), vec!["users", "42", "profile"]);
    }

    #[test]
    fn test_split_origin() {
        let (origin, path) = split_origin("https://api.example.com/v1/items");
        assert_eq!(origin, "https://api.example.com");
        assert_eq!(path, "/v1/items");
    }

    #[test]
    fn test_query_parameters_first_value_wins() {
        let params = extract_query_parameters("https://example.com/s?q=foo&page=2&q=bar");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "q");
        assert_eq!(params[0].example_value.as_deref(), Some("foo"));
        assert_eq!(params[1].name, "page");
        assert!(params.iter().all(|p| p.location == ParamLocation::Query));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("API.Example.com./x").as_deref(), Some("api.example.com"));
        assert_eq!(host_of("   "), None);
    }
}
