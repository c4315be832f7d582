use std::collections::BTreeMap;

use url::{Position, Url};

use surfacemap_parser::path_segments;

/// URLs that can only differ in their path segment values share a shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeKey {
    pub is_direct: bool,
    pub host: String,
    pub segment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedUrl {
    pub normalized: String,
    pub host: String,
    pub origin: String,
    pub path: String,
    pub segments: Vec<String>,
}

impl ShapedUrl {
    pub fn parse(normalized: &str) -> Option<Self> {
        let url = Url::parse(normalized).ok()?;
        let host = url.host_str()?.to_string();
        Some(Self {
            normalized: normalized.to_string(),
            host,
            origin: url[..Position::BeforePath].to_string(),
            path: url.path().to_string(),
            segments: path_segments(url.path()),
        })
    }
}

/// Bucket distinct normalized URLs by `(is_direct, host, segment_count)`.
///
/// Returns the groups plus the URLs that did not parse and therefore can
/// never be templated. Both come back in a stable order.
pub fn group_by_shape<'a>(
    urls: impl IntoIterator<Item = (&'a str, bool)>,
) -> (BTreeMap<ShapeKey, Vec<ShapedUrl>>, Vec<String>) {
    let mut groups: BTreeMap<ShapeKey, Vec<ShapedUrl>> = BTreeMap::new();
    let mut unshaped = Vec::new();

    for (normalized, is_direct) in urls {
        let Some(shaped) = ShapedUrl::parse(normalized) else {
            unshaped.push(normalized.to_string());
            continue;
        };
        let key = ShapeKey {
            is_direct,
            host: shaped.host.clone(),
            segment_count: shaped.segments.len(),
        };
        groups.entry(key).or_default().push(shaped);
    }

    for members in groups.values_mut() {
        members.sort_by(|a, b| a.normalized.cmp(&b.normalized));
        members.dedup_by(|a, b| a.normalized == b.normalized);
    }
    unshaped.sort();
    unshaped.dedup();

    (groups, unshaped)
}
