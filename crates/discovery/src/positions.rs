use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use surfacemap_core::config::ConsolidationConfig;
use surfacemap_core::{ParamLocation, RawParameter};
use surfacemap_parser::{is_all_digits, looks_like_parameter_value, shannon_entropy};

use crate::shape::{group_by_shape, ShapedUrl};

/// The canonical templated form of one concrete normalized URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Origin plus templated path; the endpoint merge key.
    pub normalized_url: String,
    pub templated_path: String,
    pub path_params: Vec<RawParameter>,
}

impl Template {
    fn literal(shaped: &ShapedUrl) -> Self {
        Self {
            normalized_url: shaped.normalized.clone(),
            templated_path: shaped.path.clone(),
            path_params: Vec::new(),
        }
    }

    fn build(shaped: &ShapedUrl, positions: &BTreeSet<usize>, placeholder: &str) -> Self {
        let mut path_params = Vec::new();
        let segments: Vec<&str> = shaped
            .segments
            .iter()
            .enumerate()
            .map(|(i, seg)| {
                if positions.contains(&i) {
                    path_params.push(RawParameter::new(
                        ParamLocation::Path,
                        &format!("path_param_{i}"),
                        Some(seg),
                    ));
                    placeholder
                } else {
                    seg.as_str()
                }
            })
            .collect();
        let templated_path = format!("/{}", segments.join("/"));
        Self {
            normalized_url: format!("{}{}", shaped.origin, templated_path),
            templated_path,
            path_params,
        }
    }
}

/// Concrete normalized URL -> its template.
pub type TemplateMap = BTreeMap<String, Template>;

/// Finds path positions that hold variable values across a group of
/// same-shaped URLs.
#[derive(Debug, Clone)]
pub struct TemplateDetector {
    min_group_size: usize,
    unique_ratio_threshold: f64,
    high_entropy_threshold: f64,
    majority_entropy_threshold: f64,
    placeholder: String,
    vendor_prefixes: Vec<String>,
}

impl TemplateDetector {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            min_group_size: config.min_group_size,
            unique_ratio_threshold: config.unique_ratio_threshold,
            high_entropy_threshold: config.high_entropy_threshold,
            majority_entropy_threshold: config.majority_entropy_threshold,
            placeholder: config.placeholder.clone(),
            vendor_prefixes: config.vendor_prefixes.clone(),
        }
    }

    /// Positions to template for a group of same-shaped segment lists. Empty
    /// for groups below the minimum size.
    pub fn detect_positions(&self, group: &[Vec<String>]) -> BTreeSet<usize> {
        let n = group.len();
        let mut positions = BTreeSet::new();
        if n < self.min_group_size {
            return positions;
        }

        let width = group.iter().map(Vec::len).max().unwrap_or(0);
        let mut columns: Vec<BTreeMap<&str, usize>> = vec![BTreeMap::new(); width];
        for segments in group {
            for (i, seg) in segments.iter().enumerate() {
                *columns[i].entry(seg.as_str()).or_insert(0) += 1;
            }
        }

        for (position, values) in columns.iter().enumerate() {
            let distinct = values.len();
            let total: usize = values.values().sum();
            if distinct == 0 || total == 0 {
                continue;
            }
            let unique_ratio = distinct as f64 / total as f64;
            if unique_ratio <= self.unique_ratio_threshold || distinct < self.min_group_size {
                continue;
            }

            let avg_entropy =
                values.keys().map(|v| shannon_entropy(v)).sum::<f64>() / distinct as f64;

            let high_entropy = avg_entropy > self.high_entropy_threshold;
            let majority = distinct > n / 2 && avg_entropy > self.majority_entropy_threshold;
            let pattern = values
                .keys()
                .any(|v| looks_like_parameter_value(v, &self.vendor_prefixes));
            let numeric = values.keys().all(|v| is_all_digits(v));

            if high_entropy || majority || pattern || numeric {
                debug!(
                    position,
                    distinct,
                    avg_entropy,
                    high_entropy,
                    majority,
                    pattern,
                    numeric,
                    "variable path position"
                );
                positions.insert(position);
            }
        }
        positions
    }

    /// Template every distinct normalized URL of a run.
    ///
    /// `urls` pairs each normalized URL with its direct/adjacent flag; the
    /// two partitions never share a group. A URL listed more than once keeps
    /// the flag it was listed with first.
    pub fn templates_for<'a>(&self, urls: impl IntoIterator<Item = (&'a str, bool)>) -> TemplateMap {
        let mut identity: BTreeMap<&str, bool> = BTreeMap::new();
        for (url, is_direct) in urls {
            identity.entry(url).or_insert(is_direct);
        }
        let (groups, unshaped) = group_by_shape(identity);
        let mut templates = TemplateMap::new();

        for raw in unshaped {
            let template = Template {
                normalized_url: raw.clone(),
                templated_path: String::new(),
                path_params: Vec::new(),
            };
            templates.insert(raw, template);
        }

        let mut templated_groups = 0usize;
        for (key, members) in &groups {
            let segment_lists: Vec<Vec<String>> =
                members.iter().map(|m| m.segments.clone()).collect();
            let positions = self.detect_positions(&segment_lists);

            if !positions.is_empty() {
                templated_groups += 1;
                debug!(
                    host = %key.host,
                    segments = key.segment_count,
                    members = members.len(),
                    positions = ?positions,
                    "templating group"
                );
            }

            for member in members {
                let template = if positions.is_empty() {
                    Template::literal(member)
                } else {
                    Template::build(member, &positions, &self.placeholder)
                };
                templates.insert(member.normalized.clone(), template);
            }
        }

        debug!(groups = groups.len(), templated_groups, "template detection finished");
        templates
    }
}
