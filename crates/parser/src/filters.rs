use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::parse_lenient;

static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|gif|svg|ico|bmp|webp|tiff?|avif|apng|jfif)(\?|$)").unwrap()
});

static STATIC_ASSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(css|js|woff2?|ttf|eot|otf|map|json|xml|txt)(\?|$)").unwrap()
});

const GARBAGE_MARKERS: &[&str] = &[
    "\\n", "\n", "\\", "/*", ").*", "&quot", "%5Cn", "%5C", "<%", "%>", "<script",
    "javascript:", "data:", "vbscript:", "%22", "%29", "%3C", "%3E", "<0>",
];

const VALID_PATH_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./~:@!$&'()*+,;=";

const MAX_PATH_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Image,
    StaticAsset,
    InvalidPath,
}

/// Counters for raw tool output dropped before it becomes an observation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub images: usize,
    pub static_assets: usize,
    pub invalid: usize,
}

impl FilterStats {
    pub fn record(&mut self, verdict: Option<Rejection>) {
        match verdict {
            None => self.kept += 1,
            Some(Rejection::Image) => self.images += 1,
            Some(Rejection::StaticAsset) => self.static_assets += 1,
            Some(Rejection::InvalidPath) => self.invalid += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.images + self.static_assets + self.invalid
    }
}

pub fn is_image_file(url: &str) -> bool {
    IMAGE_RE.is_match(url)
}

pub fn is_static_asset(url: &str) -> bool {
    STATIC_ASSET_RE.is_match(url)
}

pub fn classify(url: &str) -> Option<Rejection> {
    if is_image_file(url) {
        Some(Rejection::Image)
    } else if is_static_asset(url) {
        Some(Rejection::StaticAsset)
    } else if !is_valid_path(url) {
        Some(Rejection::InvalidPath)
    } else {
        None
    }
}

/// Rejects paths that are really scraped script fragments, escaped text or
/// other junk that crawlers and archive scrapers routinely emit.
pub fn is_valid_path(url: &str) -> bool {
    let Some(parsed) = parse_lenient(url) else {
        return false;
    };
    let path = parsed.path();
    if path == "/" {
        return true;
    }
    if path.contains("http://") || path.contains("https://") {
        return false;
    }

    let Ok(decoded) = urlencoding::decode(path) else {
        return false;
    };
    if decoded.len() > MAX_PATH_LEN {
        return false;
    }
    if GARBAGE_MARKERS
        .iter()
        .any(|m| decoded.contains(m) || path.contains(m))
    {
        return false;
    }

    let unprintable = decoded.chars().filter(|&c| c < ' ' || c > '~').count();
    if unprintable > decoded.len() / 3 {
        return false;
    }
    if decoded.len() > 1 && !decoded.starts_with('/') {
        return false;
    }

    let segments: Vec<&str> = decoded.trim_matches('/').split('/').collect();
    if !segments.iter().all(|s| segment_is_plausible(s)) {
        return false;
    }

    // a lone one or two digit segment is almost always a scraped fragment
    if let [only] = segments.as_slice() {
        if !only.is_empty() && only.len() <= 2 && only.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }

    let valid = path.chars().filter(|c| VALID_PATH_CHARS.contains(*c)).count();
    !(path.len() > 1 && (valid as f64 / path.len() as f64) < 0.6)
}

fn segment_is_plausible(segment: &str) -> bool {
    if segment.is_empty() {
        return true;
    }
    if segment.starts_with(['[', ',', ')'])
        || segment.ends_with(',')
        || (segment.ends_with('-') && segment.len() > 1)
    {
        return false;
    }

    if let Some(rest) = segment.strip_prefix('.') {
        if !rest.is_empty() && rest != "env" && rest != "git" && !rest.starts_with("well-known") {
            let first = rest.chars().next().unwrap_or('a');
            if first.is_ascii_uppercase() {
                return false;
            }
            if rest.len() <= 4 && !first.is_ascii_lowercase() {
                return false;
            }
        }
    }

    let odd = [':', ' ', ',', '%']
        .iter()
        .filter(|c| segment.contains(**c))
        .count();
    odd < 2
}
