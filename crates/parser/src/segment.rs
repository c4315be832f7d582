use std::collections::HashMap;

/// Structural check for a single path segment that is obviously an id:
/// long numbers, UUIDs, 32-char hex digests, long digit-heavy tokens.
pub fn looks_like_identifier(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let len = segment.len();

    if len >= 8 && is_all_digits(segment) {
        return true;
    }
    if len == 36 && segment.matches('-').count() == 4 {
        return true;
    }
    if len == 32 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    if len >= 20 && segment.chars().all(|c| c.is_ascii_alphanumeric()) {
        let digits = segment.chars().filter(|c| c.is_ascii_digit()).count();
        if digits as f64 / len as f64 > 0.5 {
            return true;
        }
    }
    false
}

pub fn is_all_digits(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Shannon entropy in bits over the character distribution of `token`.
pub fn shannon_entropy(token: &str) -> f64 {
    if token.is_empty() {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in token.chars() {
        *freq.entry(c).or_insert(0) += 1;
        total += 1;
    }
    let total = total as f64;
    freq.values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Looser check used once a position already looks variable across a group.
pub fn looks_like_parameter_value(segment: &str, vendor_prefixes: &[String]) -> bool {
    if looks_like_identifier(segment) {
        return true;
    }
    if vendor_prefixes
        .iter()
        .any(|p| !p.is_empty() && segment.starts_with(p.as_str()))
    {
        return true;
    }
    (segment.contains('-') && segment.len() > 10) || segment.len() > 15
}
