//! Query text helpers and URLs of the search API.

use crate::config::MapRequestConfig;

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

/// Search terms of a boolean query, in first-seen order without duplicates.
///
/// Parentheses are treated as whitespace and the operators `AND`, `OR` and
/// `NOT` are dropped in any letter case.
pub fn extract_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query.replace(['(', ')'], " ").split_whitespace() {
        if OPERATORS.iter().any(|op| op.eq_ignore_ascii_case(token)) {
            continue;
        }
        if !terms.iter().any(|t| t == token) {
            terms.push(token.to_string());
        }
    }
    terms
}

/// Append a clicked term to the query text.
pub fn append_term(query: &str, term: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        term.to_string()
    } else {
        format!("{query} {term}")
    }
}

/// Percent-encode a path segment the way `encodeURIComponent` does.
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn trim_base(api_base: &str) -> &str {
    api_base.trim_end_matches('/')
}

/// URL of the statistical map for `query`.
pub fn map_url(api_base: &str, query: &str, request: &MapRequestConfig, fwhm: f64) -> String {
    format!(
        "{}/query/{}/nii?voxel={}&fwhm={}&kernel={}&r={}",
        trim_base(api_base),
        encode_component(query),
        request.voxel_mm,
        fwhm,
        encode_component(&request.kernel),
        request.radius_mm,
    )
}

pub fn studies_url(api_base: &str, query: &str) -> String {
    format!("{}/query/{}/studies", trim_base(api_base), encode_component(query))
}

pub fn terms_url(api_base: &str) -> String {
    format!("{}/terms", trim_base(api_base))
}

pub fn related_terms_url(api_base: &str, term: &str) -> String {
    format!("{}/terms/{}", trim_base(api_base), encode_component(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_operators_and_parentheses() {
        let terms = extract_terms("emotion AND (amygdala OR hippocampus)");
        assert_eq!(terms, ["emotion", "amygdala", "hippocampus"]);
    }

    #[test]
    fn operator_match_ignores_case_and_dedups() {
        let terms = extract_terms("pain not Pain and pain Or (NoT reward)");
        assert_eq!(terms, ["pain", "Pain", "reward"]);
        assert!(extract_terms("  ( AND ) ").is_empty());
    }

    #[test]
    fn encodes_like_encode_uri_component() {
        assert_eq!(encode_component("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_component("(x)*!~'"), "(x)*!~'");
        assert_eq!(encode_component("ä"), "%C3%A4");
    }

    #[test]
    fn appends_term_with_single_space() {
        assert_eq!(append_term("", "pain"), "pain");
        assert_eq!(append_term("  emotion ", "amygdala"), "emotion amygdala");
    }

    #[test]
    fn builds_map_url() {
        let url = map_url("http://api/", "pain AND heat", &MapRequestConfig::default(), 10.0);
        assert_eq!(url, "http://api/query/pain%20AND%20heat/nii?voxel=2&fwhm=10&kernel=gauss&r=6");
        let url = map_url("http://api", "pain", &MapRequestConfig::default(), 7.5);
        assert!(url.contains("fwhm=7.5"));
    }

    #[test]
    fn builds_listing_urls() {
        assert_eq!(studies_url("/api", "a b"), "/api/query/a%20b/studies");
        assert_eq!(terms_url("/api/"), "/api/terms");
        assert_eq!(related_terms_url("/api", "working memory"), "/api/terms/working%20memory");
    }
}
