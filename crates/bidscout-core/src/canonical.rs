//! URL cleaning and canonicalization for cross-result identity.
//!
//! Grounded-search replies mix real listing URLs with markdown artifacts and
//! tracking junk. `clean_url` strips the artifacts, `canonicalize` produces
//! the stable form used for dedup across cycles.

use url::Url;

/// Query parameters that never affect page identity.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
];

/// Search-redirect proxies the provider sometimes emits instead of the real
/// destination. Filtered by callers, not by the canonicalizer.
pub fn is_search_proxy(url: &str) -> bool {
    url.contains("vertexaisearch.cloud.google.com")
}

/// Strip reply-text artifacts from a URL, then canonicalize it.
///
/// Handles trailing punctuation, `](` markdown link residue, and trailing
/// percent-encoded brackets.
pub fn clean_url(raw: &str) -> Option<String> {
    let mut s = raw.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']']);
    if let Some(idx) = s.find("](") {
        s = &s[..idx];
    }
    let s = s.trim_end_matches("%5B").trim_end_matches("%5D");
    canonicalize(s)
}

/// Canonicalize a URL: lowercase scheme/host, drop default ports, remove
/// tracking parameters, sort the remaining query keys. Returns `None` for
/// anything that is not an http(s) URL with a host.
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if url.host_str().map_or(true, |h| h.is_empty()) {
        return None;
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut sorted = pairs;
        // Stable sort keeps value order for repeated keys.
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(sorted.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&query));
    }

    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_url_passes_through() {
        assert_eq!(
            canonicalize("https://example.com/path").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn host_is_lowercased() {
        assert_eq!(
            canonicalize("https://EXAMPLE.COM/path").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn default_ports_are_dropped() {
        assert_eq!(
            canonicalize("https://example.com:443/path").as_deref(),
            Some("https://example.com/path")
        );
        assert_eq!(
            canonicalize("http://example.com:80/path").as_deref(),
            Some("http://example.com/path")
        );
    }

    #[test]
    fn tracking_params_are_removed() {
        assert_eq!(
            canonicalize("https://example.com/path?utm_source=google&id=123").as_deref(),
            Some("https://example.com/path?id=123")
        );
        assert_eq!(
            canonicalize("https://example.com/path?utm_source=a&utm_medium=b&fbclid=c").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn query_keys_are_sorted() {
        assert_eq!(
            canonicalize("https://example.com/path?z=1&a=2").as_deref(),
            Some("https://example.com/path?a=2&z=1")
        );
    }

    #[test]
    fn order_stability_under_param_permutation() {
        let a = canonicalize("https://example.com/p?b=2&a=1&c=3").unwrap();
        let b = canonicalize("https://example.com/p?c=3&a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn idempotence() {
        for raw in [
            "https://example.com/path?z=1&a=2&utm_source=x",
            "https://EXAMPLE.com:443/Path/Sub?ref=t",
            "http://example.com",
        ] {
            let once = canonicalize(raw).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn rejects_non_http_and_hostless() {
        assert_eq!(canonicalize("not-a-url"), None);
        assert_eq!(canonicalize("ftp://example.com/file"), None);
        assert_eq!(canonicalize("mailto:someone@example.com"), None);
        assert_eq!(canonicalize(""), None);
    }

    #[test]
    fn clean_strips_trailing_punctuation() {
        assert_eq!(
            clean_url("https://example.com/path.").as_deref(),
            Some("https://example.com/path")
        );
        assert_eq!(
            clean_url("https://example.com/path),").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn clean_cuts_markdown_artifacts() {
        assert_eq!(
            clean_url("https://example.com/path](https://other.com").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn clean_strips_encoded_brackets() {
        assert_eq!(
            clean_url("https://example.com/path%5D").as_deref(),
            Some("https://example.com/path")
        );
        assert_eq!(
            clean_url("https://example.com/path%5B").as_deref(),
            Some("https://example.com/path")
        );
    }

    #[test]
    fn proxy_detection() {
        assert!(is_search_proxy(
            "https://vertexaisearch.cloud.google.com/grounding-api-redirect/abc"
        ));
        assert!(!is_search_proxy("https://example.com/vertex"));
    }
}
