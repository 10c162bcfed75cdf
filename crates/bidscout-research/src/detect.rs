//! Page-content heuristics used mid-research: the login-wall detector and
//! PDF link discovery.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Phrases that suggest gated content. A hit only counts when the
/// surrounding text looks like an actual form (see below), so pages that
/// merely mention "log in" in passing stay researchable.
const LOGIN_INDICATORS: &[&str] = &[
    "sign in",
    "log in",
    "login",
    "signin",
    "create account",
    "register",
    "authentication required",
    "access denied",
    "subscription required",
    "members only",
    "please log in",
    "login to view",
    "sign in to continue",
];

const FORM_TERMS: &[&str] = &["form", "password", "email", "username", "required"];

const CONTEXT_WINDOW: usize = 100;

/// Body-only login-wall check: for each login phrase found, inspect the
/// ±100 characters around it for form vocabulary.
pub fn detect_login_wall(content: &str) -> bool {
    let content_lower = content.to_lowercase();

    for indicator in LOGIN_INDICATORS {
        let Some(pos) = content_lower.find(indicator) else {
            continue;
        };

        let mut start = pos.saturating_sub(CONTEXT_WINDOW);
        while !content_lower.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = (pos + CONTEXT_WINDOW).min(content_lower.len());
        while !content_lower.is_char_boundary(end) {
            end += 1;
        }

        let surrounding = &content_lower[start..end];
        if FORM_TERMS.iter().any(|term| surrounding.contains(term)) {
            return true;
        }
    }

    false
}

static PDF_HREF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*["']([^"']*\.pdf[^"']*)["']"#).expect("pdf href pattern")
});

/// Collect absolute PDF links from raw page markup, deduplicated in
/// discovery order. Relative hrefs are skipped: no base-URL resolution.
pub fn discover_pdf_links(raw_html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for capture in PDF_HREF_PATTERN.captures_iter(raw_html) {
        let href = capture[1].to_string();
        if !href.starts_with("http") {
            continue;
        }
        if seen.insert(href.clone()) {
            links.push(href);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_form_is_a_wall() {
        assert!(detect_login_wall(
            r#"<form><input type="password" required><button>Sign in</button></form>"#
        ));
    }

    #[test]
    fn access_denied_with_form_terms_is_a_wall() {
        assert!(detect_login_wall(
            "Access denied. Please log in with your username and password."
        ));
    }

    #[test]
    fn plain_rfp_page_is_not_a_wall() {
        assert!(!detect_login_wall(
            "Request for Proposal: Parking Services. Due Date: January 15, 2024."
        ));
    }

    #[test]
    fn passing_mention_without_form_context_is_not_a_wall() {
        assert!(!detect_login_wall(
            "Contact us if you need help with the building entrance. RFP details below. \
             Vendors should review the attached scope documents before the walkthrough. \
             Questions may be submitted until the deadline. After that window closes login \
             kiosks at the garage will operate on the published schedule without attendants."
        ));
    }

    #[test]
    fn pdf_links_are_discovered_and_deduped() {
        let html = r#"
            <a href="https://example.com/rfp.pdf">RFP Document</a>
            <a href="https://example.com/specs.pdf">Specifications</a>
            <a href="https://example.com/rfp.pdf">RFP again</a>
            <a href="https://example.com/other.html">Other Link</a>
        "#;
        let links = discover_pdf_links(html);
        assert_eq!(
            links,
            vec![
                "https://example.com/rfp.pdf".to_string(),
                "https://example.com/specs.pdf".to_string(),
            ]
        );
    }

    #[test]
    fn relative_pdf_links_are_skipped() {
        let html = r#"<a href="/docs/rfp.pdf">local</a> <a href="https://x.test/a.pdf">abs</a>"#;
        let links = discover_pdf_links(html);
        assert_eq!(links, vec!["https://x.test/a.pdf".to_string()]);
    }

    #[test]
    fn querystring_pdf_urls_are_kept() {
        let html = r#"<a href="https://x.test/download.pdf?id=42">doc</a>"#;
        assert_eq!(
            discover_pdf_links(html),
            vec!["https://x.test/download.pdf?id=42".to_string()]
        );
    }
}
