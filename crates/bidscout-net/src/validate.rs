//! URL validation: does the URL resolve, what lives behind it.
//!
//! Grounded search hallucinates URLs and returns portals behind auth walls,
//! so every new result gets a real GET with redirect following before the
//! research agent ever sees it. The body (capped) is only used to classify
//! the content; it is not retained.

use std::error::Error as _;
use std::time::{Duration, Instant};

use reqwest::redirect::Policy;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use bidscout_core::model::PageKind;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 10;
const MAX_BODY_BYTES: usize = 512 * 1024;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; RFPBot/1.0)";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Valid,
    ValidRedirected,
    InvalidUrl,
    NotFound,
    ClientError,
    ServerError,
    ConnectionFailed,
    ConnectionRefused,
    DnsError,
    Timeout,
    SslError,
    TooManyRedirects,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::ValidRedirected => "valid_redirected",
            ValidationStatus::InvalidUrl => "invalid_url",
            ValidationStatus::NotFound => "not_found",
            ValidationStatus::ClientError => "client_error",
            ValidationStatus::ServerError => "server_error",
            ValidationStatus::ConnectionFailed => "connection_failed",
            ValidationStatus::ConnectionRefused => "connection_refused",
            ValidationStatus::DnsError => "dns_error",
            ValidationStatus::Timeout => "timeout",
            ValidationStatus::SslError => "ssl_error",
            ValidationStatus::TooManyRedirects => "too_many_redirects",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub status: ValidationStatus,
    pub error: Option<String>,
    pub http_code: Option<u16>,
    pub final_url: String,
    pub was_redirected: bool,
    pub content_type: Option<PageKind>,
    pub mime: String,
    pub duration_ms: i64,
}

impl Validation {
    fn failed(status: ValidationStatus, error: impl Into<String>, started: Instant) -> Self {
        Validation {
            valid: false,
            status,
            error: Some(error.into()),
            http_code: None,
            final_url: String::new(),
            was_redirected: false,
            content_type: None,
            mime: String::new(),
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }
}

pub struct Validator {
    http: reqwest::Client,
}

impl Validator {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Shorter overall deadline, used by tests.
    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Validator { http })
    }

    /// Validate one URL. Bounded by the client deadline; never panics on
    /// malformed input.
    pub async fn validate(&self, raw_url: &str) -> Validation {
        let started = Instant::now();

        let parsed = Url::parse(raw_url).ok().filter(|u| {
            matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty())
        });
        if parsed.is_none() {
            return Validation::failed(ValidationStatus::InvalidUrl, "Invalid URL format", started);
        }

        let response = self
            .http
            .get(raw_url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                let (status, message) = classify_transport_error(&err);
                return Validation::failed(status, message, started);
            }
        };

        let http_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let was_redirected = final_url != raw_url;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = crate::util::read_capped(response, MAX_BODY_BYTES)
            .await
            .unwrap_or_default();
        let body_lower = body.to_lowercase();

        let (valid, status, error) = match http_code {
            404 => (
                false,
                ValidationStatus::NotFound,
                Some("Page not found (404)".to_string()),
            ),
            code @ 400..=499 => (
                false,
                ValidationStatus::ClientError,
                Some(format!("HTTP error {code}")),
            ),
            code @ 500.. => (
                false,
                ValidationStatus::ServerError,
                Some(format!("Server error {code}")),
            ),
            200..=299 => {
                let status = if was_redirected {
                    ValidationStatus::ValidRedirected
                } else {
                    ValidationStatus::Valid
                };
                (true, status, None)
            }
            code => (
                false,
                ValidationStatus::ClientError,
                Some(format!("Unexpected HTTP status {code}")),
            ),
        };

        let content_type = classify_content(&mime, &final_url, &body_lower);
        debug!(
            url = raw_url,
            status = status.as_str(),
            content_type = content_type.as_str(),
            "validated url"
        );

        Validation {
            valid,
            status,
            error,
            http_code: Some(http_code),
            final_url,
            was_redirected,
            content_type: Some(content_type),
            mime,
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }

    /// Validate a list with per-URL pacing, stopping early on cancellation.
    pub async fn validate_batch(
        &self,
        cancel: &CancellationToken,
        urls: &[String],
        delay_between: Duration,
    ) -> Vec<Validation> {
        let mut results = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            if cancel.is_cancelled() {
                return results;
            }
            results.push(self.validate(url).await);

            if i + 1 < urls.len() && !delay_between.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return results,
                    _ = tokio::time::sleep(delay_between) => {}
                }
            }
        }
        results
    }
}

fn classify_transport_error(err: &reqwest::Error) -> (ValidationStatus, String) {
    if err.is_timeout() {
        return (ValidationStatus::Timeout, "Request timed out".to_string());
    }
    if err.is_redirect() {
        return (
            ValidationStatus::TooManyRedirects,
            "Too many redirects".to_string(),
        );
    }

    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    let lower = chain.to_lowercase();

    if lower.contains("no such host")
        || lower.contains("dns")
        || lower.contains("failed to lookup")
        || lower.contains("name or service not known")
    {
        (ValidationStatus::DnsError, "DNS lookup failed".to_string())
    } else if lower.contains("connection refused") {
        (
            ValidationStatus::ConnectionRefused,
            "Connection refused".to_string(),
        )
    } else if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline")
    {
        (ValidationStatus::Timeout, "Request timed out".to_string())
    } else if lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("x509")
        || lower.contains("ssl")
    {
        (ValidationStatus::SslError, "SSL/TLS error".to_string())
    } else if lower.contains("redirect") {
        (
            ValidationStatus::TooManyRedirects,
            "Too many redirects".to_string(),
        )
    } else {
        (ValidationStatus::ConnectionFailed, chain)
    }
}

const LOGIN_PHRASES: &[&str] = &[
    "sign in",
    "log in",
    "login",
    "password",
    "authenticate",
    "access denied",
    "restricted access",
    "registration required",
    "create an account",
    "you must be logged in",
    "please register",
    "session expired",
];

const PASSWORD_ATTRS: &[&str] = &[
    "type=\"password\"",
    "type='password'",
    "name=\"password\"",
    "name='password'",
];

const AUTH_URL_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/auth",
    "/sso",
    "/oauth",
    "/saml",
    "returnurl=",
    "redirect=",
    "auth.php",
    "login.aspx",
];

const PORTALS: &[(&str, &str)] = &[
    ("bonfirehub.com", "bonfire"),
    ("opengov.com", "opengov"),
    ("planetbids.com", "planetbids"),
    ("bidnet.com", "bidnet"),
    ("publicpurchase.com", "publicpurchase"),
    ("bidsync.com", "bidsync"),
    ("ionwave.net", "ionwave"),
    ("vendorregistry.com", "vendorregistry"),
    ("negometrix.com", "negometrix"),
    ("procurato.com", "procurato"),
];

const RFP_TERMS: &[&str] = &[
    "request for proposal",
    "request for quote",
    "request for bid",
    "rfp",
    "rfq",
    "rfb",
    "solicitation",
    "bid submission",
    "proposal submission",
    "procurement",
    "due date",
    "closing date",
    "submission deadline",
];

/// Classify what kind of page sits behind a validated URL. First match wins:
/// pdf, login wall, portal listing, rfp page, other. `body_lower` must
/// already be lowercased.
pub fn classify_content(mime: &str, final_url: &str, body_lower: &str) -> PageKind {
    if mime.to_lowercase().contains("pdf") {
        return PageKind::Pdf;
    }
    if let Ok(url) = Url::parse(final_url) {
        if url.path().to_lowercase().ends_with(".pdf") {
            return PageKind::Pdf;
        }
    }
    if is_login_wall(body_lower, final_url) {
        return PageKind::LoginWall;
    }
    if portal_for_url(final_url).is_some() {
        return PageKind::PortalListing;
    }
    if is_rfp_page(body_lower) {
        return PageKind::RfpPage;
    }
    PageKind::Other
}

/// Validator-side login wall check: a login phrase plus a real password
/// input, or an auth-shaped final URL. A bare mention of "log in" with no
/// password form is not a wall.
pub fn is_login_wall(body_lower: &str, final_url: &str) -> bool {
    let has_phrase = LOGIN_PHRASES.iter().any(|p| body_lower.contains(p));
    let has_password_field = PASSWORD_ATTRS.iter().any(|a| body_lower.contains(a));
    if has_phrase && has_password_field {
        return true;
    }

    let final_lower = final_url.to_lowercase();
    AUTH_URL_PATTERNS.iter().any(|p| final_lower.contains(p))
}

/// Short portal name when the URL belongs to a known procurement platform.
pub fn portal_for_url(final_url: &str) -> Option<&'static str> {
    let final_lower = final_url.to_lowercase();
    PORTALS
        .iter()
        .find(|(domain, _)| final_lower.contains(domain))
        .map(|(_, name)| *name)
}

/// At least two distinct RFP-related terms make an RFP page.
pub fn is_rfp_page(body_lower: &str) -> bool {
    RFP_TERMS.iter().filter(|t| body_lower.contains(**t)).count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn ok_page_is_valid() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { axum::response::Html("<html><body>Test page</body></html>") }),
        ))
        .await;

        let v = Validator::new().unwrap();
        let result = v.validate(&format!("{base}/")).await;

        assert!(result.valid, "status={:?} err={:?}", result.status, result.error);
        assert_eq!(result.status, ValidationStatus::Valid);
        assert_eq!(result.http_code, Some(200));
        assert!(!result.was_redirected);
    }

    #[tokio::test]
    async fn not_found_maps_to_not_found() {
        let base = serve(Router::new()).await;
        let v = Validator::new().unwrap();
        let result = v.validate(&format!("{base}/missing")).await;

        assert!(!result.valid);
        assert_eq!(result.status, ValidationStatus::NotFound);
    }

    #[tokio::test]
    async fn server_error_maps_to_server_error() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let v = Validator::new().unwrap();
        let result = v.validate(&format!("{base}/")).await;

        assert!(!result.valid);
        assert_eq!(result.status, ValidationStatus::ServerError);
    }

    #[tokio::test]
    async fn redirects_are_followed_and_flagged() {
        let base = serve(
            Router::new()
                .route(
                    "/start",
                    get(|| async { axum::response::Redirect::permanent("/final") }),
                )
                .route("/final", get(|| async { "Final destination" })),
        )
        .await;

        let v = Validator::new().unwrap();
        let result = v.validate(&format!("{base}/start")).await;

        assert!(result.valid);
        assert_eq!(result.status, ValidationStatus::ValidRedirected);
        assert!(result.was_redirected);
        assert_eq!(result.final_url, format!("{base}/final"));
    }

    #[tokio::test]
    async fn malformed_urls_are_invalid_not_panics() {
        let v = Validator::new().unwrap();
        for url in ["", "not-a-url", "ftp://example.com", "://missing-scheme.com"] {
            let result = v.validate(url).await;
            assert!(!result.valid, "url {url:?}");
            assert_eq!(result.status, ValidationStatus::InvalidUrl, "url {url:?}");
        }
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let base = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        ))
        .await;

        let v = Validator::with_timeout(Duration::from_millis(100)).unwrap();
        let result = v.validate(&format!("{base}/")).await;

        assert!(!result.valid);
        assert_eq!(result.status, ValidationStatus::Timeout);
    }

    #[tokio::test]
    async fn batch_respects_cancellation() {
        let base = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let urls: Vec<String> = (0..3).map(|i| format!("{base}/?i={i}")).collect();

        let v = Validator::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = v
            .validate_batch(&cancel, &urls, Duration::from_millis(100))
            .await;
        assert!(results.len() < urls.len());
    }

    #[test]
    fn content_classification_precedence() {
        let cases: &[(&str, &str, &str, PageKind)] = &[
            ("application/pdf", "https://example.com/doc", "", PageKind::Pdf),
            ("text/html", "https://example.com/document.pdf", "", PageKind::Pdf),
            (
                "text/html",
                "https://example.com/",
                r#"<form><input type="password" name="pass"> sign in</form>"#,
                PageKind::LoginWall,
            ),
            (
                "text/html",
                "https://app.bonfirehub.com/portal/rfp/123",
                "<html></html>",
                PageKind::PortalListing,
            ),
            (
                "text/html",
                "https://city.gov/rfp",
                "request for proposal - parking services. due date: january 15. submission deadline.",
                PageKind::RfpPage,
            ),
            ("text/html", "https://example.com/about", "about us page", PageKind::Other),
        ];
        for (mime, url, body, want) in cases {
            assert_eq!(classify_content(mime, url, body), *want, "{url}");
        }
    }

    #[test]
    fn login_wall_heuristics() {
        assert!(is_login_wall(
            r#"please sign in <input type="password">"#,
            "https://example.com"
        ));
        assert!(is_login_wall(
            "redirecting...",
            "https://example.com/login?returnurl=/rfp"
        ));
        assert!(!is_login_wall(
            "welcome to our rfp listing",
            "https://example.com/rfp"
        ));
        // Mentions login but no password form and no auth URL.
        assert!(!is_login_wall(
            "please log in to access this content",
            "https://example.com/help"
        ));
    }

    #[test]
    fn portal_detection() {
        assert_eq!(
            portal_for_url("https://app.bonfirehub.com/portal/rfp/123"),
            Some("bonfire")
        );
        assert_eq!(
            portal_for_url("https://www.opengov.com/solicitation/456"),
            Some("opengov")
        );
        assert_eq!(portal_for_url("https://example.com/rfp"), None);
        assert_eq!(portal_for_url("https://city.gov/procurement"), None);
    }

    #[test]
    fn rfp_page_needs_two_terms() {
        assert!(is_rfp_page("request for proposal due date friday"));
        assert!(!is_rfp_page("this page mentions an rfp once"));
        assert!(!is_rfp_page("nothing relevant here"));
    }
}
