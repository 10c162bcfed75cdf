//! Page fetching and HTML-to-text digestion for the research agent.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::redirect::Policy;
use scraper::{Html, Node};
use thiserror::Error;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 5;
const MAX_BODY_BYTES: usize = 512 * 1024;
const MAX_TEXT_LEN: usize = 15_000;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; RFPBot/1.0)";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A fetched page: the raw (capped) markup for link discovery and the
/// extracted text digest for the extraction prompt.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub raw_html: String,
    pub text: String,
}

pub struct PageFetcher {
    http: reqwest::Client,
}

impl PageFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(PageFetcher { http })
    }

    /// Size-bounded GET. Any HTTP >= 400 is a fetch failure.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let raw_html = crate::util::read_capped(response, MAX_BODY_BYTES).await?;
        let text = html_to_text(&raw_html);

        Ok(FetchedPage {
            final_url,
            raw_html,
            text,
        })
    }
}

static SCRIPT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script pattern"));
static STYLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style pattern"));
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static SPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("spaces"));
static NEWLINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("newlines"));

/// Convert HTML to a plain-text digest: drop script/style, walk the DOM
/// emitting text with newlines at block boundaries, collapse whitespace,
/// truncate to the digest limit.
pub fn html_to_text(html: &str) -> String {
    let html = SCRIPT_PATTERN.replace_all(html, "");
    let html = STYLE_PATTERN.replace_all(&html, "");

    let document = Html::parse_document(&html);
    let mut out = String::new();
    walk(document.tree.root(), &mut out);

    if out.trim().is_empty() && !html.trim().is_empty() {
        // Parser produced nothing usable; fall back to a global tag strip.
        out = decode_entities(&TAG_PATTERN.replace_all(&html, " "));
    }

    clean_text(&out)
}

fn walk(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        Node::Element(element) => match element.name() {
            "script" | "style" => return,
            "p" | "div" | "br" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "tr" => {
                out.push('\n')
            }
            _ => {}
        },
        _ => {}
    }
    for child in node.children() {
        walk(child, out);
    }
}

fn clean_text(text: &str) -> String {
    let text = SPACE_PATTERN.replace_all(text, " ");
    let text = NEWLINE_PATTERN.replace_all(&text, "\n\n");
    let text = text.trim();

    if text.len() > MAX_TEXT_LEN {
        let mut end = MAX_TEXT_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n...[truncated]", &text[..end])
    } else {
        text.to_string()
    }
}

/// Entity decoding for the tag-strip fallback; the DOM path decodes as it
/// parses.
fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
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

    #[test]
    fn simple_text_survives() {
        assert!(html_to_text("<p>Hello World</p>").contains("Hello World"));
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        let text = html_to_text("<p>Before</p><script>alert('hi')</script><p>After</p>");
        assert!(text.contains("Before"));
        assert!(text.contains("After"));
        assert!(!text.contains("alert"));

        let text = html_to_text("<style>.foo{color:red}</style><p>Content</p>");
        assert!(text.contains("Content"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn entities_are_decoded() {
        assert!(html_to_text("<p>Tom &amp; Jerry</p>").contains("Tom & Jerry"));
    }

    #[test]
    fn block_elements_produce_newlines() {
        let text = html_to_text("<div>one</div><div>two</div>");
        let one = text.find("one").unwrap();
        let two = text.find("two").unwrap();
        assert!(text[one..two].contains('\n'), "no break in {text:?}");
    }

    #[test]
    fn long_pages_are_truncated() {
        let body = "word ".repeat(10_000);
        let text = html_to_text(&format!("<p>{body}</p>"));
        assert!(text.ends_with("...[truncated]"));
        assert!(text.len() <= MAX_TEXT_LEN + 20);
    }

    #[test]
    fn whitespace_collapses() {
        let text = html_to_text("<p>a     b\t\tc</p>");
        assert!(text.contains("a b c"));
    }

    #[tokio::test]
    async fn fetch_extracts_page_text() {
        let base = serve(Router::new().route(
            "/",
            get(|| async {
                axum::response::Html(
                    "<html><body>\
                     <h1>Request for Proposal</h1>\
                     <p>Parking Management Services</p>\
                     <p>Due Date: January 15, 2024</p>\
                     </body></html>",
                )
            }),
        ))
        .await;

        let fetcher = PageFetcher::new().unwrap();
        let page = fetcher.fetch(&format!("{base}/")).await.expect("fetch");
        assert!(page.text.contains("Request for Proposal"));
        assert!(page.text.contains("Parking Management"));
        assert!(page.raw_html.contains("<h1>"));
    }

    #[tokio::test]
    async fn http_400_plus_is_a_fetch_failure() {
        let base = serve(Router::new()).await;
        let fetcher = PageFetcher::new().unwrap();
        let err = fetcher.fetch(&format!("{base}/gone")).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
    }
}
