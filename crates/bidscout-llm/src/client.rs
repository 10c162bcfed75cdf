//! The provider client and response-to-result parsing.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use bidscout_core::model::ExtractedDetails;
use bidscout_core::{clean_url, is_search_proxy};

use crate::wire::{GenerateRequest, GenerateResponse, GenerationConfig, Tool};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-2xx from the provider. Carries the HTTP code and a body excerpt;
    /// never retried here.
    #[error("provider error (HTTP {status}): {body_excerpt}")]
    Provider { status: u16, body_excerpt: String },
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed provider response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// Where a search hit came from: grounding metadata (authoritative) or a URL
/// scraped out of the reply text (fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    GroundingChunk,
    TextExtraction,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::GroundingChunk => "grounding_chunk",
            Source::TextExtraction => "text_extraction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query: String,
    pub model: String,
    pub hits: Vec<SearchHit>,
    pub tokens_used: i64,
    pub duration_ms: i64,
}

pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        LlmClient {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Run one grounded search query and assemble deduplicated hits from the
    /// grounding chunks plus any URLs found in the reply text.
    pub async fn grounded_search(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> Result<SearchOutcome, LlmError> {
        let started = Instant::now();

        let mut request = GenerateRequest::from_prompt(&build_search_prompt(query));
        request.tools = vec![Tool::search_grounding()];
        request.generation_config = GenerationConfig {
            temperature: 0.1,
            max_output_tokens: Some(4096),
            ..Default::default()
        };

        let response = self.call(cancel, &request, SEARCH_TIMEOUT).await?;
        let hits = parse_search_hits(&response);
        debug!(query, hits = hits.len(), "grounded search complete");

        Ok(SearchOutcome {
            query: query.to_string(),
            model: self.model.clone(),
            hits,
            tokens_used: response.tokens_used(),
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }

    /// Extract structured RFP fields from page text. Returns the details and
    /// the token count for observability. A reply that fails schema parsing
    /// surfaces as [`LlmError::Parse`].
    pub async fn extract_details(
        &self,
        cancel: &CancellationToken,
        page_url: &str,
        page_text: &str,
    ) -> Result<(ExtractedDetails, i64), LlmError> {
        let mut request =
            GenerateRequest::from_prompt(&build_extraction_prompt(page_url, page_text));
        request.generation_config = GenerationConfig {
            temperature: 0.1,
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(extraction_schema()),
            ..Default::default()
        };

        let response = self.call(cancel, &request, EXTRACT_TIMEOUT).await?;
        let tokens = response.tokens_used();
        let text = response.reply_text();
        let body = if text.trim().is_empty() {
            "{}"
        } else {
            text.as_str()
        };
        let details: ExtractedDetails = serde_json::from_str(body)?;
        Ok((details, tokens))
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, LlmError> {
        let endpoint = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let send = self
            .http
            .post(&endpoint)
            .timeout(timeout)
            .json(request)
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            resp = send => resp?,
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            body = response.text() => body?,
        };

        if !status.is_success() {
            return Err(LlmError::Provider {
                status: status.as_u16(),
                body_excerpt: excerpt(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

pub fn build_search_prompt(query: &str) -> String {
    format!(
        "Search the web for: {query}\n\n\
         Find relevant RFP (Request for Proposal) listings related to parking services. \
         For each result found, I need:\n\
         - The exact URL of the listing\n\
         - The title of the page\n\
         - A brief description or snippet\n\n\
         Focus on actual procurement listings from portals like Bonfire, OpenGov, \
         PlanetBids, BidNet, or government agency websites."
    )
}

pub fn build_extraction_prompt(page_url: &str, page_text: &str) -> String {
    format!(
        "Extract RFP (Request for Proposal) details from this page content:\n\n\
         Page URL: {page_url}\n\
         Page Content:\n{page_text}\n\n\
         Extract the following if present:\n\
         - title: The RFP title/name\n\
         - agency: The issuing agency/organization\n\
         - location_city: City\n\
         - location_state: State (2-letter code)\n\
         - due_date: Due date/deadline (YYYY-MM-DD format if possible)\n\
         - scope_summary: Brief summary of what's being requested\n\
         - estimated_value: Budget/contract value if mentioned\n\
         - incumbent: Current contractor if mentioned\n\
         - category: Type of service (parking, valet, event_ops, transit, enforcement, etc.)\n\
         - venue_type: Type of venue (arena, stadium, convention_center, airport, municipal, etc.)\n\n\
         Return as JSON. Use null for fields that are not found."
    )
}

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "agency": {"type": "string"},
            "location_city": {"type": "string"},
            "location_state": {"type": "string"},
            "due_date": {"type": "string"},
            "scope_summary": {"type": "string"},
            "estimated_value": {"type": "string"},
            "incumbent": {"type": "string"},
            "category": {"type": "string"},
            "venue_type": {"type": "string"}
        }
    })
}

/// Assemble hits from a provider response: grounding chunks first, then URLs
/// regex-extracted from the reply text, deduplicated by canonical URL.
pub fn parse_search_hits(response: &GenerateResponse) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(meta) = response
        .candidates
        .first()
        .and_then(|c| c.grounding_metadata.as_ref())
    {
        for chunk in &meta.grounding_chunks {
            let Some(web) = &chunk.web else { continue };
            if web.uri.is_empty() {
                continue;
            }
            let Some(cleaned) = clean_url(&web.uri) else {
                continue;
            };
            if is_search_proxy(&cleaned) || !seen.insert(cleaned.clone()) {
                continue;
            }
            hits.push(SearchHit {
                url: cleaned,
                title: web.title.clone(),
                snippet: String::new(),
                source: Source::GroundingChunk,
            });
        }
    }

    for hit in extract_urls_from_text(&response.reply_text()) {
        if seen.insert(hit.url.clone()) {
            hits.push(hit);
        }
    }

    hits
}

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s\)\]"'<>]+"#).expect("url pattern"));

/// Fallback extraction of listing URLs from free reply text.
pub fn extract_urls_from_text(text: &str) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let Some(cleaned) = clean_url(m.as_str()) else {
            continue;
        };
        if is_search_proxy(&cleaned) {
            continue;
        }
        hits.push(SearchHit {
            title: title_from_url(&cleaned),
            url: cleaned,
            snippet: String::new(),
            source: Source::TextExtraction,
        });
    }
    hits
}

/// Synthesize a display title from a URL path: last segment, separators to
/// spaces, extension stripped, percent-decoded, title-cased, host appended.
pub fn title_from_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let host = url.host_str().unwrap_or_default().to_string();

    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    if last.is_empty() {
        return host;
    }

    let mut title = last.replace(['-', '_'], " ");
    if let Some(idx) = title.rfind('.') {
        title.truncate(idx);
    }
    if let Ok(decoded) = percent_decode_str(&title).decode_utf8() {
        title = decoded.into_owned();
    }

    let title = title
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!("{title} ({host})")
}
