//! Goal-directed research over one search result.
//!
//! The agent inspects its context, picks exactly one action per step, and
//! stops at a terminal action or the step budget. Context is ephemeral; the
//! persisted record of a research run is the step log. A failed run is
//! never rehydrated from steps, just retried from scratch.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bidscout_core::model::{ExtractedDetails, ResearchStep, SearchResult, StepAction};
use bidscout_llm::{LlmClient, LlmError};
use bidscout_net::{FetchError, PageFetcher};

use crate::detect::{detect_login_wall, discover_pdf_links};

pub const DEFAULT_MAX_STEPS: usize = 5;

/// Agent-side status of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Researching,
    Researched,
    NeedsManual,
    NeedsManualUpload,
    Exhausted,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Researching => "researching",
            AgentStatus::Researched => "researched",
            AgentStatus::NeedsManual => "needs_manual",
            AgentStatus::NeedsManualUpload => "needs_manual_upload",
            AgentStatus::Exhausted => "research_exhausted",
            AgentStatus::Failed => "failed",
        }
    }
}

/// Extraction seam so tests (and future providers) can stand in for the
/// LLM client.
#[async_trait]
pub trait DetailExtractor: Send + Sync {
    async fn extract(
        &self,
        cancel: &CancellationToken,
        page_url: &str,
        page_text: &str,
    ) -> Result<(ExtractedDetails, i64), LlmError>;
}

#[async_trait]
impl DetailExtractor for LlmClient {
    async fn extract(
        &self,
        cancel: &CancellationToken,
        page_url: &str,
        page_text: &str,
    ) -> Result<(ExtractedDetails, i64), LlmError> {
        self.extract_details(cancel, page_url, page_text).await
    }
}

/// Working state for one result. Lives only for the duration of the run.
#[derive(Debug, Default)]
pub struct ResearchContext {
    pub result_id: i64,
    pub original_url: String,
    pub current_url: String,
    pub title: String,
    pub snippet: String,
    pub page_text: String,
    pub raw_html: String,
    pub extracted: Option<ExtractedDetails>,
    pub found_pdfs: Vec<String>,
    fetch_failed: bool,
    fetch_error: String,
    pdf_search_done: bool,
}

impl ResearchContext {
    fn for_result(result: &SearchResult) -> Self {
        let current_url = result
            .final_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| result.url.clone());
        ResearchContext {
            result_id: result.id,
            original_url: result.url.clone(),
            current_url,
            title: result.title.clone(),
            snippet: result.snippet.clone(),
            ..Default::default()
        }
    }

    fn has_extracted_title(&self) -> bool {
        self.extracted.as_ref().is_some_and(|e| e.has_title())
    }
}

/// Outcome of one research run, including the full step log.
#[derive(Debug)]
pub struct ResearchReport {
    pub result_id: i64,
    pub status: AgentStatus,
    pub steps_taken: usize,
    pub total_tokens: i64,
    pub extracted: Option<ExtractedDetails>,
    pub found_pdfs: Vec<String>,
    pub page_text: String,
    pub final_url: String,
    pub steps: Vec<ResearchStep>,
    /// The run was interrupted by cancellation; record nothing, retry later.
    pub cancelled: bool,
}

struct Decision {
    action: StepAction,
    reasoning: String,
    reason: String,
}

pub struct ResearchAgent {
    extractor: Arc<dyn DetailExtractor>,
    fetcher: PageFetcher,
    max_steps: usize,
}

impl ResearchAgent {
    pub fn new(extractor: Arc<dyn DetailExtractor>) -> anyhow::Result<Self> {
        Ok(ResearchAgent {
            extractor,
            fetcher: PageFetcher::new()?,
            max_steps: DEFAULT_MAX_STEPS,
        })
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Drive the decision loop for one search result.
    pub async fn research(
        &self,
        cancel: &CancellationToken,
        result: &SearchResult,
    ) -> ResearchReport {
        let mut ctx = ResearchContext::for_result(result);
        let mut status = AgentStatus::Researching;
        let mut steps: Vec<ResearchStep> = Vec::new();
        let mut total_tokens: i64 = 0;
        let mut cancelled = false;

        while steps.len() < self.max_steps && status == AgentStatus::Researching {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let step_number = steps.len() as i32 + 1;
            match self
                .execute_step(cancel, &mut ctx, &mut status, step_number)
                .await
            {
                Some(step) => {
                    total_tokens += step.tokens_used.unwrap_or(0);
                    debug!(
                        result_id = ctx.result_id,
                        step = step.step_number,
                        action = step.action.as_str(),
                        success = step.success,
                        "research step"
                    );
                    steps.push(step);
                }
                None => {
                    cancelled = true;
                    break;
                }
            }
        }

        if !cancelled && status == AgentStatus::Researching {
            status = AgentStatus::Exhausted;
            steps.push(ResearchStep {
                search_result_id: ctx.result_id,
                step_number: steps.len() as i32 + 1,
                action: StepAction::GiveUp,
                input_summary: String::new(),
                output_summary: String::new(),
                reasoning: format!(
                    "Reached maximum of {} research steps without finding complete RFP \
                     details. Marking as exhausted for manual review.",
                    self.max_steps
                ),
                success: false,
                error: None,
                duration_ms: 0,
                tokens_used: None,
            });
        }

        let steps_taken = steps
            .iter()
            .filter(|s| s.action != StepAction::GiveUp)
            .count();

        ResearchReport {
            result_id: ctx.result_id,
            status,
            steps_taken,
            total_tokens,
            final_url: ctx.current_url.clone(),
            page_text: std::mem::take(&mut ctx.page_text),
            extracted: ctx.extracted.take(),
            found_pdfs: std::mem::take(&mut ctx.found_pdfs),
            steps,
            cancelled,
        }
    }

    /// Decide and run one action. Returns `None` on cancellation.
    async fn execute_step(
        &self,
        cancel: &CancellationToken,
        ctx: &mut ResearchContext,
        status: &mut AgentStatus,
        step_number: i32,
    ) -> Option<ResearchStep> {
        let started = Instant::now();
        let decision = decide_action(ctx);

        let mut step = ResearchStep {
            search_result_id: ctx.result_id,
            step_number,
            action: decision.action,
            input_summary: String::new(),
            output_summary: String::new(),
            reasoning: decision.reasoning,
            success: false,
            error: None,
            duration_ms: 0,
            tokens_used: None,
        };

        match decision.action {
            StepAction::FetchPage => {
                step.input_summary = ctx.current_url.clone();
                match self.fetcher.fetch(&ctx.current_url).await {
                    Ok(page) => {
                        ctx.current_url = page.final_url;
                        ctx.page_text = page.text;
                        ctx.raw_html = page.raw_html;
                        step.output_summary = format!("Fetched {} chars", ctx.page_text.len());
                        step.success = true;
                    }
                    Err(err) => {
                        ctx.fetch_failed = true;
                        ctx.fetch_error = fetch_reason(&err);
                        step.output_summary = ctx.fetch_error.clone();
                        step.error = Some(ctx.fetch_error.clone());
                    }
                }
            }

            StepAction::ExtractDetails => {
                step.input_summary = "Page content analysis".to_string();
                match self
                    .extractor
                    .extract(cancel, &ctx.current_url, &ctx.page_text)
                    .await
                {
                    Ok((details, tokens)) => {
                        step.tokens_used = Some(tokens);
                        step.output_summary = format!(
                            "Extracted: {}",
                            details.title.as_deref().unwrap_or("(no title)")
                        );
                        step.success = true;
                        ctx.extracted = Some(details);
                    }
                    Err(LlmError::Cancelled) => return None,
                    Err(err) => {
                        step.output_summary = err.to_string();
                        step.error = Some(err.to_string());
                    }
                }
            }

            StepAction::DiscoverPdfs => {
                ctx.pdf_search_done = true;
                step.input_summary = "Searching for PDF links".to_string();
                ctx.found_pdfs = discover_pdf_links(&ctx.raw_html);
                step.output_summary = format!("Found {} PDFs", ctx.found_pdfs.len());
                step.success = true;
            }

            StepAction::MarkComplete => {
                *status = AgentStatus::Researched;
                step.input_summary = "Research complete".to_string();
                step.output_summary = "Marked as researched".to_string();
                step.success = true;
            }

            StepAction::MarkNeedsManual => {
                *status = AgentStatus::NeedsManual;
                step.input_summary = decision.reason;
                step.output_summary = "Marked for manual review".to_string();
                step.success = true;
            }

            StepAction::MarkLoginRequired => {
                *status = AgentStatus::NeedsManualUpload;
                step.input_summary = "Login wall detected".to_string();
                step.output_summary = "Requires manual document upload".to_string();
                step.success = true;
            }

            StepAction::GiveUp => {
                // Synthesized by the loop, never chosen by decide_action.
                *status = AgentStatus::Exhausted;
            }
        }

        step.duration_ms = started.elapsed().as_millis() as i64;
        Some(step)
    }
}

/// The decision table, evaluated top to bottom.
fn decide_action(ctx: &ResearchContext) -> Decision {
    if ctx.fetch_failed {
        return Decision {
            action: StepAction::MarkNeedsManual,
            reasoning: format!(
                "Unable to fetch page content from {}. Error: {}. Marking for manual review.",
                ctx.current_url, ctx.fetch_error
            ),
            reason: ctx.fetch_error.clone(),
        };
    }

    if ctx.page_text.is_empty() {
        return Decision {
            action: StepAction::FetchPage,
            reasoning: format!(
                "First step is to fetch the page content from {} to analyze it for RFP details.",
                ctx.current_url
            ),
            reason: String::new(),
        };
    }

    // Probe the raw markup so password inputs are visible to the detector;
    // synthetic contexts without markup fall back to the text digest.
    let wall_probe = if ctx.raw_html.is_empty() {
        &ctx.page_text
    } else {
        &ctx.raw_html
    };
    if detect_login_wall(wall_probe) {
        return Decision {
            action: StepAction::MarkLoginRequired,
            reasoning: "Detected login wall or authentication requirement. The page content \
                        indicates restricted access. Marking for manual upload."
                .to_string(),
            reason: String::new(),
        };
    }

    // Extraction is retried only while it has never succeeded; a successful
    // call that found no title still moves the run forward so it can end in
    // a manual-review terminal instead of burning the budget.
    if ctx.extracted.is_none() {
        return Decision {
            action: StepAction::ExtractDetails,
            reasoning: "Have page content, now extracting structured RFP details (title, \
                        agency, due date, scope)."
                .to_string(),
            reason: String::new(),
        };
    }

    if !ctx.pdf_search_done {
        return Decision {
            action: StepAction::DiscoverPdfs,
            reasoning: "Looking for PDF attachments or document links that contain the full \
                        RFP specification."
                .to_string(),
            reason: String::new(),
        };
    }

    if ctx.has_extracted_title() {
        let title = ctx
            .extracted
            .as_ref()
            .and_then(|e| e.title.clone())
            .unwrap_or_default();
        return Decision {
            action: StepAction::MarkComplete,
            reasoning: format!("Successfully extracted RFP details: {title}. Research complete."),
            reason: String::new(),
        };
    }

    Decision {
        action: StepAction::MarkNeedsManual,
        reasoning: "Unable to extract sufficient RFP details from the page. Marking for \
                    manual review."
            .to_string(),
        reason: "Could not extract sufficient RFP details".to_string(),
    }
}

fn fetch_reason(err: &FetchError) -> String {
    match err {
        FetchError::Status(code) => format!("HTTP {code}"),
        FetchError::Http(inner) => inner.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    struct StubExtractor {
        details: ExtractedDetails,
    }

    #[async_trait]
    impl DetailExtractor for StubExtractor {
        async fn extract(
            &self,
            _cancel: &CancellationToken,
            _page_url: &str,
            _page_text: &str,
        ) -> Result<(ExtractedDetails, i64), LlmError> {
            Ok((self.details.clone(), 42))
        }
    }

    fn agent_with(details: ExtractedDetails) -> ResearchAgent {
        ResearchAgent::new(Arc::new(StubExtractor { details })).unwrap()
    }

    fn springfield_details() -> ExtractedDetails {
        ExtractedDetails {
            title: Some("Parking Management RFP".to_string()),
            agency: Some("City of Springfield".to_string()),
            state: Some("IL".to_string()),
            due_date: Some("2024-03-15".to_string()),
            ..Default::default()
        }
    }

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
    fn decision_table_order() {
        let mut ctx = ResearchContext {
            current_url: "https://example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(decide_action(&ctx).action, StepAction::FetchPage);

        ctx.page_text = "Some RFP content here".to_string();
        assert_eq!(decide_action(&ctx).action, StepAction::ExtractDetails);

        ctx.extracted = Some(ExtractedDetails {
            title: Some("Test RFP".to_string()),
            agency: Some("Test Agency".to_string()),
            ..Default::default()
        });
        assert_eq!(decide_action(&ctx).action, StepAction::DiscoverPdfs);

        ctx.pdf_search_done = true;
        assert_eq!(decide_action(&ctx).action, StepAction::MarkComplete);
    }

    #[test]
    fn fetch_failure_routes_to_manual() {
        let ctx = ResearchContext {
            current_url: "https://example.com".to_string(),
            fetch_failed: true,
            fetch_error: "Connection refused".to_string(),
            ..Default::default()
        };
        let decision = decide_action(&ctx);
        assert_eq!(decision.action, StepAction::MarkNeedsManual);
        assert_eq!(decision.reason, "Connection refused");
    }

    #[test]
    fn login_wall_routes_to_login_required() {
        let ctx = ResearchContext {
            current_url: "https://example.com".to_string(),
            page_text: r#"<form><input type="password" required>Please log in</form>"#.to_string(),
            ..Default::default()
        };
        assert_eq!(decide_action(&ctx).action, StepAction::MarkLoginRequired);
    }

    #[tokio::test]
    async fn happy_path_runs_all_four_steps() {
        let base = serve(Router::new().route(
            "/rfp",
            get(|| async {
                axum::response::Html(
                    r#"<html><body>
                       <h1>RFP: Parking Management Services</h1>
                       <p>City of Springfield</p>
                       <p>Due Date: 2024-03-15</p>
                       <a href="https://example.com/rfp.pdf">Download RFP</a>
                       </body></html>"#,
                )
            }),
        ))
        .await;

        let agent = agent_with(springfield_details());
        let result = SearchResult::synthetic(&format!("{base}/rfp"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.status, AgentStatus::Researched);
        let actions: Vec<StepAction> = report.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                StepAction::FetchPage,
                StepAction::ExtractDetails,
                StepAction::DiscoverPdfs,
                StepAction::MarkComplete,
            ]
        );
        assert_eq!(report.found_pdfs, vec!["https://example.com/rfp.pdf"]);
        assert_eq!(report.total_tokens, 42);

        // Step numbers are dense from 1 and the terminal action is last.
        for (i, step) in report.steps.iter().enumerate() {
            assert_eq!(step.step_number, i as i32 + 1);
        }
        let terminals = report
            .steps
            .iter()
            .filter(|s| s.action.is_terminal())
            .count();
        assert_eq!(terminals, 1);
        assert!(report.steps.last().unwrap().action.is_terminal());
    }

    #[tokio::test]
    async fn single_step_budget_stops_after_fetch() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { axum::response::Html("<p>Request for Proposal content</p>") }),
        ))
        .await;

        let agent = agent_with(springfield_details()).with_max_steps(1);
        let result = SearchResult::synthetic(&format!("{base}/"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.steps_taken, 1);
        assert_eq!(report.steps[0].action, StepAction::FetchPage);
        assert_eq!(report.status, AgentStatus::Exhausted);
        assert_eq!(report.steps.last().unwrap().action, StepAction::GiveUp);
    }

    #[tokio::test]
    async fn login_wall_page_ends_in_manual_upload() {
        let base = serve(Router::new().route(
            "/portal",
            get(|| async {
                axum::response::Html(
                    r#"<html><body>Sign in to continue
                       <form><input type="password" required></form>
                       </body></html>"#,
                )
            }),
        ))
        .await;

        let agent = agent_with(ExtractedDetails::default());
        let result = SearchResult::synthetic(&format!("{base}/portal"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.status, AgentStatus::NeedsManualUpload);
        let actions: Vec<StepAction> = report.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![StepAction::FetchPage, StepAction::MarkLoginRequired]
        );
    }

    #[tokio::test]
    async fn empty_extraction_ends_in_manual_review() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { axum::response::Html("<p>Committee agenda and minutes</p>") }),
        ))
        .await;

        let agent = agent_with(ExtractedDetails::default());
        let result = SearchResult::synthetic(&format!("{base}/"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.status, AgentStatus::NeedsManual);
        let actions: Vec<StepAction> = report.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                StepAction::FetchPage,
                StepAction::ExtractDetails,
                StepAction::DiscoverPdfs,
                StepAction::MarkNeedsManual,
            ]
        );
    }

    #[tokio::test]
    async fn failing_extraction_exhausts_the_budget() {
        struct FailingExtractor;

        #[async_trait]
        impl DetailExtractor for FailingExtractor {
            async fn extract(
                &self,
                _cancel: &CancellationToken,
                _page_url: &str,
                _page_text: &str,
            ) -> Result<(ExtractedDetails, i64), LlmError> {
                Err(LlmError::Provider {
                    status: 503,
                    body_excerpt: "overloaded".to_string(),
                })
            }
        }

        let base = serve(Router::new().route(
            "/",
            get(|| async { axum::response::Html("<p>Request for Proposal content</p>") }),
        ))
        .await;

        let agent = ResearchAgent::new(Arc::new(FailingExtractor)).unwrap();
        let result = SearchResult::synthetic(&format!("{base}/"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.status, AgentStatus::Exhausted);
        assert_eq!(report.steps.len(), DEFAULT_MAX_STEPS + 1);
        assert_eq!(report.steps.last().unwrap().action, StepAction::GiveUp);
        // All retries were extraction attempts whose errors were recorded.
        assert!(report.steps[1..DEFAULT_MAX_STEPS]
            .iter()
            .all(|s| s.action == StepAction::ExtractDetails && s.error.is_some()));
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_then_marked_manual() {
        let base = serve(Router::new()).await;

        let agent = agent_with(ExtractedDetails::default());
        let result = SearchResult::synthetic(&format!("{base}/gone"));
        let report = agent.research(&CancellationToken::new(), &result).await;

        assert_eq!(report.status, AgentStatus::NeedsManual);
        assert_eq!(report.steps[0].action, StepAction::FetchPage);
        assert!(!report.steps[0].success);
        assert_eq!(report.steps[0].error.as_deref(), Some("HTTP 404"));
        assert_eq!(report.steps[1].action, StepAction::MarkNeedsManual);
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let agent = agent_with(ExtractedDetails::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = SearchResult::synthetic("https://example.com/never-fetched");
        let report = agent.research(&cancel, &result).await;

        assert!(report.cancelled);
        assert!(report.steps.is_empty());
    }
}
