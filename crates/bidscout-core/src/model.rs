//! Persistent entity types shared across the discovery pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A configurable search query template. Managed externally; the pipeline
/// only reads enabled templates. `text` may contain placeholders such as
/// `{state}` expanded by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub id: i64,
    pub name: String,
    pub text: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Running,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Running => "running",
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
        }
    }
}

/// One execution of a search query. `status` and `results_count` are
/// finalized before the surrounding transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecution {
    pub id: i64,
    pub template_id: Option<i64>,
    pub text: String,
    pub executed_at: DateTime<Utc>,
    pub results_count: i64,
    pub status: QueryStatus,
}

/// Lifecycle of a search result's research, as persisted. The base states
/// (pending through skipped) drive scheduling; `needs_manual` and
/// `research_exhausted` are agent terminals that also close out a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    NeedsManual,
    ResearchExhausted,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::InProgress => "in_progress",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
            ResearchStatus::Skipped => "skipped",
            ResearchStatus::NeedsManual => "needs_manual",
            ResearchStatus::ResearchExhausted => "research_exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResearchStatus::Pending),
            "in_progress" => Some(ResearchStatus::InProgress),
            "completed" => Some(ResearchStatus::Completed),
            "failed" => Some(ResearchStatus::Failed),
            "skipped" => Some(ResearchStatus::Skipped),
            "needs_manual" => Some(ResearchStatus::NeedsManual),
            "research_exhausted" => Some(ResearchStatus::ResearchExhausted),
            _ => None,
        }
    }
}

/// Detected type of content behind a validated URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    RfpPage,
    PortalListing,
    LoginWall,
    Pdf,
    Other,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::RfpPage => "rfp_page",
            PageKind::PortalListing => "portal_listing",
            PageKind::LoginWall => "login_wall",
            PageKind::Pdf => "pdf",
            PageKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rfp_page" => Some(PageKind::RfpPage),
            "portal_listing" => Some(PageKind::PortalListing),
            "login_wall" => Some(PageKind::LoginWall),
            "pdf" => Some(PageKind::Pdf),
            "other" => Some(PageKind::Other),
            _ => None,
        }
    }

    /// Whether the research agent should be pointed at this page: listing
    /// pages, plus login walls so the agent can confirm the wall and route
    /// the result to manual upload with a step log.
    pub fn researchable(&self) -> bool {
        matches!(
            self,
            PageKind::RfpPage | PageKind::PortalListing | PageKind::LoginWall
        )
    }
}

/// A raw search result as returned by grounded search, before and after
/// validation/research. `canonical_url` is globally unique across results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub query_execution_id: i64,
    pub url: String,
    pub canonical_url: String,
    pub title: String,
    pub snippet: String,
    pub created_at: DateTime<Utc>,

    pub url_validated: bool,
    pub url_valid: Option<bool>,
    pub final_url: Option<String>,
    pub content_type: Option<PageKind>,

    pub hint_agency: Option<String>,
    pub hint_state: Option<String>,
    pub hint_due_date: Option<NaiveDate>,

    pub research_status: ResearchStatus,
    pub promoted_rfp_id: Option<i64>,
    pub duplicate_of_id: Option<i64>,
}

impl SearchResult {
    /// Synthetic result used by the operator `research <url>` surface.
    pub fn synthetic(url: &str) -> Self {
        SearchResult {
            id: 0,
            query_execution_id: 0,
            url: url.to_string(),
            canonical_url: url.to_string(),
            title: "Manual research".to_string(),
            snippet: String::new(),
            created_at: Utc::now(),
            url_validated: false,
            url_valid: None,
            final_url: Some(url.to_string()),
            content_type: None,
            hint_agency: None,
            hint_state: None,
            hint_due_date: None,
            research_status: ResearchStatus::Pending,
            promoted_rfp_id: None,
            duplicate_of_id: None,
        }
    }
}

/// Actions the research agent can take. Terminal actions set a terminal
/// status and appear exactly once, as the highest step number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    FetchPage,
    ExtractDetails,
    DiscoverPdfs,
    MarkComplete,
    MarkNeedsManual,
    MarkLoginRequired,
    GiveUp,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::FetchPage => "fetch_page",
            StepAction::ExtractDetails => "extract_details",
            StepAction::DiscoverPdfs => "discover_pdfs",
            StepAction::MarkComplete => "mark_complete",
            StepAction::MarkNeedsManual => "mark_needs_manual",
            StepAction::MarkLoginRequired => "mark_login_required",
            StepAction::GiveUp => "give_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepAction::MarkComplete
                | StepAction::MarkNeedsManual
                | StepAction::MarkLoginRequired
                | StepAction::GiveUp
        )
    }
}

/// One recorded step of the research agent. `step_number` is dense and
/// monotonic per search result, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStep {
    pub search_result_id: i64,
    pub step_number: i32,
    pub action: StepAction,
    pub input_summary: String,
    pub output_summary: String,
    pub reasoning: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub tokens_used: Option<i64>,
}

/// Structured RFP fields produced by the extraction call. Wire field names
/// are contractual with the provider schema; any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default, rename = "location_city")]
    pub city: Option<String>,
    #[serde(default, rename = "location_state")]
    pub state: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub scope_summary: Option<String>,
    #[serde(default)]
    pub estimated_value: Option<String>,
    #[serde(default)]
    pub incumbent: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub venue_type: Option<String>,
}

impl ExtractedDetails {
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A discovered RFP opportunity, the canonical record the pipeline produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rfp {
    pub id: i64,
    pub title: String,
    pub agency: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,

    pub source_url: Option<String>,
    pub portal: Option<String>,
    pub portal_id: Option<String>,

    pub posted_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,

    pub category: Option<String>,
    pub venue_type: Option<String>,
    pub scope_keywords: Vec<String>,

    pub term_months: Option<i32>,
    pub estimated_value: Option<f64>,
    pub incumbent: Option<String>,

    pub login_required: bool,
    pub login_notes: Option<String>,

    pub pdf_urls: Vec<String>,

    pub raw_content: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Insert payload for a new RFP; the store assigns id and discovery time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RfpDraft {
    pub title: String,
    pub agency: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub source_url: Option<String>,
    pub portal: Option<String>,
    pub portal_id: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub venue_type: Option<String>,
    pub scope_keywords: Vec<String>,
    pub term_months: Option<i32>,
    pub estimated_value: Option<f64>,
    pub incumbent: Option<String>,
    pub login_required: bool,
    pub login_notes: Option<String>,
    pub pdf_urls: Vec<String>,
    pub raw_content: Option<String>,
}
