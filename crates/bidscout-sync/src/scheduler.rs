//! The cycle coordinator: search, validate, research, dedup, PDF download.
//!
//! One cycle forms a single cancellation tree. Scheduler shutdown cancels
//! the cycle token; workers observe it between items, while in-flight I/O
//! runs to its own deadline. Nothing inside a cycle retries; failures leave
//! per-result state for the operator reset.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bidscout_core::model::{
    QueryStatus, QueryTemplate, ResearchStatus, SearchResult,
};
use bidscout_llm::{default_query_templates, LlmClient, LlmError};
use bidscout_net::{PdfDownloader, Validator};
use bidscout_research::{AgentStatus, ResearchAgent};
use bidscout_storage::{NewResult, SavedResult, Store};

use crate::config::SchedulerConfig;
use crate::dedup::{build_draft, inserted_rfp, Deduper};

/// How many pending results one cycle will pick up for research.
const RESEARCH_BATCH_LIMIT: i64 = 50;

/// Counters for one discovery cycle, emitted at completion.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycle_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub results_found: u64,
    pub results_new: u64,
    pub results_skipped: u64,
    pub validated: u64,
    pub validation_failed: u64,
    pub researched: u64,
    pub research_failed: u64,
    pub duplicates_linked: u64,
    pub rfps_promoted: u64,
    pub pdfs_stored: u64,
    /// The cycle observed cancellation and stopped early.
    pub cancelled: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<Store>,
    llm: Arc<LlmClient>,
    validator: Arc<Validator>,
    agent: Arc<ResearchAgent>,
    pdfs: Arc<PdfDownloader>,
    running: Mutex<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<LlmClient>,
        validator: Arc<Validator>,
        agent: Arc<ResearchAgent>,
        pdfs: Arc<PdfDownloader>,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler {
            config,
            store,
            llm,
            validator,
            agent,
            pdfs,
            running: Mutex::new(false),
        }
    }

    /// Run cycles on the configured interval until `shutdown` is cancelled.
    /// Returns after the ticker stops and any in-progress cycle has exited.
    pub async fn run(&self, shutdown: CancellationToken) {
        {
            let mut running = self.running.lock().expect("running flag");
            if *running {
                warn!("scheduler already running");
                return;
            }
            *running = true;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            run_on_start = self.config.run_on_start,
            max_concurrency = self.config.max_concurrency,
            "scheduler started"
        );

        if self.config.run_on_start && !shutdown.is_cancelled() {
            self.run_cycle(&shutdown).await;
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately; consume it so
        // the loop waits a full period after the run-on-start cycle.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => self.run_cycle(&shutdown).await,
            }
        }

        *self.running.lock().expect("running flag") = false;
    }

    /// Execute a single cycle (manual runs and tests).
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleStats> {
        self.execute_cycle(cancel).await
    }

    async fn run_cycle(&self, shutdown: &CancellationToken) {
        let cycle = shutdown.child_token();

        // Watchdog enforces the cycle deadline through the same token the
        // shutdown path uses.
        let deadline = self.config.cycle_timeout;
        let watchdog_token = cycle.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("cycle timeout reached, cancelling");
            watchdog_token.cancel();
        });

        info!("starting scheduled discovery cycle");
        let outcome = self.execute_cycle(&cycle).await;
        watchdog.abort();

        match outcome {
            Ok(stats) if stats.cancelled => {
                info!("discovery cycle cancelled before completion");
            }
            Ok(stats) => {
                info!(
                    cycle_id = %stats.cycle_id.unwrap_or_default(),
                    queries_executed = stats.queries_executed,
                    queries_failed = stats.queries_failed,
                    results_found = stats.results_found,
                    results_new = stats.results_new,
                    results_skipped = stats.results_skipped,
                    validated = stats.validated,
                    validation_failed = stats.validation_failed,
                    researched = stats.researched,
                    research_failed = stats.research_failed,
                    duplicates_linked = stats.duplicates_linked,
                    rfps_promoted = stats.rfps_promoted,
                    pdfs_stored = stats.pdfs_stored,
                    "discovery cycle complete"
                );
            }
            Err(err) => error!(error = %format!("{err:#}"), "discovery cycle failed"),
        }
    }

    async fn execute_cycle(&self, cancel: &CancellationToken) -> Result<CycleStats> {
        let mut stats = CycleStats {
            cycle_id: Some(Uuid::new_v4()),
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let templates = self
            .store
            .load_enabled_query_templates()
            .await
            .context("loading query templates")?;
        let templates = if templates.is_empty() {
            debug!("no templates configured, using built-in defaults");
            default_query_templates()
        } else {
            templates
        };
        info!(count = templates.len(), "loaded query templates");

        let new_results = self.search_phase(cancel, &templates, &mut stats).await;
        if !stats.cancelled {
            self.validation_phase(cancel, &new_results, &mut stats).await;
        }
        if !stats.cancelled {
            self.research_phase(cancel, &mut stats).await?;
        }

        stats.finished_at = Some(Utc::now());
        Ok(stats)
    }

    /// Sequential grounded searches with pacing; each query's results are
    /// written atomically, and one bad query never stops the loop.
    async fn search_phase(
        &self,
        cancel: &CancellationToken,
        templates: &[QueryTemplate],
        stats: &mut CycleStats,
    ) -> Vec<SavedResult> {
        let mut all_new: Vec<SavedResult> = Vec::new();

        'templates: for template in templates.iter().filter(|t| t.enabled) {
            for query in expand_query(&template.text, &self.config.target_states) {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break 'templates;
                }

                match self.run_search_query(cancel, &query, template, stats).await {
                    QueryOutcome::Saved(saved) => all_new.extend(saved),
                    QueryOutcome::Nothing => {}
                    QueryOutcome::Cancelled => {
                        stats.cancelled = true;
                        break 'templates;
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        stats.cancelled = true;
                        break 'templates;
                    }
                    _ = tokio::time::sleep(self.config.query_delay) => {}
                }
            }
        }

        info!(
            queries_executed = stats.queries_executed,
            queries_failed = stats.queries_failed,
            results_found = stats.results_found,
            results_new = stats.results_new,
            results_skipped = stats.results_skipped,
            "search phase complete"
        );

        all_new
    }

    /// One grounded search: dedup against seen URLs, persist the execution
    /// and its new results in a single transaction.
    async fn run_search_query(
        &self,
        cancel: &CancellationToken,
        query: &str,
        template: &QueryTemplate,
        stats: &mut CycleStats,
    ) -> QueryOutcome {
        debug!(name = %template.name, query, "executing search query");
        let outcome = match self.llm.grounded_search(cancel, query).await {
            Ok(outcome) => outcome,
            Err(LlmError::Cancelled) => return QueryOutcome::Cancelled,
            Err(err) => {
                warn!(name = %template.name, error = %err, "search query failed");
                stats.queries_failed += 1;
                return QueryOutcome::Nothing;
            }
        };

        stats.queries_executed += 1;
        stats.results_found += outcome.hits.len() as u64;
        let template_id = (template.id != 0).then_some(template.id);

        if outcome.hits.is_empty() {
            if let Err(err) = self
                .store
                .save_empty_query(query, template_id, QueryStatus::Completed)
                .await
            {
                warn!(error = %err, "failed to save empty query");
            }
            return QueryOutcome::Nothing;
        }

        let mut fresh: Vec<NewResult> = outcome
            .hits
            .iter()
            .map(|hit| NewResult {
                url: hit.url.clone(),
                canonical_url: hit.url.clone(),
                title: hit.title.clone(),
                snippet: hit.snippet.clone(),
            })
            .collect();

        if self.config.skip_seen_urls {
            let canonicals: Vec<String> = fresh.iter().map(|r| r.canonical_url.clone()).collect();
            match self.store.url_exists_batch(&canonicals).await {
                Ok(existing) => {
                    let before = fresh.len();
                    fresh.retain(|r| !existing.contains(&r.canonical_url));
                    stats.results_skipped += (before - fresh.len()) as u64;
                }
                Err(err) => {
                    // Keep everything; the unique constraint is the backstop.
                    warn!(error = %err, "failed to check existing URLs");
                }
            }
        }

        stats.results_new += fresh.len() as u64;
        if fresh.is_empty() {
            debug!(name = %template.name, "all results already seen");
            return QueryOutcome::Nothing;
        }

        match self
            .store
            .save_query_and_results(query, template_id, &fresh, QueryStatus::Completed)
            .await
        {
            Ok((_, saved)) => {
                debug!(
                    name = %template.name,
                    found = outcome.hits.len(),
                    new = saved.len(),
                    "search completed"
                );
                QueryOutcome::Saved(saved)
            }
            Err(err) => {
                warn!(name = %template.name, error = %err, "failed to save query results");
                QueryOutcome::Nothing
            }
        }
    }

    /// Fan the new results across the worker semaphore. Cancellation stops
    /// dispatch; already-spawned validations finish and are persisted.
    async fn validation_phase(
        &self,
        cancel: &CancellationToken,
        results: &[SavedResult],
        stats: &mut CycleStats,
    ) {
        if results.is_empty() {
            debug!("no results to validate");
            return;
        }
        info!(count = results.len(), "starting validation phase");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut workers: JoinSet<bool> = JoinSet::new();

        for result in results {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    stats.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore never closed")
                }
            };

            let validator = Arc::clone(&self.validator);
            let store = Arc::clone(&self.store);
            let delay = self.config.validation_delay;
            let result = result.clone();

            workers.spawn(async move {
                let validation = validator.validate(&result.url).await;

                if let Err(err) = store
                    .update_validation(
                        result.id,
                        validation.valid,
                        &validation.final_url,
                        validation.content_type,
                    )
                    .await
                {
                    warn!(url = %result.url, error = %err, "failed to update validation");
                }

                debug!(
                    url = %result.url,
                    valid = validation.valid,
                    status = validation.status.as_str(),
                    "validated url"
                );

                tokio::time::sleep(delay).await;
                drop(permit);
                validation.valid
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => stats.validated += 1,
                Ok(false) => stats.validation_failed += 1,
                Err(err) => warn!(error = %err, "validation worker panicked"),
            }
        }

        info!(
            validated = stats.validated,
            failed = stats.validation_failed,
            "validation phase complete"
        );
    }

    /// Research every pending, valid, researchable result: drive the agent,
    /// persist its step log, dedup, and promote or link.
    async fn research_phase(
        &self,
        cancel: &CancellationToken,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let pending = self
            .store
            .list_pending_research(RESEARCH_BATCH_LIMIT)
            .await
            .context("listing pending research")?;

        let (queue, skipped): (Vec<SearchResult>, Vec<SearchResult>) = pending
            .into_iter()
            .partition(|r| r.content_type.is_some_and(|c| c.researchable()));

        // Valid but unresearchable pages (plain PDFs, misc content) are
        // closed out so the pending queue drains.
        for result in &skipped {
            mark(&self.store, result.id, ResearchStatus::Skipped).await;
        }

        if queue.is_empty() {
            debug!("no results to research");
            return Ok(());
        }
        info!(count = queue.len(), "starting research phase");

        let corpus = self
            .store
            .load_rfp_corpus_for_dedup()
            .await
            .context("loading dedup corpus")?;
        let deduper = Arc::new(Deduper::new(corpus));

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();

        for result in queue {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    stats.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore never closed")
                }
            };

            let store = Arc::clone(&self.store);
            let agent = Arc::clone(&self.agent);
            let pdfs = Arc::clone(&self.pdfs);
            let deduper = Arc::clone(&deduper);
            let cancel = cancel.clone();

            workers.spawn(async move {
                let outcome =
                    research_one(&store, &agent, &pdfs, &deduper, &cancel, result).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    stats.researched += outcome.researched as u64;
                    stats.research_failed += outcome.failed as u64;
                    stats.duplicates_linked += outcome.linked_duplicate as u64;
                    stats.rfps_promoted += outcome.promoted as u64;
                    stats.pdfs_stored += outcome.pdfs_stored;
                }
                Err(err) => warn!(error = %err, "research worker panicked"),
            }
        }

        info!(
            researched = stats.researched,
            research_failed = stats.research_failed,
            duplicates_linked = stats.duplicates_linked,
            rfps_promoted = stats.rfps_promoted,
            pdfs_stored = stats.pdfs_stored,
            "research phase complete"
        );

        Ok(())
    }
}

enum QueryOutcome {
    Saved(Vec<SavedResult>),
    Nothing,
    Cancelled,
}

/// Expand a `{state}` placeholder across the configured target states.
/// Templates without the placeholder, or with no states configured, run as
/// written.
fn expand_query(text: &str, states: &[String]) -> Vec<String> {
    if !text.contains("{state}") || states.is_empty() {
        return vec![text.to_string()];
    }
    states
        .iter()
        .map(|state| text.replace("{state}", state))
        .collect()
}

#[derive(Debug, Default)]
struct WorkerOutcome {
    researched: bool,
    failed: bool,
    linked_duplicate: bool,
    promoted: bool,
    pdfs_stored: u64,
}

/// One result through agent, dedup, and promotion. Errors are isolated to
/// this result and recorded on its row.
async fn research_one(
    store: &Store,
    agent: &ResearchAgent,
    pdfs: &PdfDownloader,
    deduper: &Deduper,
    cancel: &CancellationToken,
    result: SearchResult,
) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::default();

    if let Err(err) = store
        .update_research_status(result.id, ResearchStatus::InProgress)
        .await
    {
        warn!(result_id = result.id, error = %err, "failed to mark in_progress");
    }

    let report = agent.research(cancel, &result).await;

    if report.cancelled {
        // Put the row back so the next cycle retries from scratch.
        if let Err(err) = store
            .update_research_status(result.id, ResearchStatus::Pending)
            .await
        {
            warn!(result_id = result.id, error = %err, "failed to reset cancelled research");
        }
        return outcome;
    }

    if let Err(err) = store.append_research_steps(&report.steps).await {
        warn!(result_id = result.id, error = %err, "failed to persist research steps");
    }

    match report.status {
        AgentStatus::Researched => {
            let Some(details) = report.extracted.as_ref() else {
                // Terminal "researched" without details should not happen;
                // keep the row visible to the operator.
                mark(store, result.id, ResearchStatus::Failed).await;
                outcome.failed = true;
                return outcome;
            };
            outcome.researched = true;

            let agency = details.agency.clone().unwrap_or_default();
            let state = details.state.clone().unwrap_or_default();
            let due_date = details.due_date.clone().unwrap_or_default();

            let mut matcher = deduper.begin().await;
            let matched = matcher.check_duplicate(&agency, &state, &due_date);

            if matched.found_match {
                let rfp_id = matched.rfp_id.expect("match carries an id");
                drop(matcher);
                info!(
                    result_id = result.id,
                    rfp_id,
                    score = matched.score,
                    "duplicate of existing rfp"
                );
                match store.link_duplicate(result.id, rfp_id).await {
                    Ok(()) => outcome.linked_duplicate = true,
                    Err(err) => {
                        warn!(result_id = result.id, error = %err, "failed to link duplicate");
                        mark(store, result.id, ResearchStatus::Failed).await;
                        outcome.failed = true;
                    }
                }
                return outcome;
            }

            let draft = build_draft(details, &report);
            match store.insert_rfp(&draft).await {
                Ok(rfp_id) => {
                    matcher.push(inserted_rfp(rfp_id, &draft));
                    drop(matcher);
                    info!(result_id = result.id, rfp_id, title = %draft.title, "promoted new rfp");
                    if let Err(err) = store.mark_promoted(result.id, rfp_id).await {
                        warn!(result_id = result.id, error = %err, "failed to record promotion");
                    }
                    outcome.promoted = true;

                    if !report.found_pdfs.is_empty() {
                        let stored = pdfs.download_all(&report.found_pdfs, rfp_id).await;
                        outcome.pdfs_stored +=
                            stored.iter().filter(|o| o.error.is_none()).count() as u64;
                    }
                }
                Err(err) => {
                    drop(matcher);
                    warn!(result_id = result.id, error = %err, "failed to insert rfp");
                    mark(store, result.id, ResearchStatus::Failed).await;
                    outcome.failed = true;
                }
            }
        }
        AgentStatus::NeedsManualUpload => {
            // Login-walled: automation is done with this result; documents
            // arrive by hand.
            outcome.researched = true;
            mark(store, result.id, ResearchStatus::Completed).await;
        }
        AgentStatus::NeedsManual => {
            mark(store, result.id, ResearchStatus::NeedsManual).await;
        }
        AgentStatus::Exhausted => {
            mark(store, result.id, ResearchStatus::ResearchExhausted).await;
        }
        AgentStatus::Failed | AgentStatus::Researching => {
            mark(store, result.id, ResearchStatus::Failed).await;
            outcome.failed = true;
        }
    }

    outcome
}

async fn mark(store: &Store, result_id: i64, status: ResearchStatus) {
    if let Err(err) = store.update_research_status(result_id, status).await {
        warn!(result_id, status = status.as_str(), error = %err, "failed to update research status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_templates_expand_per_state() {
        let states = vec!["IL".to_string(), "FL".to_string()];
        assert_eq!(
            expand_query("parking RFP {state}", &states),
            vec!["parking RFP IL".to_string(), "parking RFP FL".to_string()]
        );
        assert_eq!(
            expand_query("parking RFP", &states),
            vec!["parking RFP".to_string()]
        );
        assert_eq!(
            expand_query("parking RFP {state}", &[]),
            vec!["parking RFP {state}".to_string()]
        );
    }

    #[test]
    fn cycle_stats_default_is_zeroed() {
        let stats = CycleStats::default();
        assert_eq!(stats.queries_executed, 0);
        assert_eq!(stats.results_new, 0);
        assert_eq!(stats.validated, 0);
        assert!(!stats.cancelled);
        assert!(stats.cycle_id.is_none());
    }

    #[test]
    fn worker_outcome_counts_map_to_stats() {
        let mut stats = CycleStats::default();
        let outcomes = [
            WorkerOutcome {
                researched: true,
                promoted: true,
                pdfs_stored: 2,
                ..Default::default()
            },
            WorkerOutcome {
                researched: true,
                linked_duplicate: true,
                ..Default::default()
            },
            WorkerOutcome {
                failed: true,
                ..Default::default()
            },
        ];
        for outcome in &outcomes {
            stats.researched += outcome.researched as u64;
            stats.research_failed += outcome.failed as u64;
            stats.duplicates_linked += outcome.linked_duplicate as u64;
            stats.rfps_promoted += outcome.promoted as u64;
            stats.pdfs_stored += outcome.pdfs_stored;
        }
        assert_eq!(stats.researched, 2);
        assert_eq!(stats.research_failed, 1);
        assert_eq!(stats.duplicates_linked, 1);
        assert_eq!(stats.rfps_promoted, 1);
        assert_eq!(stats.pdfs_stored, 2);
    }
}
