//! Relational store. All multi-row logical writes go through one
//! transaction; the scheduler never writes rows directly.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

use bidscout_core::model::{
    PageKind, QueryStatus, QueryTemplate, ResearchStatus, ResearchStep, Rfp, RfpDraft,
    SearchResult,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A search hit ready for insertion (already canonicalized and deduped).
#[derive(Debug, Clone)]
pub struct NewResult {
    pub url: String,
    pub canonical_url: String,
    pub title: String,
    pub snippet: String,
}

/// A freshly inserted search result, as handed to the validation phase.
#[derive(Debug, Clone)]
pub struct SavedResult {
    pub id: i64,
    pub url: String,
    pub canonical_url: String,
    pub title: String,
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect, verify the connection, and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        crate::migrations::run(&pool).await?;
        Ok(Store { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Store { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_enabled_query_templates(&self) -> Result<Vec<QueryTemplate>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, query_text, enabled, created_at
             FROM query_templates WHERE enabled ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueryTemplate {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    text: row.try_get("query_text")?,
                    enabled: row.try_get("enabled")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Record a query execution that produced nothing worth inserting.
    pub async fn save_empty_query(
        &self,
        text: &str,
        template_id: Option<i64>,
        status: QueryStatus,
    ) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO query_executions (template_id, query_text, results_count, status)
             VALUES ($1, $2, 0, $3) RETURNING id",
        )
        .bind(template_id)
        .bind(text)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Insert a query execution and all of its new results in one
    /// transaction. A failure rolls back the whole template's batch.
    pub async fn save_query_and_results(
        &self,
        text: &str,
        template_id: Option<i64>,
        results: &[NewResult],
        status: QueryStatus,
    ) -> Result<(i64, Vec<SavedResult>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let query_id: i64 = sqlx::query_scalar(
            "INSERT INTO query_executions (template_id, query_text, results_count, status)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(template_id)
        .bind(text)
        .bind(results.len() as i64)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut saved = Vec::with_capacity(results.len());
        for result in results {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO search_results (query_execution_id, url, canonical_url, title, snippet)
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(query_id)
            .bind(&result.url)
            .bind(&result.canonical_url)
            .bind(&result.title)
            .bind(&result.snippet)
            .fetch_one(&mut *tx)
            .await?;
            saved.push(SavedResult {
                id,
                url: result.url.clone(),
                canonical_url: result.canonical_url.clone(),
                title: result.title.clone(),
            });
        }

        tx.commit().await?;
        debug!(query_id, results = saved.len(), "saved query batch");
        Ok((query_id, saved))
    }

    /// Which of the given canonical URLs already exist.
    pub async fn url_exists_batch(
        &self,
        canonical_urls: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if canonical_urls.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            "SELECT canonical_url FROM search_results WHERE canonical_url = ANY($1)",
        )
        .bind(canonical_urls)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("canonical_url")?))
            .collect()
    }

    pub async fn update_validation(
        &self,
        result_id: i64,
        valid: bool,
        final_url: &str,
        content_type: Option<PageKind>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE search_results
             SET url_validated = TRUE, url_valid = $2, final_url = $3, content_type = $4
             WHERE id = $1",
        )
        .bind(result_id)
        .bind(valid)
        .bind(final_url)
        .bind(content_type.map(|c| c.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_research_status(
        &self,
        result_id: i64,
        status: ResearchStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE search_results SET research_status = $2 WHERE id = $1")
            .bind(result_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Operator reset: flip the most recent failed results back to pending.
    pub async fn reset_failed_research(&self, limit: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE search_results SET research_status = 'pending'
             WHERE id IN (
                 SELECT id FROM search_results
                 WHERE research_status = 'failed'
                 ORDER BY created_at DESC
                 LIMIT $1
             )",
        )
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Persist a single research step.
    pub async fn append_research_step(&self, step: &ResearchStep) -> Result<(), StoreError> {
        self.append_research_steps(std::slice::from_ref(step)).await
    }

    /// Persist a full step log for one result in one transaction.
    pub async fn append_research_steps(&self, steps: &[ResearchStep]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for step in steps {
            sqlx::query(
                "INSERT INTO research_steps
                 (search_result_id, step_number, action, input_summary, output_summary,
                  reasoning, success, error_message, duration_ms, tokens_used)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(step.search_result_id)
            .bind(step.step_number)
            .bind(step.action.as_str())
            .bind(&step.input_summary)
            .bind(&step.output_summary)
            .bind(&step.reasoning)
            .bind(step.success)
            .bind(&step.error)
            .bind(step.duration_ms)
            .bind(step.tokens_used)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Validated, valid results still waiting for research, oldest first.
    pub async fn list_pending_research(&self, limit: i64) -> Result<Vec<SearchResult>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, query_execution_id, url, canonical_url, title, snippet,
                    url_validated, url_valid, final_url, content_type,
                    hint_agency, hint_state, hint_due_date,
                    research_status, promoted_rfp_id, duplicate_of_id, created_at
             FROM search_results
             WHERE research_status = 'pending' AND url_validated AND url_valid
             ORDER BY created_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_search_result).collect()
    }

    pub async fn insert_rfp(&self, draft: &RfpDraft) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO rfps
             (title, agency, state, city, source_url, portal, portal_id,
              posted_date, due_date, category, venue_type, scope_keywords,
              term_months, estimated_value, incumbent, login_required,
              login_notes, pdf_urls, raw_content)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                     $13, $14, $15, $16, $17, $18, $19)
             RETURNING id",
        )
        .bind(&draft.title)
        .bind(&draft.agency)
        .bind(&draft.state)
        .bind(&draft.city)
        .bind(&draft.source_url)
        .bind(&draft.portal)
        .bind(&draft.portal_id)
        .bind(draft.posted_date)
        .bind(draft.due_date)
        .bind(&draft.category)
        .bind(&draft.venue_type)
        .bind(&draft.scope_keywords)
        .bind(draft.term_months)
        .bind(draft.estimated_value)
        .bind(&draft.incumbent)
        .bind(draft.login_required)
        .bind(&draft.login_notes)
        .bind(&draft.pdf_urls)
        .bind(&draft.raw_content)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Mark a result as a duplicate of an existing RFP and close it out.
    pub async fn link_duplicate(&self, result_id: i64, rfp_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE search_results
             SET duplicate_of_id = $2, research_status = 'completed'
             WHERE id = $1",
        )
        .bind(result_id)
        .bind(rfp_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the RFP a result was promoted into.
    pub async fn mark_promoted(&self, result_id: i64, rfp_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE search_results
             SET promoted_rfp_id = $2, research_status = 'completed'
             WHERE id = $1",
        )
        .bind(result_id)
        .bind(rfp_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active RFPs only; the dedup corpus snapshot for one cycle.
    pub async fn load_rfp_corpus_for_dedup(&self) -> Result<Vec<Rfp>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, title, agency, state, city, source_url, portal, portal_id,
                    posted_date, due_date, category, venue_type, scope_keywords,
                    term_months, estimated_value, incumbent, login_required,
                    login_notes, pdf_urls, raw_content, discovered_at, last_checked,
                    is_active
             FROM rfps WHERE is_active ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rfp).collect()
    }
}

fn row_to_search_result(row: &PgRow) -> Result<SearchResult, StoreError> {
    let status: String = row.try_get("research_status")?;
    let research_status = ResearchStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown research_status {status:?}")))?;
    let content_type: Option<String> = row.try_get("content_type")?;
    let content_type = match content_type.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            PageKind::parse(s)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown content_type {s:?}")))?,
        ),
    };

    Ok(SearchResult {
        id: row.try_get("id")?,
        query_execution_id: row.try_get("query_execution_id")?,
        url: row.try_get("url")?,
        canonical_url: row.try_get("canonical_url")?,
        title: row.try_get("title")?,
        snippet: row.try_get("snippet")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        url_validated: row.try_get("url_validated")?,
        url_valid: row.try_get("url_valid")?,
        final_url: row.try_get("final_url")?,
        content_type,
        hint_agency: row.try_get("hint_agency")?,
        hint_state: row.try_get("hint_state")?,
        hint_due_date: row.try_get::<Option<NaiveDate>, _>("hint_due_date")?,
        research_status,
        promoted_rfp_id: row.try_get("promoted_rfp_id")?,
        duplicate_of_id: row.try_get("duplicate_of_id")?,
    })
}

fn row_to_rfp(row: &PgRow) -> Result<Rfp, StoreError> {
    Ok(Rfp {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        agency: row.try_get("agency")?,
        state: row.try_get("state")?,
        city: row.try_get("city")?,
        source_url: row.try_get("source_url")?,
        portal: row.try_get("portal")?,
        portal_id: row.try_get("portal_id")?,
        posted_date: row.try_get("posted_date")?,
        due_date: row.try_get("due_date")?,
        category: row.try_get("category")?,
        venue_type: row.try_get("venue_type")?,
        scope_keywords: row.try_get("scope_keywords")?,
        term_months: row.try_get("term_months")?,
        estimated_value: row.try_get("estimated_value")?,
        incumbent: row.try_get("incumbent")?,
        login_required: row.try_get("login_required")?,
        login_notes: row.try_get("login_notes")?,
        pdf_urls: row.try_get("pdf_urls")?,
        raw_content: row.try_get("raw_content")?,
        discovered_at: row.try_get("discovered_at")?,
        last_checked: row.try_get("last_checked")?,
        is_active: row.try_get("is_active")?,
    })
}
