//! Idempotent schema bootstrap, run once at startup.

use sqlx::PgPool;

use crate::store::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS query_templates (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        query_text TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS query_executions (
        id BIGSERIAL PRIMARY KEY,
        template_id BIGINT REFERENCES query_templates(id),
        query_text TEXT NOT NULL,
        executed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        results_count BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'running'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS search_results (
        id BIGSERIAL PRIMARY KEY,
        query_execution_id BIGINT NOT NULL REFERENCES query_executions(id),
        url TEXT NOT NULL,
        canonical_url TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL DEFAULT '',
        snippet TEXT NOT NULL DEFAULT '',
        url_validated BOOLEAN NOT NULL DEFAULT FALSE,
        url_valid BOOLEAN,
        final_url TEXT,
        content_type TEXT,
        hint_agency TEXT,
        hint_state TEXT,
        hint_due_date DATE,
        research_status TEXT NOT NULL DEFAULT 'pending',
        promoted_rfp_id BIGINT,
        duplicate_of_id BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_search_results_pending
        ON search_results (created_at)
        WHERE research_status = 'pending' AND url_validated AND url_valid
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_steps (
        id BIGSERIAL PRIMARY KEY,
        search_result_id BIGINT NOT NULL REFERENCES search_results(id),
        step_number INT NOT NULL,
        action TEXT NOT NULL,
        input_summary TEXT NOT NULL DEFAULT '',
        output_summary TEXT NOT NULL DEFAULT '',
        reasoning TEXT NOT NULL DEFAULT '',
        success BOOLEAN NOT NULL DEFAULT FALSE,
        error_message TEXT,
        duration_ms BIGINT NOT NULL DEFAULT 0,
        tokens_used BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (search_result_id, step_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rfps (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        agency TEXT,
        state TEXT,
        city TEXT,
        source_url TEXT,
        portal TEXT,
        portal_id TEXT,
        posted_date DATE,
        due_date DATE,
        category TEXT,
        venue_type TEXT,
        scope_keywords TEXT[] NOT NULL DEFAULT '{}',
        term_months INT,
        estimated_value DOUBLE PRECISION,
        incumbent TEXT,
        login_required BOOLEAN NOT NULL DEFAULT FALSE,
        login_notes TEXT,
        pdf_urls TEXT[] NOT NULL DEFAULT '{}',
        raw_content TEXT,
        discovered_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_checked TIMESTAMPTZ,
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_rfps_active ON rfps (id) WHERE is_active
    "#,
];

pub async fn run(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
