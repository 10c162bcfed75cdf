//! The dedup gate between a completed extraction and an RFP insert.
//!
//! One corpus snapshot is loaded per cycle; RFPs inserted during the cycle
//! are pushed into the shared candidate set so later results in the same
//! cycle dedup against them too. The matcher lock is held across the
//! check-then-insert sequence, which is what actually enforces the
//! one-RFP-per-(agency, state, due date) cluster rule under fan-out.

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};

use bidscout_core::matcher::{normalize_date, normalize_state, Matcher};
use bidscout_core::model::{ExtractedDetails, Rfp, RfpDraft};
use bidscout_net::portal_for_url;
use bidscout_research::ResearchReport;

pub struct Deduper {
    matcher: Mutex<Matcher>,
}

impl Deduper {
    pub fn new(corpus: Vec<Rfp>) -> Self {
        let active: Vec<Rfp> = corpus.into_iter().filter(|r| r.is_active).collect();
        Deduper {
            matcher: Mutex::new(Matcher::new(active)),
        }
    }

    /// Take the candidate set for one check-then-insert sequence.
    pub async fn begin(&self) -> MutexGuard<'_, Matcher> {
        self.matcher.lock().await
    }
}

/// Build the canonical RFP record from a finished research run.
pub fn build_draft(details: &ExtractedDetails, report: &ResearchReport) -> RfpDraft {
    let state = details
        .state
        .as_deref()
        .map(normalize_state)
        .filter(|s| !s.is_empty());
    let due_date = details.due_date.as_deref().and_then(normalize_date);

    RfpDraft {
        title: details.title.clone().unwrap_or_default(),
        agency: details.agency.clone().filter(|s| !s.trim().is_empty()),
        state,
        city: details.city.clone().filter(|s| !s.trim().is_empty()),
        source_url: Some(report.final_url.clone()),
        portal: portal_for_url(&report.final_url).map(str::to_string),
        portal_id: None,
        posted_date: None,
        due_date,
        category: details.category.clone().filter(|s| !s.trim().is_empty()),
        venue_type: details.venue_type.clone().filter(|s| !s.trim().is_empty()),
        scope_keywords: Vec::new(),
        term_months: None,
        estimated_value: details
            .estimated_value
            .as_deref()
            .and_then(parse_estimated_value),
        incumbent: details.incumbent.clone().filter(|s| !s.trim().is_empty()),
        login_required: false,
        login_notes: None,
        pdf_urls: report.found_pdfs.clone(),
        raw_content: Some(report.page_text.clone()).filter(|s| !s.is_empty()),
    }
}

/// The persisted record for an insert made this cycle, appended to the
/// candidate set.
pub fn inserted_rfp(id: i64, draft: &RfpDraft) -> Rfp {
    Rfp {
        id,
        title: draft.title.clone(),
        agency: draft.agency.clone(),
        state: draft.state.clone(),
        city: draft.city.clone(),
        source_url: draft.source_url.clone(),
        portal: draft.portal.clone(),
        portal_id: draft.portal_id.clone(),
        posted_date: draft.posted_date,
        due_date: draft.due_date,
        category: draft.category.clone(),
        venue_type: draft.venue_type.clone(),
        scope_keywords: draft.scope_keywords.clone(),
        term_months: draft.term_months,
        estimated_value: draft.estimated_value,
        incumbent: draft.incumbent.clone(),
        login_required: draft.login_required,
        login_notes: draft.login_notes.clone(),
        pdf_urls: draft.pdf_urls.clone(),
        raw_content: draft.raw_content.clone(),
        discovered_at: Utc::now(),
        last_checked: None,
        is_active: true,
    }
}

/// Best-effort parse of a free-form contract value ("$1,250,000", "1.2M").
pub fn parse_estimated_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (number, multiplier) = match cleaned.chars().last() {
        Some('m') | Some('M') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('k') | Some('K') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    number.parse::<f64>().ok().map(|v| v * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_research::AgentStatus;

    fn report_for(url: &str, pdfs: Vec<String>) -> ResearchReport {
        ResearchReport {
            result_id: 1,
            status: AgentStatus::Researched,
            steps_taken: 4,
            total_tokens: 0,
            extracted: None,
            found_pdfs: pdfs,
            page_text: "Request for Proposal".to_string(),
            final_url: url.to_string(),
            steps: vec![],
            cancelled: false,
        }
    }

    #[test]
    fn draft_normalizes_state_and_date() {
        let details = ExtractedDetails {
            title: Some("Parking Management RFP".to_string()),
            agency: Some("City of Springfield".to_string()),
            state: Some("Illinois".to_string()),
            due_date: Some("March 15, 2024".to_string()),
            estimated_value: Some("$1,250,000".to_string()),
            ..Default::default()
        };
        let report = report_for(
            "https://app.bonfirehub.com/portal/rfp/42",
            vec!["https://x.test/rfp.pdf".to_string()],
        );

        let draft = build_draft(&details, &report);
        assert_eq!(draft.state.as_deref(), Some("IL"));
        assert_eq!(draft.due_date, Some("2024-03-15".parse().unwrap()));
        assert_eq!(draft.portal.as_deref(), Some("bonfire"));
        assert_eq!(draft.estimated_value, Some(1_250_000.0));
        assert_eq!(draft.pdf_urls.len(), 1);
        assert_eq!(
            draft.source_url.as_deref(),
            Some("https://app.bonfirehub.com/portal/rfp/42")
        );
    }

    #[test]
    fn draft_drops_blank_fields() {
        let details = ExtractedDetails {
            title: Some("T".to_string()),
            agency: Some("  ".to_string()),
            state: Some("Nowhere".to_string()),
            ..Default::default()
        };
        let draft = build_draft(&details, &report_for("https://city.gov/rfp", vec![]));
        assert_eq!(draft.agency, None);
        assert_eq!(draft.state, None);
        assert_eq!(draft.portal, None);
        assert_eq!(draft.raw_content.as_deref(), Some("Request for Proposal"));
    }

    #[test]
    fn estimated_value_parsing() {
        assert_eq!(parse_estimated_value("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_estimated_value("1.2M"), Some(1_200_000.0));
        assert_eq!(parse_estimated_value("500k"), Some(500_000.0));
        assert_eq!(parse_estimated_value("750000"), Some(750_000.0));
        assert_eq!(parse_estimated_value("TBD"), None);
        assert_eq!(parse_estimated_value(""), None);
    }

    #[tokio::test]
    async fn check_then_insert_under_one_lock() {
        let deduper = Deduper::new(vec![]);

        {
            let mut matcher = deduper.begin().await;
            let miss = matcher.check_duplicate("City of Reno", "NV", "2024-05-01");
            assert!(!miss.found_match);

            let details = ExtractedDetails {
                title: Some("Event Parking".to_string()),
                agency: Some("City of Reno".to_string()),
                state: Some("NV".to_string()),
                due_date: Some("2024-05-01".to_string()),
                ..Default::default()
            };
            let draft = build_draft(&details, &report_for("https://reno.gov/rfp", vec![]));
            matcher.push(inserted_rfp(41, &draft));
        }

        let matcher = deduper.begin().await;
        let hit = matcher.check_duplicate("City of Reno", "NV", "2024-05-01");
        assert!(hit.found_match);
        assert_eq!(hit.rfp_id, Some(41));
    }
}
