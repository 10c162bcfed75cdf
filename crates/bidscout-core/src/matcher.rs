//! Fuzzy matching of extraction hints against the known RFP corpus.
//!
//! Agency identity is the gate: no agency hint, no match. State and due date
//! refine the score. Agencies are compared after aggressive normalization
//! ("City of Springfield", "Springfield, City of" and "springfield" all
//! collapse to the same key), then exact / containment / Levenshtein-ratio
//! checks decide whether two names refer to the same issuer.

use chrono::NaiveDate;

use crate::model::Rfp;

/// Minimum combined score to treat a candidate as the same RFP.
pub const MATCH_THRESHOLD: f64 = 0.70;

/// Minimum Levenshtein similarity for agency names to be considered equal.
pub const AGENCY_SIMILARITY_THRESHOLD: f64 = 0.80;

/// Due dates within this many days count as the same solicitation.
pub const DATE_TOLERANCE_DAYS: i64 = 3;

const WEIGHT_AGENCY: f64 = 0.5;
const WEIGHT_STATE: f64 = 0.2;
const WEIGHT_DATE: f64 = 0.3;

const AGENCY_PREFIXES: &[&str] = &["city of", "town of", "county of", "state of", "village of"];

const STATE_CODES: &[(&str, &str)] = &[
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW HAMPSHIRE", "NH"),
    ("NEW JERSEY", "NJ"),
    ("NEW MEXICO", "NM"),
    ("NEW YORK", "NY"),
    ("NORTH CAROLINA", "NC"),
    ("NORTH DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE ISLAND", "RI"),
    ("SOUTH CAROLINA", "SC"),
    ("SOUTH DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
    ("DISTRICT OF COLUMBIA", "DC"),
];

/// Outcome of a duplicate check against the corpus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub found_match: bool,
    pub rfp_id: Option<i64>,
    pub rfp_title: Option<String>,
    pub score: f64,
    pub reason: Option<String>,
    pub candidates_checked: usize,
}

/// Normalize an agency name for comparison: lowercase, strip the common
/// municipal prefixes, rewrite the `"Tampa, City of"` form, drop everything
/// but alphanumerics and spaces, collapse whitespace.
pub fn normalize_agency(agency: &str) -> String {
    let mut normalized = agency.trim().to_lowercase();

    for prefix in AGENCY_PREFIXES {
        if let Some(rest) = normalized.strip_prefix(&format!("{prefix} ")) {
            normalized = rest.trim().to_string();
            break;
        }
    }

    if let Some((head, tail)) = normalized.split_once(',') {
        let tail = tail.trim();
        if matches!(tail, "city of" | "town of" | "county of" | "village of") {
            normalized = head.trim().to_string();
        }
    }

    let filtered: String = normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a state hint to a 2-letter code, or empty when unrecognized.
pub fn normalize_state(state: &str) -> String {
    let state = state.trim().to_uppercase();
    if state.is_empty() {
        return String::new();
    }
    if state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()) {
        return state;
    }
    STATE_CODES
        .iter()
        .find(|(name, _)| *name == state)
        .map(|(_, code)| (*code).to_string())
        .unwrap_or_default()
}

/// Parse a free-form due-date hint, trying the formats seen in the wild.
pub fn normalize_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
        "%Y/%m/%d",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
}

/// Fuzzy agency equality: exact, containment, or Levenshtein ratio >= 0.80.
/// Symmetric in its arguments; empty strings never match.
pub fn agency_matches(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(b) || b.contains(a) {
        return true;
    }
    strsim::normalized_levenshtein(a, b) >= AGENCY_SIMILARITY_THRESHOLD
}

/// True when two due dates fall within the tolerance window.
pub fn dates_match(a: NaiveDate, b: NaiveDate) -> bool {
    (a - b).num_days().abs() <= DATE_TOLERANCE_DAYS
}

/// Duplicate matcher over a corpus snapshot of active RFPs.
pub struct Matcher {
    corpus: Vec<Rfp>,
}

impl Matcher {
    pub fn new(corpus: Vec<Rfp>) -> Self {
        Matcher { corpus }
    }

    /// Add an RFP inserted during the current cycle so later checks see it.
    pub fn push(&mut self, rfp: Rfp) {
        self.corpus.push(rfp);
    }

    /// Check extraction hints against the corpus. Returns the best-scoring
    /// candidate at or above the threshold; ties go to the lowest RFP id.
    pub fn check_duplicate(&self, agency: &str, state: &str, due_date: &str) -> MatchResult {
        if agency.trim().is_empty() {
            return MatchResult {
                reason: Some("No agency hint available".to_string()),
                ..Default::default()
            };
        }

        let agency = normalize_agency(agency);
        let state = normalize_state(state);
        let date = normalize_date(due_date);

        let mut candidates: Vec<&Rfp> = self
            .corpus
            .iter()
            .filter(|rfp| {
                let rfp_state = rfp.state.as_deref().map(normalize_state).unwrap_or_default();
                if !state.is_empty() && !rfp_state.is_empty() && rfp_state != state {
                    return false;
                }
                let rfp_agency = normalize_agency(rfp.agency.as_deref().unwrap_or(""));
                agency_matches(&agency, &rfp_agency)
            })
            .collect();
        // Lowest id first so the strict comparison below breaks ties
        // deterministically.
        candidates.sort_by_key(|rfp| rfp.id);

        let mut best: Option<(&Rfp, f64)> = None;
        for rfp in candidates.iter().copied() {
            let score = score_candidate(rfp, &agency, &state, date);
            if score >= MATCH_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                best = Some((rfp, score));
            }
        }

        match best {
            Some((rfp, score)) => MatchResult {
                found_match: true,
                rfp_id: Some(rfp.id),
                rfp_title: Some(rfp.title.clone()),
                score,
                reason: None,
                candidates_checked: candidates.len(),
            },
            None => MatchResult {
                found_match: false,
                reason: Some("No matching RFP found".to_string()),
                candidates_checked: candidates.len(),
                ..Default::default()
            },
        }
    }
}

fn score_candidate(rfp: &Rfp, agency: &str, state: &str, date: Option<NaiveDate>) -> f64 {
    let mut score = 0.0;

    let rfp_agency = normalize_agency(rfp.agency.as_deref().unwrap_or(""));
    if rfp_agency == agency {
        score += WEIGHT_AGENCY;
    } else if agency_matches(&rfp_agency, agency) {
        score += WEIGHT_AGENCY * 0.8;
    } else {
        return 0.0;
    }

    if state.is_empty() {
        score += WEIGHT_STATE * 0.5;
    } else {
        let rfp_state = rfp.state.as_deref().map(normalize_state).unwrap_or_default();
        if rfp_state == state {
            score += WEIGHT_STATE;
        }
    }

    match (date, rfp.due_date) {
        (Some(hint), Some(due)) => {
            if dates_match(hint, due) {
                score += WEIGHT_DATE;
            }
        }
        (None, _) => score += WEIGHT_DATE * 0.5,
        (Some(_), None) => {}
    }

    score
}
