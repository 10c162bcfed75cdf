//! Built-in search query templates, used when the store has none enabled.

use bidscout_core::model::QueryTemplate;
use chrono::Utc;

const DEFAULTS: &[(&str, &str)] = &[
    ("Bonfire Portal", "parking RFP site:bonfirehub.com"),
    ("OpenGov Portal", "parking solicitation site:opengov.com"),
    ("PlanetBids Portal", "parking RFP site:planetbids.com"),
    ("PARCS Keyword", "PARCS parking access revenue control RFP"),
    ("Management Services", "parking management services RFP"),
    ("Garage Operations", "parking garage operations bid"),
    ("Event Parking", "event parking stadium arena RFP"),
    ("Municipal Parking", "municipal parking RFP"),
];

pub fn default_query_templates() -> Vec<QueryTemplate> {
    DEFAULTS
        .iter()
        .map(|(name, text)| QueryTemplate {
            id: 0,
            name: (*name).to_string(),
            text: (*text).to_string(),
            enabled: true,
            created_at: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_nonempty_and_enabled() {
        let templates = default_query_templates();
        assert!(!templates.is_empty());
        for t in &templates {
            assert!(!t.text.is_empty());
            assert!(t.enabled);
        }
    }
}
