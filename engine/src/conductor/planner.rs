//! Query refinement between rounds
//!
//! Round 1 always searches the raw query. Later rounds append search facets
//! for the gaps the previous verification reported. A query that was
//! already issued in this run gets the next unused rotation facet instead,
//! so no two rounds send the same search.

use chrono::Datelike;
use std::collections::HashSet;

use super::types::Gap;
use crate::classifier::normalize;

/// Facets tried in order when a refined query would repeat
const ROTATION: &[&str] = &[
    "jurisprudencia",
    "doctrina",
    "reforma",
    "texto oficial",
    "criterios judiciales",
];

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    default_jurisdiction: Option<String>,
    year: i32,
    issued: HashSet<String>,
}

impl QueryPlanner {
    pub fn new(default_jurisdiction: Option<String>) -> Self {
        Self {
            default_jurisdiction,
            year: chrono::Utc::now().year(),
            issued: HashSet::new(),
        }
    }

    /// Query to send in `round` given the previous round's gaps
    pub fn next_query(&mut self, raw: &str, round: u32, gaps: &[Gap]) -> String {
        let raw = raw.trim();
        if round <= 1 {
            self.issued.insert(normalize(raw));
            return raw.to_string();
        }

        let mut facets: Vec<String> = Vec::new();
        for gap in gaps {
            if let Some(facet) = self.facet_for(*gap) {
                if !facets.contains(&facet) {
                    facets.push(facet);
                }
            }
        }

        let base = join(raw, &facets);
        if self.issued.insert(normalize(&base)) {
            return base;
        }

        for extra in ROTATION {
            let candidate = join(&base, &[extra.to_string()]);
            if self.issued.insert(normalize(&candidate)) {
                return candidate;
            }
        }

        tracing::debug!(round, "Every refinement already issued, repeating query");
        base
    }

    fn facet_for(&self, gap: Gap) -> Option<String> {
        match gap {
            Gap::OfficialSource => Some("texto oficial".to_string()),
            Gap::MoreSources => Some("análisis".to_string()),
            Gap::SourceDiversity => Some("jurisprudencia".to_string()),
            Gap::Jurisdiction => self.default_jurisdiction.clone(),
            Gap::DateRange => Some(format!("vigente {}", self.year)),
        }
    }
}

fn join(base: &str, facets: &[String]) -> String {
    if facets.is_empty() {
        return base.to_string();
    }
    format!("{} {}", base, facets.join(" "))
}
