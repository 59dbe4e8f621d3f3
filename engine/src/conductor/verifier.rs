//! Verification / quality gate
//!
//! Scores the evidence gathered so far and names what is missing. The score
//! combines four components:
//!
//! | component  | weight | measure                                       |
//! |------------|--------|-----------------------------------------------|
//! | coverage   | 0.4    | results / requested, capped at 1              |
//! | diversity  | 0.2    | distinct domains / results                    |
//! | official   | 0.3    | official results, full credit at half of them |
//! | uniqueness | 0.1    | 1 - duplicate snippet ratio                   |

use sdk::types::SearchResult;
use std::collections::HashSet;
use url::Url;

use super::types::{Gap, Verification};
use crate::classifier::normalize;

const COVERAGE_WEIGHT: f64 = 0.4;
const DIVERSITY_WEIGHT: f64 = 0.2;
const OFFICIAL_WEIGHT: f64 = 0.3;
const UNIQUENESS_WEIGHT: f64 = 0.1;

const OFFICIAL_HOSTS: &[&str] = &[
    ".gob.", ".gov", ".gob", "boe.es", "dof.gob.mx", "scjn.gob.mx", "poderjudicial", "congreso",
    "senado", "diputados", "eur-lex.europa.eu", "tribunalconstitucional", "curia.europa.eu",
];

const OFFICIAL_TITLES: &[&str] = &[
    "diario oficial",
    "boletin oficial",
    "poder judicial",
    "tribunal",
    "corte",
    "scjn",
    "congreso",
    "gaceta",
];

const JURISDICTIONS: &[&str] = &[
    "mexico", "espana", "argentina", "colombia", "chile", "peru", "ecuador", "uruguay",
    "venezuela", "bolivia", "paraguay", "guatemala", "federal", "estatal", "cdmx", "autonomica",
    "union europea",
];

const TEMPORAL_CUES: &[&str] = &["vigente", "actual", "reciente", "ultima reforma", "hoy", "nueva ley"];

/// Quality gate for one research run
#[derive(Debug, Clone)]
pub struct Verifier {
    quality_threshold: Option<f64>,
}

impl Verifier {
    /// `None` passes as soon as any evidence exists
    pub fn new(quality_threshold: Option<f64>) -> Self {
        Self { quality_threshold }
    }

    pub fn verify(&self, results: &[SearchResult], query: &str, requested: usize) -> Verification {
        let gaps = self.gaps(results, query, requested);

        if results.is_empty() {
            return Verification {
                confidence: 0.0,
                passed: false,
                gaps,
            };
        }

        let n = results.len() as f64;
        let coverage = (n / requested.max(1) as f64).min(1.0);
        let diversity = distinct_domains(results) as f64 / n;
        let official = (2.0 * official_count(results) as f64 / n).min(1.0);
        let uniqueness = 1.0 - duplicate_snippets(results) as f64 / n;

        let raw = COVERAGE_WEIGHT * coverage
            + DIVERSITY_WEIGHT * diversity
            + OFFICIAL_WEIGHT * official
            + UNIQUENESS_WEIGHT * uniqueness;
        let confidence = ((raw * 100.0).round() / 100.0).clamp(0.0, 1.0);

        let passed = match self.quality_threshold {
            Some(threshold) => confidence >= threshold,
            None => true,
        };

        Verification {
            confidence,
            passed,
            gaps,
        }
    }

    fn gaps(&self, results: &[SearchResult], query: &str, requested: usize) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let text = normalize(query);

        if official_count(results) == 0 {
            gaps.push(Gap::OfficialSource);
        }
        if results.len() < requested {
            gaps.push(Gap::MoreSources);
        }
        if results.len() >= 2 && distinct_domains(results) == 1 {
            gaps.push(Gap::SourceDiversity);
        }
        if !JURISDICTIONS.iter().any(|j| text.contains(j)) {
            gaps.push(Gap::Jurisdiction);
        }
        if TEMPORAL_CUES.iter().any(|c| text.contains(c)) && !mentions_year(&text) {
            gaps.push(Gap::DateRange);
        }

        gaps
    }
}

/// Host without a leading "www.", lowercased
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn distinct_domains(results: &[SearchResult]) -> usize {
    results
        .iter()
        .map(|r| domain_of(&r.url).unwrap_or_else(|| r.url.clone()))
        .collect::<HashSet<_>>()
        .len()
}

pub fn is_official(result: &SearchResult) -> bool {
    let host_match = domain_of(&result.url)
        .map(|host| OFFICIAL_HOSTS.iter().any(|h| host.contains(h)))
        .unwrap_or(false);
    let title = normalize(&result.title);
    host_match || OFFICIAL_TITLES.iter().any(|t| title.contains(t))
}

fn official_count(results: &[SearchResult]) -> usize {
    results.iter().filter(|r| is_official(r)).count()
}

/// Results whose snippet repeats an earlier one
fn duplicate_snippets(results: &[SearchResult]) -> usize {
    let mut seen = HashSet::new();
    results
        .iter()
        .map(|r| normalize(&r.snippet))
        .filter(|s| !s.is_empty())
        .filter(|s| !seen.insert(blake3::hash(s.as_bytes())))
        .count()
}

fn mentions_year(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_digit())
        .any(|t| t.len() == 4 && (t.starts_with("19") || t.starts_with("20")))
}
