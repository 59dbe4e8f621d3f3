//! Query complexity scoring
//!
//! Sizes search breadth from query structure. Signals come from the
//! `[[signals]]` table of a rule set; each signal counts at most once and a
//! long query adds one more point.

use serde::{Deserialize, Serialize};

use crate::classifier::{normalize, RuleSet};

const LONG_QUERY_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityLevel {
    /// Map a signal total to a level: 0-1 simple, 2-3 moderate, 4+ complex
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=1 => ComplexityLevel::Simple,
            2..=3 => ComplexityLevel::Moderate,
            _ => ComplexityLevel::Complex,
        }
    }

    /// Results requested per search round
    pub fn result_count(&self) -> usize {
        match self {
            ComplexityLevel::Simple => 2,
            ComplexityLevel::Moderate => 3,
            ComplexityLevel::Complex => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryComplexity {
    pub level: ComplexityLevel,
    pub score: u32,
    pub factors: Vec<String>,
}

impl QueryComplexity {
    pub fn result_count(&self) -> usize {
        self.level.result_count()
    }
}

#[derive(Debug, Clone)]
pub struct ComplexityScorer {
    rules: RuleSet,
}

impl ComplexityScorer {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn score(&self, query: &str) -> QueryComplexity {
        let text = normalize(query);
        let mut score = 0;
        let mut factors = Vec::new();

        for signal in self.rules.signals() {
            if signal.regex.is_match(&text) {
                score += signal.points;
                factors.push(signal.factor.clone());
            }
        }

        if text.chars().count() > LONG_QUERY_CHARS {
            score += 1;
            factors.push("long_query".to_string());
        }

        QueryComplexity {
            level: ComplexityLevel::from_score(score),
            score,
            factors,
        }
    }
}
