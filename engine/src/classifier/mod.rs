//! Query classification
//!
//! Decides whether a user message needs external legal search. The decision
//! is a pure function of the message and the loaded rule set: no I/O, no
//! hidden state, identical input yields an identical `DetectionResult`.
//!
//! Checks run in strict priority order:
//!
//! 1. Greeting / small talk pattern (bounded by the rule's `max_length`)
//! 2. Off-topic keyword in a short message
//! 3. High-precision legal reference (article, law, court, procedure)
//! 4. Accumulated legal keywords
//! 5. Very short message without legal context words
//! 6. Ambiguous default: no search
//!
//! # Example
//!
//! ```
//! use lexis_engine::classifier::{QueryClassifier, ResearchMode};
//!
//! let classifier = QueryClassifier::for_mode(ResearchMode::Deep).unwrap();
//! let result = classifier.classify("¿Qué dice el artículo 15 del Código Civil sobre contratos?");
//! assert!(result.requires_search);
//! assert_eq!(result.matched_entities, vec!["articulo 15"]);
//! ```

pub mod rules;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use rules::{normalize, RuleCategory, RuleSet};

const GREETING_CONFIDENCE: f64 = 0.9;
const OFF_TOPIC_CONFIDENCE: f64 = 0.85;
const OFF_TOPIC_MAX_LEN: usize = 50;
const REFERENCE_CONFIDENCE: f64 = 0.95;
const KEYWORD_BASE: f64 = 0.5;
const KEYWORD_STEP: f64 = 0.1;
const KEYWORD_CAP: f64 = 0.9;
const SHORT_QUERY_LEN: usize = 20;
const SHORT_QUERY_CONFIDENCE: f64 = 0.8;
const AMBIGUOUS_CONFIDENCE: f64 = 0.6;

/// Calling mode; selects the rule set and the research budget
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    #[default]
    Deep,
    Lightweight,
}

impl ResearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchMode::Deep => "deep",
            ResearchMode::Lightweight => "lightweight",
        }
    }
}

impl fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deep" => Ok(ResearchMode::Deep),
            "lightweight" | "light" => Ok(ResearchMode::Lightweight),
            other => Err(format!("unknown research mode '{}'", other)),
        }
    }
}

/// Which body of law a search should target
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Constitutional,
    Code,
    #[default]
    General,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Constitutional => "constitutional",
            SearchStrategy::Code => "code",
            SearchStrategy::General => "general",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub requires_search: bool,
    /// Always within [0, 1]
    pub confidence: f64,
    pub reason: String,
    pub strategy: SearchStrategy,
    pub matched_keywords: Vec<String>,
    pub matched_entities: Vec<String>,
}

impl DetectionResult {
    fn no_search(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            requires_search: false,
            confidence,
            reason: reason.into(),
            strategy: SearchStrategy::General,
            matched_keywords: Vec::new(),
            matched_entities: Vec::new(),
        }
    }
}

/// Rule-driven query classifier
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    rules: RuleSet,
}

impl QueryClassifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Classifier over the embedded rule set of a mode
    pub fn for_mode(mode: ResearchMode) -> Result<Self, sdk::errors::EngineError> {
        Ok(Self::new(RuleSet::embedded(mode)?))
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify a query
    pub fn classify(&self, query: &str) -> DetectionResult {
        let text = normalize(query);
        if text.is_empty() {
            return DetectionResult::no_search(1.0, "empty query");
        }
        let len = text.chars().count();

        // 1. Greetings and small talk
        for rule in self.rules.rules(RuleCategory::NonDomainPattern) {
            let within = rule.max_length.map_or(true, |max| len <= max);
            if within && rule.regex.is_match(&text) {
                return DetectionResult::no_search(GREETING_CONFIDENCE, "non-domain pattern");
            }
        }

        // 2. Off-topic keyword in a short message
        if len < OFF_TOPIC_MAX_LEN
            && self
                .rules
                .rules(RuleCategory::NonDomainKeyword)
                .any(|rule| rule.regex.is_match(&text))
        {
            return DetectionResult::no_search(OFF_TOPIC_CONFIDENCE, "non-domain keyword");
        }

        let (keywords, weight) = self.keyword_matches(&text);

        // 3. High-precision reference
        for rule in self.rules.rules(RuleCategory::DomainPattern) {
            if let Some(caps) = rule.regex.captures(&text) {
                let entities: Vec<String> = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                let strategy = rule.strategy.unwrap_or_else(|| self.strategy_for(&text));
                return DetectionResult {
                    requires_search: true,
                    confidence: REFERENCE_CONFIDENCE,
                    reason: "explicit legal reference".to_string(),
                    strategy,
                    matched_keywords: keywords,
                    matched_entities: entities,
                };
            }
        }

        // 4. Keyword accumulation
        if !keywords.is_empty() {
            let confidence = round2((KEYWORD_BASE + KEYWORD_STEP * weight).min(KEYWORD_CAP));
            return DetectionResult {
                requires_search: true,
                confidence,
                reason: format!("{} legal keyword(s)", keywords.len()),
                strategy: self.strategy_for(&text),
                matched_keywords: keywords,
                matched_entities: Vec::new(),
            };
        }

        // 5. Very short without legal context
        if len < SHORT_QUERY_LEN
            && !self
                .rules
                .rules(RuleCategory::DomainContext)
                .any(|rule| rule.regex.is_match(&text))
        {
            return DetectionResult::no_search(SHORT_QUERY_CONFIDENCE, "short query without legal context");
        }

        // 6. Ambiguous
        DetectionResult::no_search(AMBIGUOUS_CONFIDENCE, "ambiguous query")
    }

    /// Matched keyword text and the summed weight; each rule counts once
    fn keyword_matches(&self, text: &str) -> (Vec<String>, f64) {
        let mut keywords = Vec::new();
        let mut weight = 0.0;
        for rule in self.rules.rules(RuleCategory::DomainKeyword) {
            if let Some(m) = rule.regex.find(text) {
                keywords.push(m.as_str().to_string());
                weight += rule.weight;
            }
        }
        (keywords, weight)
    }

    fn strategy_for(&self, text: &str) -> SearchStrategy {
        let tagged = self
            .rules
            .rules(RuleCategory::DomainPattern)
            .filter(|rule| rule.regex.is_match(text))
            .find_map(|rule| rule.strategy);
        if let Some(strategy) = tagged {
            return strategy;
        }

        if text.contains("constitucion") {
            SearchStrategy::Constitutional
        } else if text.contains("codigo") {
            SearchStrategy::Code
        } else {
            SearchStrategy::General
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
