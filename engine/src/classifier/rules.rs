//! Versioned classification rule sets
//!
//! Rule sets are TOML data so they can be tuned without touching code. Each
//! `[[rules]]` entry is a regex applied to the normalized query together with
//! a weight and a category. `[[signals]]` entries feed the complexity scorer.
//!
//! ```toml
//! version = 3
//! name = "deep"
//!
//! [[rules]]
//! pattern = '^(hola|buenos dias)\b'
//! category = "non_domain_pattern"
//! max_length = 60
//!
//! [[rules]]
//! pattern = '\b(articulo\s+\d+)\b'
//! category = "domain_pattern"
//!
//! [[signals]]
//! pattern = '\bjurisprudencia\b'
//! points = 2
//! factor = "jurisprudence"
//! ```

use regex::Regex;
use sdk::errors::EngineError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::{ResearchMode, SearchStrategy};

const DEEP_RULES: &str = include_str!("../../rules/deep.toml");
const LIGHTWEIGHT_RULES: &str = include_str!("../../rules/lightweight.toml");

/// What a rule contributes to the classification
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Greeting or small talk; short-circuits to no search
    NonDomainPattern,
    /// Off-topic keyword; short-circuits only in short queries
    NonDomainKeyword,
    /// Explicit article, law, court or procedure reference
    DomainPattern,
    /// Legal vocabulary accumulated into a confidence
    DomainKeyword,
    /// Words that make a very short query worth a second look
    DomainContext,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    version: u32,
    name: String,
    #[serde(default)]
    rules: Vec<RuleSpec>,
    #[serde(default)]
    signals: Vec<SignalSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    pattern: String,
    #[serde(default = "default_weight")]
    weight: f64,
    category: RuleCategory,
    #[serde(default)]
    strategy: Option<SearchStrategy>,
    #[serde(default)]
    max_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SignalSpec {
    pattern: String,
    points: u32,
    factor: String,
}

fn default_weight() -> f64 {
    1.0
}

/// A compiled classification rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub regex: Regex,
    pub weight: f64,
    pub category: RuleCategory,
    pub strategy: Option<SearchStrategy>,
    pub max_length: Option<usize>,
}

/// A compiled complexity signal
#[derive(Debug, Clone)]
pub struct Signal {
    pub regex: Regex,
    pub points: u32,
    pub factor: String,
}

/// A named, versioned and compiled rule set
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub version: u32,
    rules: Vec<Rule>,
    signals: Vec<Signal>,
}

impl RuleSet {
    /// Parse and compile a rule set from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let file: RuleFile = toml::from_str(contents)
            .map_err(|e| EngineError::RuleSet(format!("Failed to parse rules: {}", e)))?;

        let mut rules = Vec::with_capacity(file.rules.len());
        for spec in file.rules {
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(EngineError::RuleSet(format!(
                    "Rule '{}' has invalid weight {}",
                    spec.pattern, spec.weight
                )));
            }
            let regex = Regex::new(&spec.pattern).map_err(|e| {
                EngineError::RuleSet(format!("Invalid pattern '{}': {}", spec.pattern, e))
            })?;
            rules.push(Rule {
                regex,
                weight: spec.weight,
                category: spec.category,
                strategy: spec.strategy,
                max_length: spec.max_length,
            });
        }

        let mut signals = Vec::with_capacity(file.signals.len());
        for spec in file.signals {
            let regex = Regex::new(&spec.pattern).map_err(|e| {
                EngineError::RuleSet(format!("Invalid signal '{}': {}", spec.pattern, e))
            })?;
            signals.push(Signal {
                regex,
                points: spec.points,
                factor: spec.factor,
            });
        }

        tracing::debug!(
            name = %file.name,
            version = file.version,
            rules = rules.len(),
            signals = signals.len(),
            "Compiled rule set"
        );

        Ok(Self {
            name: file.name,
            version: file.version,
            rules,
            signals,
        })
    }

    /// Load a rule set from a TOML file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            EngineError::RuleSet(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// The rule set compiled into the binary for a mode
    pub fn embedded(mode: ResearchMode) -> Result<Self, EngineError> {
        match mode {
            ResearchMode::Deep => Self::from_toml_str(DEEP_RULES),
            ResearchMode::Lightweight => Self::from_toml_str(LIGHTWEIGHT_RULES),
        }
    }

    /// The configured file when one is given, the embedded set otherwise
    pub fn load_or_embedded(path: Option<&Path>, mode: ResearchMode) -> Result<Self, EngineError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::embedded(mode),
        }
    }

    /// Rules of one category, in file order
    pub fn rules(&self, category: RuleCategory) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }
}

/// Normalize a query for matching
///
/// Lowercases, strips diacritics and collapses whitespace, so "Artículo  15"
/// and "articulo 15" are the same text to every rule.
pub fn normalize(query: &str) -> String {
    let stripped: String = query
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
