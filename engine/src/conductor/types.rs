use sdk::types::{MessageMetadata, SearchResult};
use serde::{Deserialize, Serialize};

use crate::classifier::{DetectionResult, SearchStrategy};
use crate::complexity::QueryComplexity;
use crate::memory::{SearchRecord, StoredMessage};
use crate::search::SearchStatus;

pub use crate::classifier::ResearchMode;

/// Research run state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Idle,
    Classifying,
    Searching { round: u32 },
    Verifying { round: u32 },
    Done,
    Failed,
}

/// Why the research loop stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoSearchNeeded,
    QualityReached,
    MaxRounds,
    TimeBudget,
    AllSearchesFailed,
}

/// Facets a verification found missing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gap {
    /// No official gazette, court or legislature source
    OfficialSource,
    /// Fewer results than requested
    MoreSources,
    /// Results concentrated on one domain
    SourceDiversity,
    /// The query names no jurisdiction
    Jurisdiction,
    /// The query asks about validity without a date
    DateRange,
}

/// Verification of the accumulated evidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    /// Always within [0, 1]
    pub confidence: f64,
    pub passed: bool,
    pub gaps: Vec<Gap>,
}

/// What happened in one search round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub round: u32,
    pub query: String,
    pub status: SearchStatus,
    pub new_results: usize,
    pub duplicates: usize,
    pub confidence: f64,
    pub gaps: Vec<Gap>,
}

/// Result of one research run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutcome {
    /// Grounded context for the model's system instruction
    pub final_context: String,
    pub total_rounds: u32,
    pub total_searches: u32,
    pub failed_rounds: u32,
    pub total_results: usize,
    pub confidence: f64,
    pub verification_passed: bool,
    pub duration_ms: u64,
    pub search_performed: bool,
    pub strategy: SearchStrategy,
    pub mode: ResearchMode,
    pub phase: ResearchPhase,
    pub stop_reason: StopReason,
    pub detection: DetectionResult,
    pub complexity: Option<QueryComplexity>,
    pub results: Vec<SearchResult>,
    pub rounds: Vec<RoundReport>,
    /// Relevant history the context was built from
    #[serde(skip)]
    pub history: Vec<StoredMessage>,
    /// Audit record of a search run, not yet persisted
    #[serde(skip)]
    pub search_record: Option<SearchRecord>,
}

impl ResearchOutcome {
    /// Deduplicated URLs of every result, in order of discovery
    pub fn sources(&self) -> Vec<String> {
        self.results.iter().map(|r| r.url.clone()).collect()
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            search_rounds: self.total_rounds,
            total_searches: self.total_searches,
            total_results: self.total_results,
            final_quality: self.confidence,
            search_strategy: self.search_performed.then(|| self.strategy.to_string()),
            verification_passed: self.verification_passed,
        }
    }

    /// Metadata persisted next to the assistant message
    pub fn to_metadata(&self) -> MessageMetadata {
        MessageMetadata {
            search_rounds: self.total_rounds,
            total_searches: self.total_searches,
            total_results: self.total_results,
            sources_used: self.sources(),
            quality_score: self.confidence,
            final_quality: self.confidence,
            search_strategy: self.search_performed.then(|| self.strategy.to_string()),
            verification_passed: self.verification_passed,
        }
    }
}

/// Compact research summary handed to transports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub search_rounds: u32,
    pub total_searches: u32,
    pub total_results: usize,
    pub final_quality: f64,
    pub search_strategy: Option<String>,
    pub verification_passed: bool,
}
