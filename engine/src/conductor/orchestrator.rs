//! Round Orchestrator
//!
//! Drives one research run:
//!
//! ```text
//! Idle -> Classifying -> Searching(1) -> Verifying(1) -> ... -> Done | Failed
//! ```
//!
//! Rounds run strictly one after another because round N+1 is refined from
//! the gaps of round N. The loop is bounded three ways: the mode's
//! `max_rounds`, its wall-clock budget, and the caller's cancellation token.
//! Search failures never abort the run; only cancellation does.
//!
//! A run writes nothing to memory. A search run hands back its audit record
//! in `ResearchOutcome::search_record` for the caller to persist once the
//! turn completes.

use sdk::errors::EngineError;
use sdk::types::SearchResult;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use super::context::{ContextAssembler, ContextInput};
use super::planner::QueryPlanner;
use super::types::{
    Gap, ResearchMode, ResearchOutcome, ResearchPhase, RoundReport, StopReason, Verification,
};
use super::verifier::Verifier;
use crate::classifier::{QueryClassifier, RuleSet};
use crate::complexity::ComplexityScorer;
use crate::config::{Config, ResearchConfig};
use crate::memory::{ConversationContext, MemoryStore, SearchRecord};
use crate::retrieval::{top_passages, Passage, PassageRetriever};
use crate::search::{SearchExecutor, SearchStatus};

const PASSAGE_LIMIT: usize = 4;

pub struct RoundOrchestrator {
    deep: QueryClassifier,
    lightweight: QueryClassifier,
    scorer: ComplexityScorer,
    executor: SearchExecutor,
    memory: MemoryStore,
    assembler: ContextAssembler,
    research: ResearchConfig,
    search_timeout: Duration,
    retriever: Option<Arc<dyn PassageRetriever>>,
}

impl RoundOrchestrator {
    /// Build an orchestrator, loading rule sets from config or the embedded defaults
    pub fn from_config(
        config: &Config,
        executor: SearchExecutor,
        memory: MemoryStore,
    ) -> Result<Self, EngineError> {
        let deep_rules =
            RuleSet::load_or_embedded(config.classifier.deep_rules.as_deref(), ResearchMode::Deep)?;
        let light_rules = RuleSet::load_or_embedded(
            config.classifier.lightweight_rules.as_deref(),
            ResearchMode::Lightweight,
        )?;

        // Complexity signals live in the deep set; fall back to the embedded one
        let signal_rules = if deep_rules.signals().is_empty() {
            RuleSet::embedded(ResearchMode::Deep)?
        } else {
            deep_rules.clone()
        };

        Ok(Self {
            deep: QueryClassifier::new(deep_rules),
            lightweight: QueryClassifier::new(light_rules),
            scorer: ComplexityScorer::new(signal_rules),
            executor,
            memory,
            assembler: ContextAssembler::new(config.context.clone()),
            research: config.research.clone(),
            search_timeout: config.search.timeout(),
            retriever: None,
        })
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn PassageRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn classifier(&self, mode: ResearchMode) -> &QueryClassifier {
        match mode {
            ResearchMode::Deep => &self.deep,
            ResearchMode::Lightweight => &self.lightweight,
        }
    }

    pub fn scorer(&self) -> &ComplexityScorer {
        &self.scorer
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Research `query` for a conversation
    pub async fn run(
        &self,
        query: &str,
        context: &ConversationContext,
        mode: ResearchMode,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, EngineError> {
        self.run_scoped(query, context, mode, None, cancel).await
    }

    /// Research `query`, also pulling case document passages for `process_id`
    pub async fn run_scoped(
        &self,
        query: &str,
        context: &ConversationContext,
        mode: ResearchMode,
        process_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, EngineError> {
        let span = info_span!(
            "research",
            conversation_id = %context.conversation_id,
            mode = %mode,
        );
        self.run_inner(query, context, mode, process_id, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        query: &str,
        context: &ConversationContext,
        mode: ResearchMode,
        process_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, EngineError> {
        let started = Instant::now();
        let mut phase = ResearchPhase::Idle;
        debug!(?phase, "Research requested");

        phase = ResearchPhase::Classifying;
        debug!(?phase, "Research started");

        let detection = self.classifier(mode).classify(query);
        let history = self
            .memory
            .get_relevant_history(
                &context.conversation_id,
                &context.user_id,
                query,
                self.memory.history_limit(),
            )
            .await;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if !detection.requires_search {
            info!(
                confidence = detection.confidence,
                reason = %detection.reason,
                "No search needed"
            );
            return Ok(ResearchOutcome {
                final_context: String::new(),
                total_rounds: 0,
                total_searches: 0,
                failed_rounds: 0,
                total_results: 0,
                confidence: 0.0,
                verification_passed: false,
                duration_ms: started.elapsed().as_millis() as u64,
                search_performed: false,
                strategy: detection.strategy,
                mode,
                phase: ResearchPhase::Done,
                stop_reason: StopReason::NoSearchNeeded,
                detection,
                complexity: None,
                results: Vec::new(),
                rounds: Vec::new(),
                history,
                search_record: None,
            });
        }

        let complexity = self.scorer.score(query);
        let per_round = complexity.result_count();
        let budget = self.research.mode(mode);
        let deadline = started + budget.max_duration();
        let verifier = Verifier::new(budget.quality_threshold);
        let mut planner = QueryPlanner::new(self.research.default_jurisdiction.clone());

        info!(
            level = ?complexity.level,
            per_round,
            max_rounds = budget.max_rounds,
            "Research loop starting"
        );

        let mut seen: HashSet<String> = HashSet::new();
        let mut results: Vec<SearchResult> = Vec::new();
        let mut rounds: Vec<RoundReport> = Vec::new();
        let mut gaps: Vec<Gap> = Vec::new();
        let mut verification = Verification {
            confidence: 0.0,
            passed: false,
            gaps: Vec::new(),
        };
        let mut failed_rounds = 0;
        let mut stop_reason = StopReason::MaxRounds;

        for round in 1..=budget.max_rounds {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(round, "Research time budget exhausted");
                stop_reason = StopReason::TimeBudget;
                break;
            }

            let round_query = planner.next_query(query, round, &gaps);
            phase = ResearchPhase::Searching { round };
            debug!(?phase, query = %round_query, "Round started");

            let outcome = self
                .executor
                .search(
                    &round_query,
                    per_round,
                    self.search_timeout.min(remaining),
                    cancel,
                )
                .await;

            if outcome.status == SearchStatus::Cancelled {
                return Err(EngineError::Cancelled);
            }
            if !outcome.success {
                failed_rounds += 1;
            }

            let mut new_results = 0;
            let mut duplicates = 0;
            for result in outcome.results {
                if seen.insert(dedupe_key(&result.url)) {
                    results.push(result);
                    new_results += 1;
                } else {
                    duplicates += 1;
                }
            }

            phase = ResearchPhase::Verifying { round };
            verification = verifier.verify(&results, query, per_round);
            gaps = verification.gaps.clone();

            debug!(
                ?phase,
                status = ?outcome.status,
                new_results,
                duplicates,
                confidence = verification.confidence,
                passed = verification.passed,
                "Round verified"
            );

            rounds.push(RoundReport {
                round,
                query: round_query,
                status: outcome.status,
                new_results,
                duplicates,
                confidence: verification.confidence,
                gaps: verification.gaps.clone(),
            });

            if verification.passed {
                stop_reason = StopReason::QualityReached;
                break;
            }
        }

        let total_searches = rounds.len() as u32;
        let all_failed = total_searches > 0 && failed_rounds == total_searches;
        if all_failed {
            stop_reason = StopReason::AllSearchesFailed;
        }
        phase = if all_failed {
            ResearchPhase::Failed
        } else {
            ResearchPhase::Done
        };

        let passages = match process_id {
            Some(process_id) => self.passages(process_id, query).await,
            None => Vec::new(),
        };

        let final_context = self.assembler.assemble(ContextInput {
            query,
            results: &results,
            history: &history,
            passages: &passages,
            search_performed: true,
            search_failed: all_failed,
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        // Written by whoever completes the turn
        let search_record = SearchRecord::new(
            &context.conversation_id,
            &context.user_id,
            query,
            results.clone(),
            total_searches,
            duration_ms,
        );

        info!(
            rounds = total_searches,
            failed_rounds,
            results = results.len(),
            confidence = verification.confidence,
            passed = verification.passed,
            ?stop_reason,
            duration_ms,
            "Research finished"
        );

        Ok(ResearchOutcome {
            final_context,
            total_rounds: total_searches,
            total_searches,
            failed_rounds,
            total_results: results.len(),
            confidence: verification.confidence,
            verification_passed: verification.passed,
            duration_ms,
            search_performed: true,
            strategy: detection.strategy,
            mode,
            phase,
            stop_reason,
            detection,
            complexity: Some(complexity),
            results,
            rounds,
            history,
            search_record: Some(search_record),
        })
    }

    async fn passages(&self, process_id: &str, query: &str) -> Vec<Passage> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };

        let lookup = retriever.retrieve(process_id, query, PASSAGE_LIMIT);
        match tokio::time::timeout(self.search_timeout, lookup).await {
            Ok(Ok(passages)) => top_passages(passages, PASSAGE_LIMIT),
            Ok(Err(e)) => {
                warn!(process_id, error = %e, "Passage retrieval failed");
                Vec::new()
            }
            Err(_) => {
                warn!(process_id, "Passage retrieval timed out");
                Vec::new()
            }
        }
    }
}

/// Identity of a URL for deduplication
///
/// Scheme, a leading "www.", the fragment and a trailing slash do not make
/// two results different.
pub fn dedupe_key(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
            let path = url.path().trim_end_matches('/');
            match url.query() {
                Some(q) => format!("{}{}?{}", host, path, q),
                None => format!("{}{}", host, path),
            }
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_equivalences() {
        assert_eq!(
            dedupe_key("https://www.boe.es/buscar/act.php?id=1#a1"),
            dedupe_key("http://boe.es/buscar/act.php?id=1")
        );
        assert_eq!(dedupe_key("https://e.com/a/"), dedupe_key("https://E.com/a"));
        assert_ne!(dedupe_key("https://e.com/a?id=1"), dedupe_key("https://e.com/a?id=2"));
    }
}
