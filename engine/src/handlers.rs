//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - ask: Research a question and stream the answer
//! - classify: Show the classifier decision and complexity score
//! - research: Run the research loop only
//! - history: Show stored messages of a conversation
//! - checklist: Show the document checklist for a drafting request

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::{ResearchAgent, TurnRequest};
use crate::classifier::{QueryClassifier, ResearchMode, RuleSet};
use crate::complexity::ComplexityScorer;
use crate::conductor::RoundOrchestrator;
use crate::config::Config;
use crate::db::Database;
use crate::memory::{ConversationContext, MemoryStore};
use crate::requirements::{extract_user_data, missing_block, RequirementTracker};
use crate::search::{HttpSearchProvider, SearchExecutor};
use crate::streaming::StreamEvent;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Open persistent memory, or an in-memory store when `ephemeral`
async fn open_memory(config: &Config, ephemeral: bool) -> Result<(MemoryStore, Option<Database>)> {
    if ephemeral {
        return Ok((MemoryStore::in_memory(config.memory.clone()), None));
    }

    let (memory, database) =
        MemoryStore::open_sqlite(&config.database_path(), config.memory.clone()).await?;
    Ok((memory, Some(database)))
}

async fn close_memory(database: Option<Database>) -> Result<()> {
    if let Some(database) = database {
        database.close().await?;
    }
    Ok(())
}

/// Research a question and stream the model's answer
///
/// Ctrl-C cancels the turn; a cancelled turn is not saved.
pub async fn handle_ask(
    request: TurnRequest,
    ephemeral: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let (memory, database) = open_memory(config, ephemeral).await?;
    let agent = ResearchAgent::from_config(config, memory)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut stream = agent.handle_turn(request, cancel).await?;
    let mut answer = String::new();
    let mut failure = None;

    while let Some(event) = stream.next().await {
        match (&event, format) {
            (StreamEvent::Token { text }, OutputFormat::Text) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            (StreamEvent::Token { text }, OutputFormat::Json) => answer.push_str(text),
            (StreamEvent::Done { message_id, summary }, OutputFormat::Text) => {
                println!();
                println!();
                println!("Message: {}", message_id);
                println!(
                    "Research: {} round(s), {} result(s), quality {:.2}{}",
                    summary.search_rounds,
                    summary.total_results,
                    summary.final_quality,
                    if summary.verification_passed {
                        ""
                    } else {
                        " (unverified)"
                    }
                );
            }
            (StreamEvent::Done { message_id, summary }, OutputFormat::Json) => {
                let output = json!({
                    "messageId": message_id,
                    "answer": answer,
                    "research": summary,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            (StreamEvent::Error { .. }, OutputFormat::Text) => {
                println!();
                failure = Some(event.clone());
            }
            (StreamEvent::Error { .. }, OutputFormat::Json) => {
                println!("{}", serde_json::to_string_pretty(&event)?);
                failure = Some(event.clone());
            }
        }
    }

    close_memory(database).await?;

    match failure {
        Some(StreamEvent::Error { message, code, .. }) => {
            Err(anyhow::anyhow!("{} ({})", message, code))
        }
        _ => Ok(()),
    }
}

/// Classify a query and score its complexity
pub async fn handle_classify(
    query: String,
    mode: ResearchMode,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let rules = match mode {
        ResearchMode::Deep => config.classifier.deep_rules.as_deref(),
        ResearchMode::Lightweight => config.classifier.lightweight_rules.as_deref(),
    };
    let classifier = QueryClassifier::new(RuleSet::load_or_embedded(rules, mode)?);
    let scorer = ComplexityScorer::new(RuleSet::load_or_embedded(
        config.classifier.deep_rules.as_deref(),
        ResearchMode::Deep,
    )?);

    let detection = classifier.classify(&query);
    let complexity = scorer.score(&query);

    match format {
        OutputFormat::Text => {
            println!("Query: {}", query);
            println!("Rule set: {} (v{})", classifier.rule_set().name, classifier.rule_set().version);
            println!();
            println!("Requires search: {}", detection.requires_search);
            println!("Confidence:      {:.2}", detection.confidence);
            println!("Reason:          {}", detection.reason);
            println!("Strategy:        {}", detection.strategy);
            if !detection.matched_keywords.is_empty() {
                println!("Keywords:        {}", detection.matched_keywords.join(", "));
            }
            if !detection.matched_entities.is_empty() {
                println!("Entities:        {}", detection.matched_entities.join(", "));
            }
            println!();
            println!(
                "Complexity: {:?} (score {}, {} results per round)",
                complexity.level,
                complexity.score,
                complexity.result_count()
            );
            if !complexity.factors.is_empty() {
                println!("Factors:    {}", complexity.factors.join(", "));
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "mode": mode,
                "detection": detection,
                "complexity": complexity,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run the research loop without calling the model
pub async fn handle_research(
    query: String,
    mode: ResearchMode,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let memory = MemoryStore::in_memory(config.memory.clone());
    let provider = Arc::new(HttpSearchProvider::new(&config.search)?);
    let executor = SearchExecutor::new(provider, config.search.max_snippet_chars);
    let orchestrator = RoundOrchestrator::from_config(config, executor, memory.clone())?;

    let context = ConversationContext::ephemeral("cli-research", "local");
    let outcome = orchestrator
        .run(&query, &context, mode, &CancellationToken::new())
        .await?;
    if let Some(record) = &outcome.search_record {
        memory.record_search(record.clone()).await;
    }

    match format {
        OutputFormat::Text => {
            println!("Query: {}", query);
            println!(
                "Mode: {}  Stop: {:?}  Phase: {:?}",
                outcome.mode, outcome.stop_reason, outcome.phase
            );
            println!(
                "Rounds: {} ({} failed)  Results: {}  Confidence: {:.2}  Verified: {}",
                outcome.total_rounds,
                outcome.failed_rounds,
                outcome.total_results,
                outcome.confidence,
                outcome.verification_passed
            );
            println!("Duration: {}ms", outcome.duration_ms);

            if !outcome.rounds.is_empty() {
                println!();
                for round in &outcome.rounds {
                    println!(
                        "Round {}: {} -> {:?}, {} new, {} duplicate, confidence {:.2}",
                        round.round,
                        round.query,
                        round.status,
                        round.new_results,
                        round.duplicates,
                        round.confidence
                    );
                }
            }

            println!();
            if outcome.final_context.is_empty() {
                println!("(no context: {})", outcome.detection.reason);
            } else {
                println!("{}", outcome.final_context);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

/// Show the most recent messages of a conversation
pub async fn handle_history(
    conversation_id: String,
    user_id: String,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let repo = database.conversations();

    let messages = repo
        .recent_messages(&conversation_id, &user_id, limit as i64)
        .await
        .context("Failed to fetch conversation history")?;
    let searches = repo
        .recent_searches(&conversation_id, &user_id, limit as i64)
        .await
        .context("Failed to fetch search records")?;

    match format {
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("No messages in conversation {}", conversation_id);
            } else {
                println!("Conversation {} (last {} messages):", conversation_id, limit);
                println!();

                for message in &messages {
                    let created = chrono::DateTime::from_timestamp_millis(message.created_at)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    println!("[{}] {}:", created, message.role);
                    println!("  {}", message.content);
                    if let Some(meta) = &message.metadata {
                        println!(
                            "  ({} round(s), {} result(s), quality {:.2})",
                            meta.search_rounds, meta.total_results, meta.final_quality
                        );
                    }
                    println!();
                }
            }

            if !searches.is_empty() {
                println!("Recent searches:");
                for record in &searches {
                    println!(
                        "  {} ({} round(s), {} result(s), {}ms)",
                        record.query,
                        record.round_count,
                        record.results.len(),
                        record.duration_ms
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "conversationId": conversation_id,
                "messages": messages,
                "searches": searches,
                "count": messages.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await?;
    Ok(())
}

/// Show the checklist for a drafting request
pub async fn handle_checklist(message: String, config: &Config, format: OutputFormat) -> Result<()> {
    let tracker = RequirementTracker::load_or_embedded(config.requirements.templates.as_deref())?;

    let Some(kind) = tracker.detect_document_kind(&message) else {
        match format {
            OutputFormat::Text => println!("No document kind recognized"),
            OutputFormat::Json => println!("{}", json!({ "kind": null })),
        }
        return Ok(());
    };

    let items = tracker
        .build_checklist(&kind.id)
        .ok_or_else(|| anyhow::anyhow!("No checklist for {}", kind.id))?;
    let items = tracker.apply_user_data(&kind.id, items, &extract_user_data(&message));

    match format {
        OutputFormat::Text => {
            println!("Drafting request: {}", tracker.is_drafting_request(&message));
            println!();
            println!("{}", missing_block(kind, &items));
        }
        OutputFormat::Json => {
            let output = json!({
                "kind": kind.id,
                "label": kind.label,
                "draftingRequest": tracker.is_drafting_request(&message),
                "items": items,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
