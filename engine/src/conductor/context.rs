//! Context Assembler
//!
//! Packs research evidence and conversation memory into one bounded block
//! of text for the downstream model's system instruction. Sources come
//! first so that the hard length cap trims history before evidence.

use sdk::types::{Role, SearchResult};
use std::fmt::Write;

use super::verifier::domain_of;
use crate::config::ContextConfig;
use crate::memory::StoredMessage;
use crate::retrieval::Passage;
use crate::search::truncate_chars;

const NO_SOURCES_NOTE: &str = "No specific sources were found for this question. \
Say so plainly and do not invent citations.";

const SEARCH_UNAVAILABLE_NOTE: &str = "Legal search was unavailable for this question. \
Answer from the conversation only, state that no sources could be consulted, and do not invent citations.";

/// Everything that can go into an assembled context
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInput<'a> {
    pub query: &'a str,
    pub results: &'a [SearchResult],
    pub history: &'a [StoredMessage],
    pub passages: &'a [Passage],
    /// A search ran for this query
    pub search_performed: bool,
    /// Every search call of the run failed
    pub search_failed: bool,
}

pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Assemble the context block; empty when there is nothing to ground on
    pub fn assemble(&self, input: ContextInput<'_>) -> String {
        let mut out = String::new();

        if input.search_performed {
            let _ = writeln!(out, "QUESTION: {}", input.query.trim());
            out.push('\n');

            if input.results.is_empty() {
                let note = if input.search_failed {
                    SEARCH_UNAVAILABLE_NOTE
                } else {
                    NO_SOURCES_NOTE
                };
                let _ = writeln!(out, "{}", note);
            } else {
                self.push_sources(&mut out, input.results);
            }
        }

        if !input.passages.is_empty() {
            self.push_passages(&mut out, input.passages);
        }

        if !input.history.is_empty() {
            self.push_history(&mut out, input.history);
        }

        truncate_chars(out.trim_end(), self.config.max_chars)
    }

    fn push_sources(&self, out: &mut String, results: &[SearchResult]) {
        out.push_str("LEGAL SOURCES:\n");
        for (i, result) in results.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}", i + 1, result.title);
            let _ = writeln!(out, "URL: {}", result.url);
            if !result.snippet.is_empty() {
                let _ = writeln!(
                    out,
                    "{}",
                    truncate_chars(&result.snippet, self.config.max_snippet_chars)
                );
            }
            out.push('\n');
        }

        // Domains only; each URL appears once in the whole context
        out.push_str("SOURCES CONSULTED:\n");
        for (i, result) in results.iter().enumerate() {
            let domain = domain_of(&result.url).unwrap_or_else(|| result.title.clone());
            let _ = writeln!(out, "[{}] {}", i + 1, domain);
        }
        out.push('\n');
    }

    fn push_passages(&self, out: &mut String, passages: &[Passage]) {
        out.push_str("CASE DOCUMENTS:\n");
        for (i, passage) in passages.iter().enumerate() {
            let _ = writeln!(
                out,
                "[D{}] {}: {}",
                i + 1,
                passage.source,
                truncate_chars(passage.content.trim(), self.config.max_snippet_chars)
            );
        }
        out.push('\n');
    }

    fn push_history(&self, out: &mut String, history: &[StoredMessage]) {
        out.push_str("CONVERSATION HISTORY:\n");
        let start = history.len().saturating_sub(self.config.history_turns);
        for message in &history[start..] {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
            let _ = writeln!(
                out,
                "{}: {}",
                role,
                truncate_chars(&content, self.config.max_turn_chars)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ContextConfig {
        ContextConfig {
            history_turns: 2,
            max_turn_chars: 20,
            max_snippet_chars: 30,
            max_chars: 10_000,
        }
    }

    fn message(i: i64, role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            id: format!("m{}", i),
            conversation_id: "c".into(),
            user_id: "u".into(),
            role,
            content: content.into(),
            metadata: None,
            created_at: i,
        }
    }

    #[test]
    fn test_numbered_blocks_and_sources_list() {
        let results = vec![
            SearchResult::new("Código Civil", "https://boe.es/cc", "Artículo 15 ..."),
            SearchResult::new("Tesis", "https://scjn.gob.mx/t", "x".repeat(80)),
        ];
        let context = ContextAssembler::new(config()).assemble(ContextInput {
            query: "artículo 15",
            results: &results,
            search_performed: true,
            ..Default::default()
        });

        assert!(context.contains("[1] Código Civil\nURL: https://boe.es/cc"));
        assert!(context.contains("[2] Tesis"));
        assert!(context.contains("SOURCES CONSULTED:\n[1] boe.es\n[2] scjn.gob.mx"));
        assert_eq!(context.matches("https://boe.es/cc").count(), 1);
        assert!(context.contains(&format!("{}...", "x".repeat(27))));
    }

    #[test]
    fn test_empty_results_note() {
        let context = ContextAssembler::new(config()).assemble(ContextInput {
            query: "q",
            search_performed: true,
            ..Default::default()
        });
        assert!(context.contains("No specific sources were found"));
        assert!(!context.contains("[1]"));
    }

    #[test]
    fn test_history_truncated_to_last_turns() {
        let history = vec![
            message(1, Role::User, "primera pregunta"),
            message(2, Role::Assistant, "una respuesta muy larga que debe cortarse"),
            message(3, Role::User, "segunda"),
        ];
        let context = ContextAssembler::new(config()).assemble(ContextInput {
            query: "q",
            history: &history,
            ..Default::default()
        });

        assert!(!context.contains("primera pregunta"));
        assert!(context.contains("assistant: una respuesta muy..."));
        assert!(context.contains("user: segunda"));
    }

    #[test]
    fn test_nothing_to_ground_on_is_empty() {
        let context = ContextAssembler::new(config()).assemble(ContextInput {
            query: "hola",
            ..Default::default()
        });
        assert!(context.is_empty());
    }

    #[test]
    fn test_hard_cap() {
        let results: Vec<SearchResult> = (0..50)
            .map(|i| SearchResult::new("t", format!("https://e.com/{}", i), "snippet"))
            .collect();
        let mut cfg = config();
        cfg.max_chars = 200;
        let context = ContextAssembler::new(cfg).assemble(ContextInput {
            query: "q",
            results: &results,
            search_performed: true,
            ..Default::default()
        });
        assert!(context.chars().count() <= 200);
        assert!(context.ends_with("..."));
    }
}
