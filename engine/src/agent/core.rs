//! Research Agent
//!
//! One turn goes through these stages:
//!
//! 1. Load or create the conversation context
//! 2. Run the research loop (classification, search rounds, context)
//! 3. Add the document checklist when the user is drafting a document
//! 4. Build the system instruction and open the model stream
//! 5. Hand the stream to the `ResponseStreamer`
//!
//! Search and memory failures degrade the context. Failing to open the model
//! stream aborts the turn with `ModelUnavailable`, since there is no answer
//! to produce without it.

use sdk::errors::EngineError;
use sdk::types::Role;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::classifier::ResearchMode;
use crate::conductor::{ResearchOutcome, RoundOrchestrator};
use crate::config::Config;
use crate::llm::{build_model, CompletionModel, Message};
use crate::memory::{MemoryStore, StoredMessage};
use crate::requirements::{extract_user_data, missing_block, RequirementTracker};
use crate::search::{HttpSearchProvider, SearchExecutor};
use crate::streaming::{ResponseStream, ResponseStreamer, TurnRecord};

const BASE_INSTRUCTIONS: &str = "You are a legal research assistant. \
Answer in the language of the question. \
Ground every legal statement in the sources provided below and cite them by their number, e.g. [1]. \
If no sources were found or search was unavailable, say so plainly and answer with appropriate caution. \
Never invent article numbers, case numbers or citations.";

/// One user turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub user_id: String,
    pub message: String,
    pub mode: ResearchMode,
    /// Case whose documents should be searched alongside the web
    pub process_id: Option<String>,
}

impl TurnRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            mode: ResearchMode::default(),
            process_id: None,
        }
    }

    pub fn with_mode(mut self, mode: ResearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_process(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }
}

pub struct ResearchAgent {
    orchestrator: RoundOrchestrator,
    model: Arc<dyn CompletionModel>,
    tracker: RequirementTracker,
    streamer: ResponseStreamer,
}

impl ResearchAgent {
    pub fn new(
        orchestrator: RoundOrchestrator,
        model: Arc<dyn CompletionModel>,
        tracker: RequirementTracker,
        streamer: ResponseStreamer,
    ) -> Self {
        Self {
            orchestrator,
            model,
            tracker,
            streamer,
        }
    }

    /// Wire up the HTTP search provider, configured model and templates
    pub fn from_config(config: &Config, memory: MemoryStore) -> Result<Self, EngineError> {
        let provider = Arc::new(HttpSearchProvider::new(&config.search)?);
        let executor = SearchExecutor::new(provider, config.search.max_snippet_chars);
        let orchestrator = RoundOrchestrator::from_config(config, executor, memory.clone())?;
        let model = build_model(&config.llm)?;
        let tracker = RequirementTracker::load_or_embedded(config.requirements.templates.as_deref())?;
        let streamer = ResponseStreamer::new(memory, &config.streaming);

        Ok(Self::new(orchestrator, model, tracker, streamer))
    }

    pub fn orchestrator(&self) -> &RoundOrchestrator {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &RequirementTracker {
        &self.tracker
    }

    /// Research and answer one user message
    ///
    /// Returns once the model stream is open; the answer arrives through the
    /// returned stream. Cancelling `cancel` or dropping the stream discards
    /// the turn.
    pub async fn handle_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, EngineError> {
        let span = info_span!(
            "turn",
            conversation_id = %request.conversation_id,
            user_id = %request.user_id,
        );
        self.handle_turn_inner(request, cancel).instrument(span).await
    }

    async fn handle_turn_inner(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, EngineError> {
        let memory = self.orchestrator.memory();
        let context = memory
            .get_context(&request.conversation_id, &request.user_id)
            .await;

        let outcome = self
            .orchestrator
            .run_scoped(
                &request.message,
                &context,
                request.mode,
                request.process_id.as_deref(),
                &cancel,
            )
            .await?;

        let checklist = self.checklist_block(&request.message, &outcome.history);
        let messages = build_messages(&request.message, &outcome, checklist.as_deref());

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            opened = self.model.stream(&messages) => opened,
        };
        let tokens = opened.map_err(|e| {
            error!(model = self.model.name(), error = %e, "Model unavailable");
            EngineError::from(e)
        })?;

        info!(
            model = self.model.name(),
            search_performed = outcome.search_performed,
            rounds = outcome.total_rounds,
            "Streaming answer"
        );

        let turn = TurnRecord {
            conversation_id: request.conversation_id,
            user_id: request.user_id,
            user_message_id: Uuid::new_v4().to_string(),
            user_message: request.message,
            assistant_message_id: Uuid::new_v4().to_string(),
            metadata: outcome.to_metadata(),
            summary: outcome.summary(),
            entities: outcome.detection.matched_entities.clone(),
            search: outcome.search_record.clone(),
        };

        Ok(self.streamer.spawn(tokens, turn, cancel.child_token()))
    }

    /// Missing-data block when the conversation is drafting a document
    ///
    /// The drafting request may be the current message or an earlier one;
    /// values the user typed in any earlier message still count.
    fn checklist_block(&self, message: &str, history: &[StoredMessage]) -> Option<String> {
        let user_messages: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .chain(std::iter::once(message))
            .collect();

        let kind = user_messages
            .iter()
            .rev()
            .filter(|m| self.tracker.is_drafting_request(m))
            .find_map(|m| self.tracker.detect_document_kind(m))?;

        let mut items = self.tracker.build_checklist(&kind.id)?;
        for text in &user_messages {
            let data = extract_user_data(text);
            if !data.is_empty() {
                items = self.tracker.apply_user_data(&kind.id, items, &data);
            }
        }

        Some(missing_block(kind, &items))
    }
}

/// System instruction plus conversation for the model
///
/// When research ran, the history is already part of the context block.
/// Otherwise it is passed as chat turns.
pub fn build_messages(
    query: &str,
    outcome: &ResearchOutcome,
    checklist: Option<&str>,
) -> Vec<Message> {
    let mut system = BASE_INSTRUCTIONS.to_string();
    if !outcome.final_context.is_empty() {
        system.push_str("\n\n");
        system.push_str(&outcome.final_context);
    }
    if let Some(block) = checklist {
        system.push_str("\n\n");
        system.push_str(block);
    }

    let mut messages = vec![Message::system(system)];
    if !outcome.search_performed {
        messages.extend(outcome.history.iter().map(|m| Message {
            role: m.role.into(),
            content: m.content.clone(),
        }));
    }
    messages.push(Message::user(query));
    messages
}
