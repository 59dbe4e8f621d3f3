//! Conversation memory
//!
//! `MemoryStore` is the service the research pipeline talks to. It is built
//! over any `MemoryBackend` and never lets a storage failure escape. Reads
//! and writes are both bounded by a timeout; a failed read degrades to
//! "no memory" and a failed write is logged and dropped.
//!
//! Two backends ship with the engine: `SqliteMemoryBackend` over the
//! `conversations` repository, and `InMemoryBackend` for tests and
//! ephemeral sessions.

use anyhow::Result;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{MessageMetadata, Role};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::classifier::normalize;
use crate::config::MemoryConfig;
use crate::db::{now_millis, ConversationRepository, Database};

pub use crate::db::{ConversationContext, SearchRecord, StoredMessage};

const MIN_TOKEN_CHARS: usize = 3;

/// Storage operations behind the memory service
///
/// Implementations partition all state by (conversation_id, user_id).
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Get the conversation, creating it when it does not exist
    async fn load_or_create_context(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationContext>;

    /// The most recent `window` messages, oldest first
    async fn recent_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        window: usize,
    ) -> Result<Vec<StoredMessage>>;

    async fn append_message(&self, message: StoredMessage) -> Result<()>;

    async fn append_search(&self, record: SearchRecord) -> Result<()>;

    /// Search records, newest first
    async fn recent_searches(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchRecord>>;

    async fn update_summary(&self, conversation_id: &str, user_id: &str, summary: &str)
        -> Result<()>;
}

/// SQLite-backed memory
pub struct SqliteMemoryBackend {
    repo: ConversationRepository,
}

impl SqliteMemoryBackend {
    pub fn new(db: &Database) -> Self {
        Self {
            repo: db.conversations(),
        }
    }
}

#[async_trait]
impl MemoryBackend for SqliteMemoryBackend {
    async fn load_or_create_context(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationContext> {
        self.repo.get_or_create(conversation_id, user_id).await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        window: usize,
    ) -> Result<Vec<StoredMessage>> {
        self.repo
            .recent_messages(conversation_id, user_id, window as i64)
            .await
    }

    async fn append_message(&self, message: StoredMessage) -> Result<()> {
        self.repo
            .get_or_create(&message.conversation_id, &message.user_id)
            .await?;
        self.repo.insert_message(&message).await
    }

    async fn append_search(&self, record: SearchRecord) -> Result<()> {
        self.repo
            .get_or_create(&record.conversation_id, &record.user_id)
            .await?;
        self.repo.insert_search(&record).await
    }

    async fn recent_searches(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchRecord>> {
        self.repo
            .recent_searches(conversation_id, user_id, limit as i64)
            .await
    }

    async fn update_summary(
        &self,
        conversation_id: &str,
        user_id: &str,
        summary: &str,
    ) -> Result<()> {
        self.repo
            .update_summary(conversation_id, user_id, summary)
            .await
    }
}

#[derive(Debug)]
struct ConversationState {
    context: ConversationContext,
    messages: Vec<StoredMessage>,
    searches: Vec<SearchRecord>,
}

type ConversationKey = (String, String);

/// Process-local memory, lost on exit
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    conversations: RwLock<HashMap<ConversationKey, ConversationState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(conversation_id: &str, user_id: &str) -> ConversationKey {
    (conversation_id.to_string(), user_id.to_string())
}

fn new_state(conversation_id: &str, user_id: &str) -> ConversationState {
    ConversationState {
        context: ConversationContext::ephemeral(conversation_id, user_id),
        messages: Vec::new(),
        searches: Vec::new(),
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn load_or_create_context(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationContext> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .entry(key(conversation_id, user_id))
            .or_insert_with(|| new_state(conversation_id, user_id));
        Ok(state.context.clone())
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        window: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&key(conversation_id, user_id))
            .map(|state| {
                let start = state.messages.len().saturating_sub(window);
                state.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn append_message(&self, message: StoredMessage) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .entry(key(&message.conversation_id, &message.user_id))
            .or_insert_with(|| new_state(&message.conversation_id, &message.user_id));
        state.context.updated_at = message.created_at;
        state.messages.push(message);
        Ok(())
    }

    async fn append_search(&self, record: SearchRecord) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .entry(key(&record.conversation_id, &record.user_id))
            .or_insert_with(|| new_state(&record.conversation_id, &record.user_id));
        state.searches.push(record);
        Ok(())
    }

    async fn recent_searches(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchRecord>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&key(conversation_id, user_id))
            .map(|state| state.searches.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn update_summary(
        &self,
        conversation_id: &str,
        user_id: &str,
        summary: &str,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .entry(key(conversation_id, user_id))
            .or_insert_with(|| new_state(conversation_id, user_id));
        state.context.summary = summary.to_string();
        state.context.updated_at = now_millis();
        Ok(())
    }
}

/// Conversation memory service
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: MemoryConfig) -> Self {
        Self { backend, config }
    }

    /// Memory store over the SQLite database at `path`
    ///
    /// The returned `Database` should be closed once the store is no longer
    /// used so the WAL is flushed.
    pub async fn open_sqlite(
        path: &Path,
        config: MemoryConfig,
    ) -> Result<(Self, Database), EngineError> {
        let database = Database::new(path)
            .await
            .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
        let backend = Arc::new(SqliteMemoryBackend::new(&database));
        Ok((Self::new(backend, config), database))
    }

    /// Memory store over a fresh in-memory backend
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), config)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read_timeout_ms)
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.config.write_timeout_ms)
    }

    pub fn history_limit(&self) -> usize {
        self.config.history_limit
    }

    /// Get or create the conversation context
    ///
    /// When storage is unavailable an unsaved context is returned so the
    /// turn can continue.
    pub async fn get_context(&self, conversation_id: &str, user_id: &str) -> ConversationContext {
        let read = self.backend.load_or_create_context(conversation_id, user_id);
        match tokio::time::timeout(self.read_timeout(), read).await {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!(conversation_id, error = %e, "Memory read failed, using unsaved context");
                ConversationContext::ephemeral(conversation_id, user_id)
            }
            Err(_) => {
                warn!(conversation_id, "Memory read timed out, using unsaved context");
                ConversationContext::ephemeral(conversation_id, user_id)
            }
        }
    }

    /// At most `limit` messages relevant to `query`, in chronological order
    ///
    /// Candidates are the most recent messages of the conversation. They are
    /// ranked by word overlap with the query, ties going to the newer
    /// message. Returns an empty history on any storage failure.
    pub async fn get_relevant_history(
        &self,
        conversation_id: &str,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Vec<StoredMessage> {
        if limit == 0 {
            return Vec::new();
        }

        let window = self.config.candidate_window.max(limit);
        let read = self.backend.recent_messages(conversation_id, user_id, window);
        let candidates = match tokio::time::timeout(self.read_timeout(), read).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                warn!(conversation_id, error = %e, "Memory read failed, continuing without history");
                return Vec::new();
            }
            Err(_) => {
                warn!(conversation_id, "Memory read timed out, continuing without history");
                return Vec::new();
            }
        };

        let selected = rank_by_overlap(&candidates, query, limit);
        debug!(
            conversation_id,
            candidates = candidates.len(),
            selected = selected.len(),
            "Relevant history selected"
        );

        selected.into_iter().map(|i| candidates[i].clone()).collect()
    }

    /// Append a message; failures are logged, never returned
    pub async fn save_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        message_id: &str,
        content: &str,
        role: Role,
        metadata: Option<MessageMetadata>,
    ) {
        let message = StoredMessage {
            id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            metadata,
            created_at: now_millis(),
        };

        self.bounded_write(conversation_id, "save message", self.backend.append_message(message))
            .await;
    }

    /// Append the audit record of a finished research run
    ///
    /// Failures are logged, never returned.
    pub async fn record_search(&self, record: SearchRecord) {
        let conversation_id = record.conversation_id.clone();
        self.bounded_write(&conversation_id, "record search", self.backend.append_search(record))
            .await;
    }

    /// Recent search records, newest first; empty on failure
    pub async fn recent_searches(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Vec<SearchRecord> {
        let read = self.backend.recent_searches(conversation_id, user_id, limit);
        match tokio::time::timeout(self.read_timeout(), read).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(conversation_id, error = %e, "Failed to read search records");
                Vec::new()
            }
            Err(_) => {
                warn!(conversation_id, "Search record read timed out");
                Vec::new()
            }
        }
    }

    /// Replace the conversation summary; failures are logged, never returned
    pub async fn update_summary(&self, conversation_id: &str, user_id: &str, summary: &str) {
        self.bounded_write(
            conversation_id,
            "update summary",
            self.backend.update_summary(conversation_id, user_id, summary),
        )
        .await;
    }

    async fn bounded_write<F>(&self, conversation_id: &str, operation: &'static str, write: F)
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.write_timeout(), write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(conversation_id, operation, error = %e, "Memory write failed");
            }
            Err(_) => {
                warn!(
                    conversation_id,
                    operation,
                    timeout_ms = self.config.write_timeout_ms,
                    "Memory write timed out, dropping it"
                );
            }
        }
    }
}

fn tokens(text: &str) -> HashSet<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Indices of the selected candidates, in chronological order
fn rank_by_overlap(candidates: &[StoredMessage], query: &str, limit: usize) -> Vec<usize> {
    let query_tokens = tokens(query);

    let mut scored: Vec<(usize, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let overlap = tokens(&message.content)
                .intersection(&query_tokens)
                .count();
            (i, overlap)
        })
        .collect();

    // Highest overlap first, newest first among equals
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

    let mut selected: Vec<usize> = scored.into_iter().take(limit).map(|(i, _)| i).collect();
    selected.sort_unstable();
    selected
}
