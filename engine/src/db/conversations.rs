/// Conversation persistence operations
///
/// Conversations are keyed by (conversation_id, user_id). Messages and search
/// records are append-only; nothing in this module deletes rows.
use anyhow::{Context, Result};
use sdk::types::{MessageMetadata, Role, SearchResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Per-conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub user_id: String,
    pub summary: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationContext {
    /// A context that is never written anywhere
    pub fn ephemeral(conversation_id: &str, user_id: &str) -> Self {
        let now = now_millis();
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            summary: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One persisted message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: Option<MessageMetadata>,
    pub created_at: i64,
}

/// Audit record of one research run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub query: String,
    pub results: Vec<SearchResult>,
    pub round_count: u32,
    pub duration_ms: u64,
    pub created_at: i64,
}

impl SearchRecord {
    pub fn new(
        conversation_id: &str,
        user_id: &str,
        query: &str,
        results: Vec<SearchResult>,
        round_count: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            results,
            round_count,
            duration_ms,
            created_at: now_millis(),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Conversation repository for database operations
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    /// Create a new conversation repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the conversation, creating it on first use
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationContext> {
        let now = now_millis();

        sqlx::query(
            "INSERT INTO conversations (conversation_id, user_id, summary, created_at, updated_at)
             VALUES (?, ?, '', ?, ?)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create conversation")?;

        let row = sqlx::query(
            "SELECT conversation_id, user_id, summary, created_at, updated_at
             FROM conversations WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch conversation")?;

        Ok(ConversationContext {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            summary: row.get("summary"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Append a message
    pub async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize message metadata")?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, user_id, role, content, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(metadata)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        sqlx::query(
            "UPDATE conversations SET updated_at = ? WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(message.created_at)
        .bind(&message.conversation_id)
        .bind(&message.user_id)
        .execute(&self.pool)
        .await
        .context("Failed to touch conversation")?;

        Ok(())
    }

    /// The most recent `limit` messages, oldest first
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, user_id, role, content, metadata, created_at
             FROM messages
             WHERE conversation_id = ? AND user_id = ?
             ORDER BY created_at DESC, seq DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages")?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Append a search record
    pub async fn insert_search(&self, record: &SearchRecord) -> Result<()> {
        let results =
            serde_json::to_string(&record.results).context("Failed to serialize search results")?;

        sqlx::query(
            "INSERT INTO search_records
             (conversation_id, user_id, query, results, round_count, duration_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.conversation_id)
        .bind(&record.user_id)
        .bind(&record.query)
        .bind(results)
        .bind(i64::from(record.round_count))
        .bind(record.duration_ms as i64)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert search record")?;

        Ok(())
    }

    /// Search records of a conversation, newest first
    pub async fn recent_searches(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<SearchRecord>> {
        let rows = sqlx::query(
            "SELECT conversation_id, user_id, query, results, round_count, duration_ms, created_at
             FROM search_records
             WHERE conversation_id = ? AND user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch search records")?;

        rows.iter()
            .map(|r| {
                let results: String = r.get("results");
                Ok(SearchRecord {
                    conversation_id: r.get("conversation_id"),
                    user_id: r.get("user_id"),
                    query: r.get("query"),
                    results: serde_json::from_str(&results)
                        .context("Failed to parse stored search results")?,
                    round_count: r.get::<i64, _>("round_count") as u32,
                    duration_ms: r.get::<i64, _>("duration_ms") as u64,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    /// Replace the conversation summary
    pub async fn update_summary(
        &self,
        conversation_id: &str,
        user_id: &str,
        summary: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET summary = ?, updated_at = ?
             WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(summary)
        .bind(now_millis())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to update conversation summary")?;

        Ok(())
    }
}

fn message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let role: String = r.get("role");
    let metadata: Option<String> = r.get("metadata");

    Ok(StoredMessage {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        user_id: r.get("user_id"),
        role: role
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid role in messages table")?,
        content: r.get("content"),
        metadata: metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Failed to parse message metadata")?,
        created_at: r.get("created_at"),
    })
}
