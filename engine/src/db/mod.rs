/// Database module for SQLite persistence
///
/// Stores conversations, their messages and the search records of every
/// research run. Uses sqlx with WAL mode so concurrent conversations do not
/// block each other on reads.
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod conversations;

// Re-export commonly used types
pub use conversations::{
    now_millis, ConversationContext, ConversationRepository, SearchRecord, StoredMessage,
};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and apply migrations
    ///
    /// SQLite replays a leftover WAL on open, so a database closed uncleanly
    /// needs no extra recovery step.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// Every statement is `IF NOT EXISTS`, so reopening an existing file is safe.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        debug!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        Ok(())
    }

    /// Flush the WAL and close all connections
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        Ok(())
    }

    /// Create a conversation repository
    pub fn conversations(&self) -> ConversationRepository {
        ConversationRepository::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{MessageMetadata, Role, SearchResult};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert!(tables.contains(&"conversations".to_string()));
        assert!(tables.contains(&"messages".to_string()));
        assert!(tables.contains(&"search_records".to_string()));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wal_mode_and_foreign_keys() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let foreign_keys: i32 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        db.conversations().get_or_create("c1", "u1").await.unwrap();
        db.close().await.unwrap();

        let db = Database::new(&db_path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_message_round_trip_with_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = db.conversations();

        repo.get_or_create("c1", "u1").await.unwrap();
        let message = StoredMessage {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            user_id: "u1".to_string(),
            role: Role::Assistant,
            content: "Según el artículo 15...".to_string(),
            metadata: Some(MessageMetadata {
                search_rounds: 2,
                verification_passed: true,
                ..Default::default()
            }),
            created_at: 1_000,
        };
        repo.insert_message(&message).await.unwrap();

        let messages = repo.recent_messages("c1", "u1", 10).await.unwrap();
        assert_eq!(messages, vec![message]);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_search_record_requires_conversation() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = db.conversations();

        let record = SearchRecord {
            conversation_id: "missing".to_string(),
            user_id: "u1".to_string(),
            query: "q".to_string(),
            results: vec![SearchResult::new("t", "https://boe.es/a", "s")],
            round_count: 1,
            duration_ms: 10,
            created_at: 1,
        };
        assert!(repo.insert_search(&record).await.is_err());

        repo.get_or_create("missing", "u1").await.unwrap();
        repo.insert_search(&record).await.unwrap();
        let records = repo.recent_searches("missing", "u1", 5).await.unwrap();
        assert_eq!(records, vec![record]);

        db.close().await.unwrap();
    }
}
