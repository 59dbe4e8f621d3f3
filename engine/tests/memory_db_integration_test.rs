/// Integration tests for SQLite-backed conversation memory
///
/// Tests the complete persistence path:
/// - Database creation, WAL mode and schema
/// - Messages and metadata surviving a reopen
/// - Conversation isolation by user
/// - Relevance-ranked history and search records
/// - Graceful degradation once the pool is closed
use lexis_engine::db::Database;
use lexis_engine::memory::{MemoryStore, SearchRecord, SqliteMemoryBackend};
use lexis_engine::config::MemoryConfig;
use sdk::errors::EngineError;
use sdk::types::{MessageMetadata, Role, SearchResult};
use std::sync::Arc;
use tempfile::TempDir;

fn store(db: &Database) -> MemoryStore {
    MemoryStore::new(
        Arc::new(SqliteMemoryBackend::new(db)),
        MemoryConfig::default(),
    )
}

#[tokio::test]
async fn test_database_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("lexis.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());
    assert!(temp_dir.path().join("nested").join("lexis.db-wal").exists());

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap();

    for table in ["conversations", "messages", "search_records"] {
        assert!(tables.contains(&table.to_string()), "{} table missing", table);
    }

    db.close().await.unwrap();

    // Reopening applies the idempotent schema again
    let db = Database::new(&db_path).await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_messages_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("lexis.db");

    let metadata = MessageMetadata {
        search_rounds: 2,
        total_searches: 2,
        total_results: 4,
        sources_used: vec!["https://www.boe.es/a".to_string()],
        quality_score: 0.88,
        final_quality: 0.88,
        search_strategy: Some("code".to_string()),
        verification_passed: true,
    };

    {
        let db = Database::new(&db_path).await.unwrap();
        let memory = store(&db);
        memory
            .save_message("conv-1", "ana", "m1", "¿Puedo subir la renta?", Role::User, None)
            .await;
        memory
            .save_message(
                "conv-1",
                "ana",
                "m2",
                "Según el artículo 18...",
                Role::Assistant,
                Some(metadata.clone()),
            )
            .await;
        db.close().await.unwrap();
    }

    let db = Database::new(&db_path).await.unwrap();
    let messages = db
        .conversations()
        .recent_messages("conv-1", "ana", 10)
        .await
        .unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, "m1");
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].metadata, None);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].metadata, Some(metadata));

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_conversations_isolated_by_user() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("lexis.db")).await.unwrap();
    let memory = store(&db);

    memory
        .save_message("shared", "ana", "a1", "contrato de arrendamiento", Role::User, None)
        .await;
    memory
        .save_message("shared", "luis", "l1", "demanda laboral", Role::User, None)
        .await;

    let ana = memory.get_relevant_history("shared", "ana", "contrato", 10).await;
    let luis = memory.get_relevant_history("shared", "luis", "contrato", 10).await;

    assert_eq!(ana.len(), 1);
    assert_eq!(ana[0].id, "a1");
    assert_eq!(luis.len(), 1);
    assert_eq!(luis[0].id, "l1");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_relevant_history_prefers_overlap() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("lexis.db")).await.unwrap();
    let memory = store(&db);

    let contents = [
        "Mi contrato de arrendamiento vence en marzo",
        "Gracias por la respuesta",
        "¿Y sobre el despido?",
        "Vale, entendido",
    ];
    for (i, content) in contents.iter().enumerate() {
        memory
            .save_message("conv", "ana", &format!("m{}", i), content, Role::User, None)
            .await;
    }

    let history = memory
        .get_relevant_history("conv", "ana", "¿Puedo renovar el contrato de arrendamiento?", 2)
        .await;

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, "m0");
    // Newest message fills the remaining slot
    assert_eq!(history[1].id, "m3");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_search_records_and_summary() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("lexis.db")).await.unwrap();
    let memory = store(&db);

    let results = vec![SearchResult::new(
        "Código Civil",
        "https://www.boe.es/cc",
        "Artículo 15",
    )];
    memory
        .record_search(SearchRecord::new("conv", "ana", "artículo 15", results.clone(), 2, 840))
        .await;
    memory
        .record_search(SearchRecord::new("conv", "ana", "artículo 16", Vec::new(), 1, 120))
        .await;

    let records = memory.recent_searches("conv", "ana", 5).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].query, "artículo 16");
    assert_eq!(records[1].results, results);
    assert_eq!(records[1].round_count, 2);
    assert_eq!(records[1].duration_ms, 840);

    memory
        .update_summary("conv", "ana", "Last topic: artículo 16")
        .await;
    let context = memory.get_context("conv", "ana").await;
    assert_eq!(context.summary, "Last topic: artículo 16");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_pool_degrades_gracefully() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("lexis.db")).await.unwrap();
    let memory = store(&db);
    memory
        .save_message("conv", "ana", "m1", "contrato", Role::User, None)
        .await;

    db.close().await.unwrap();

    // Reads come back empty and writes are swallowed
    assert!(memory.get_relevant_history("conv", "ana", "contrato", 5).await.is_empty());
    assert!(memory.recent_searches("conv", "ana", 5).await.is_empty());
    memory
        .save_message("conv", "ana", "m2", "otra", Role::User, None)
        .await;

    let context = memory.get_context("conv", "ana").await;
    assert_eq!(context.conversation_id, "conv");
    assert!(context.summary.is_empty());
}

#[tokio::test]
async fn test_open_sqlite_store() {
    let temp_dir = TempDir::new().unwrap();
    let (memory, db) = MemoryStore::open_sqlite(
        &temp_dir.path().join("lexis.db"),
        MemoryConfig::default(),
    )
    .await
    .unwrap();

    memory
        .save_message("conv", "ana", "m1", "contrato", Role::User, None)
        .await;
    assert_eq!(memory.get_relevant_history("conv", "ana", "contrato", 5).await.len(), 1);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_unopenable_database_is_storage_error() {
    let temp_dir = TempDir::new().unwrap();
    // A regular file where the data directory should be
    let blocker = temp_dir.path().join("data");
    std::fs::write(&blocker, "not a directory").unwrap();

    let result = MemoryStore::open_sqlite(&blocker.join("lexis.db"), MemoryConfig::default()).await;
    match result {
        Err(err @ EngineError::Database(_)) => {
            assert_eq!(sdk::errors::LexisErrorExt::code(&err), "storage_failure");
        }
        Err(other) => panic!("expected a storage error, got {:?}", other),
        Ok(_) => panic!("expected a storage error"),
    }
}
