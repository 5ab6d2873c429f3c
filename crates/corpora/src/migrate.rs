//! Database schema migrations (idempotent).

use sqlx::SqlitePool;

use corpora_core::error::{EngineError, Result};

/// Create all tables and indexes if they don't already exist.
///
/// Safe to run on every startup. The FTS5 virtual table gets an
/// existence check because FTS5 CREATE is not idempotent natively.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            location TEXT NOT NULL UNIQUE,
            title TEXT,
            document_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            file_modified_at INTEGER,
            file_size INTEGER,
            file_hash TEXT,
            mime_type TEXT,
            content_hash TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(EngineError::store)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contents (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(EngineError::store)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            vector BLOB NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_used_at INTEGER,
            UNIQUE(owner_kind, owner_id, chunk_index),
            FOREIGN KEY (owner_id) REFERENCES contents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(EngineError::store)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS searches (
            id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            query_vector BLOB,
            mode TEXT NOT NULL,
            result_count INTEGER NOT NULL,
            min_similarity REAL,
            max_similarity REAL,
            avg_similarity REAL,
            execution_time_ms INTEGER NOT NULL,
            filters_json TEXT,
            options_json TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(EngineError::store)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_results (
            id TEXT PRIMARY KEY,
            search_id TEXT NOT NULL,
            embedding_id INTEGER NOT NULL,
            rank INTEGER NOT NULL,
            similarity REAL NOT NULL,
            clicked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (search_id) REFERENCES searches(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(EngineError::store)?;

    // FTS5 CREATE is not idempotent natively, so check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='embeddings_fts'",
    )
    .fetch_one(pool)
    .await
    .map_err(EngineError::store)?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE embeddings_fts USING fts5(
                embedding_id UNINDEXED,
                document_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(EngineError::store)?;
    }

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_contents_document_id ON contents(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_embeddings_owner ON embeddings(owner_kind, owner_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_file_hash ON documents(file_hash)",
        "CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)",
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_searches_created_at ON searches(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_search_results_search_id ON search_results(search_id)",
    ] {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(EngineError::store)?;
    }

    Ok(())
}
