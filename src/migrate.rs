//! Database schema migrations.
//!
//! Creates all tables backing the Text Store (C3), Vector Store (C2), and
//! Coordinator (C11) resume cursors. Idempotent: safe to run on every
//! startup, matching the teacher's `CREATE TABLE IF NOT EXISTS` + explicit
//! FTS5-existence check convention.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Text Store (C3): the authoritative chunk record.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            text TEXT NOT NULL,
            title TEXT,
            heading_path TEXT NOT NULL DEFAULT '[]',
            url TEXT NOT NULL,
            language TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            orphaned_at INTEGER,
            pending_embedding INTEGER NOT NULL DEFAULT 0,
            UNIQUE(project_id, document_id, chunk_index)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                text,
                title
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    // Vector Store (C2): a derived index, secondary to the text store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Coordinator (C11) resume cursors, generalizing the teacher's
    // connector-name-keyed checkpoints table to (project_id, source_id).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resume_cursors (
            project_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (project_id, source_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Document-level content hash, tracked separately from per-chunk hashes
    // so the Indexer (C8) can skip re-parsing/re-chunking an unchanged
    // RawDocument without scanning every chunk under it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_hashes (
            document_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_project_id ON chunks(project_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_source_url ON chunks(source_id, url)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_project_id ON chunk_vectors(project_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
