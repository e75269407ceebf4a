//! Text Store (C3): the authoritative record of chunk metadata, plus a
//! tokenized full-text index over `text`/`title` (SQLite FTS5/BM25).
//!
//! The Vector Store (C2) is a derived index; this module is the source of
//! truth for orphaning and for the resume cursors the Coordinator (C11)
//! persists between runs. Mirrors the teacher's `chunks`/`chunks_fts`
//! pairing in `migrate.rs`, generalized with `project_id`/`source_id`/
//! `chunk_type`/`orphaned_at` columns.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::models::{Chunk, ChunkType};

pub struct TextStore {
    pool: SqlitePool,
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let heading_path: String = row.get("heading_path");
    let chunk_type: String = row.get("chunk_type");
    Chunk {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        project_id: row.get("project_id"),
        source_id: row.get("source_id"),
        chunk_index: row.get("chunk_index"),
        total_chunks: row.get("total_chunks"),
        chunk_type: ChunkType::parse(&chunk_type).unwrap_or(ChunkType::Prose),
        text: row.get("text"),
        title: row.get("title"),
        heading_path: serde_json::from_str(&heading_path).unwrap_or_default(),
        url: row.get("url"),
        language: row.get("language"),
        content_hash: row.get("content_hash"),
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
        orphaned_at: row.get::<Option<i64>, _>("orphaned_at").map(from_ts),
    }
}

impl TextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent on `chunk_id`: replaces the row and its FTS entry.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        // Indexed in `chunkIndex` order within a document (§5 ordering guarantee).
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.chunk_index);

        let mut tx = self.pool.begin().await?;
        for chunk in ordered {
            let heading_path = serde_json::to_string(&chunk.heading_path)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    chunk_id, document_id, project_id, source_id, chunk_index,
                    total_chunks, chunk_type, text, title, heading_path, url,
                    language, content_hash, created_at, updated_at, orphaned_at,
                    pending_embedding
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    project_id = excluded.project_id,
                    source_id = excluded.source_id,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    chunk_type = excluded.chunk_type,
                    text = excluded.text,
                    title = excluded.title,
                    heading_path = excluded.heading_path,
                    url = excluded.url,
                    language = excluded.language,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at,
                    orphaned_at = NULL
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(&chunk.project_id)
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(chunk.total_chunks)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.text)
            .bind(&chunk.title)
            .bind(&heading_path)
            .bind(&chunk.url)
            .bind(&chunk.language)
            .bind(&chunk.content_hash)
            .bind(to_ts(chunk.created_at))
            .bind(to_ts(chunk.updated_at))
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&chunk.chunk_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO chunks_fts (chunk_id, text, title) VALUES (?, ?, ?)")
                .bind(&chunk.chunk_id)
                .bind(&chunk.text)
                .bind(chunk.title.clone().unwrap_or_default())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Supersede chunks from an earlier run; excluded from search but kept
    /// for a later reclamation sweep.
    pub async fn mark_orphaned(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let now = to_ts(Utc::now());
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE chunks SET orphaned_at = ");
        qb.push_bind(now);
        qb.push(" WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_pending_embedding(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE chunks SET pending_embedding = 1 WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn clear_pending_embedding(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE chunks SET pending_embedding = 0 WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Tokenized BM25 match over `text`/`title`, excluding orphaned chunks.
    /// Returns `(chunk_id, score)` descending by relevance.
    pub async fn search_full_text(
        &self,
        query: &str,
        k: usize,
        project_id: &str,
        type_filter: Option<&[ChunkType]>,
    ) -> Result<Vec<(String, f64)>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.chunk_id AS chunk_id, bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.chunk_id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH
            "#,
        );
        qb.push_bind(query);
        qb.push(" AND c.project_id = ");
        qb.push_bind(project_id);
        qb.push(" AND c.orphaned_at IS NULL");
        push_type_filter(&mut qb, type_filter);
        qb.push(" ORDER BY rank LIMIT ");
        qb.push_bind(k as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                (row.get::<String, _>("chunk_id"), -rank)
            })
            .collect())
    }

    pub async fn get_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    pub async fn get_by_chunk_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM chunks WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    pub async fn get_adjacent(
        &self,
        document_id: &str,
        chunk_index: i64,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = ? AND chunk_index IN (?, ?) AND orphaned_at IS NULL",
        )
        .bind(document_id)
        .bind(chunk_index - 1)
        .bind(chunk_index + 1)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// `true` if any non-orphaned chunk exists for `project_id`.
    pub async fn has_any_chunks(&self, project_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE project_id = ? AND orphaned_at IS NULL",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// `(url, document_id)` pairs previously indexed for `(project_id,
    /// source_id)`, used by the Indexer to detect URLs no longer visited.
    pub async fn document_urls_for_source(
        &self,
        project_id: &str,
        source_id: &str,
    ) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT url, document_id FROM chunks WHERE project_id = ? AND source_id = ?",
        )
        .bind(project_id)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("url"), r.get::<String, _>("document_id")))
            .collect())
    }

    /// The last recorded `RawDocument.contentHash` for `document_id`, used
    /// to gate re-parsing/re-chunking unchanged documents.
    pub async fn document_hash(&self, document_id: &str) -> Result<Option<String>> {
        let row: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM document_hashes WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn record_document_hash(
        &self,
        project_id: &str,
        source_id: &str,
        url: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_hashes (document_id, project_id, source_id, url, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id)
        .bind(project_id)
        .bind(source_id)
        .bind(url)
        .bind(content_hash)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn forget_document_hash(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_hashes WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Coordinator (C11) resume cursors ============

    pub async fn load_resume_cursor(&self, project_id: &str, source_id: &str) -> Result<Option<String>> {
        let row: Option<String> = sqlx::query_scalar(
            "SELECT cursor FROM resume_cursors WHERE project_id = ? AND source_id = ?",
        )
        .bind(project_id)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_resume_cursor(&self, project_id: &str, source_id: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_cursors (project_id, source_id, cursor, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, source_id) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(source_id)
        .bind(cursor)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_resume_cursor(&self, project_id: &str, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM resume_cursors WHERE project_id = ? AND source_id = ?")
            .bind(project_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `chunk_id`s present in this store and not orphaned, for the
    /// Two-store consistency reconciliation sweep (§9 design notes).
    pub async fn all_active_chunk_ids(&self, project_id: &str) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_id FROM chunks WHERE project_id = ? AND orphaned_at IS NULL",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn push_type_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, type_filter: Option<&'a [ChunkType]>) {
    if let Some(types) = type_filter {
        if !types.is_empty() {
            qb.push(" AND c.chunk_type IN (");
            let mut separated = qb.separated(", ");
            for t in types {
                separated.push_bind(t.as_str());
            }
            separated.push_unseparated(")");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use chrono::Utc;

    async fn test_store() -> TextStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");
        std::mem::forget(dir);
        let mut config = test_config(db_path);
        config.embedding.provider = "disabled".to_string();
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        TextStore::new(pool)
    }

    fn test_config(db_path: std::path::PathBuf) -> crate::config::Config {
        crate::config::Config {
            db: crate::config::DbConfig { path: db_path },
            server: crate::config::ServerConfig {
                bind: "127.0.0.1:0".into(),
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            crawler: Default::default(),
            registry: crate::config::RegistryConfig {
                config_root: "/tmp/nonexistent".into(),
            },
            quality: Default::default(),
        }
    }

    fn make_chunk(chunk_id: &str, project_id: &str, document_id: &str, idx: i64, text: &str) -> Chunk {
        let now = Utc::now();
        Chunk {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            project_id: project_id.to_string(),
            source_id: "src-1".to_string(),
            chunk_index: idx,
            total_chunks: idx + 1,
            chunk_type: ChunkType::Prose,
            text: text.to_string(),
            title: Some("Title".to_string()),
            heading_path: vec!["Title".to_string()],
            url: "generated-docs://proj/a.md".to_string(),
            language: None,
            content_hash: crate::models::content_hash(text),
            created_at: now,
            updated_at: now,
            orphaned_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_chunk_id() {
        let store = test_store().await;
        let chunk = make_chunk("c1", "proj", "doc1", 0, "hello world about rust");
        store.upsert(&[chunk.clone()]).await.unwrap();
        store.upsert(&[chunk]).await.unwrap();

        let hits = store.get_by_document("doc1").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn search_full_text_excludes_orphaned() {
        let store = test_store().await;
        let chunk = make_chunk("c1", "proj", "doc1", 0, "rust programming language docs");
        store.upsert(&[chunk]).await.unwrap();

        let hits = store
            .search_full_text("rust", 10, "proj", None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        store.mark_orphaned(&["c1".to_string()]).await.unwrap();
        let hits = store
            .search_full_text("rust", 10, "proj", None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_full_text_is_project_scoped() {
        let store = test_store().await;
        store
            .upsert(&[make_chunk("c1", "mina", "doc1", 0, "deploy a zkapp contract")])
            .await
            .unwrap();
        store
            .upsert(&[make_chunk("c2", "solana", "doc2", 0, "deploy a program here")])
            .await
            .unwrap();

        let hits = store.search_full_text("deploy", 10, "mina", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c1");
    }

    #[tokio::test]
    async fn resume_cursor_roundtrip() {
        let store = test_store().await;
        assert!(store.load_resume_cursor("proj", "src-1").await.unwrap().is_none());
        store.save_resume_cursor("proj", "src-1", "cursor-data").await.unwrap();
        assert_eq!(
            store.load_resume_cursor("proj", "src-1").await.unwrap().as_deref(),
            Some("cursor-data")
        );
        store.clear_resume_cursor("proj", "src-1").await.unwrap();
        assert!(store.load_resume_cursor("proj", "src-1").await.unwrap().is_none());
    }
}
