//! Vector Store (C2): a derived, secondary index over chunk embeddings.
//!
//! Authoritative metadata lives in the Text Store (C3); this module only
//! ever stores `(chunkId, embedding)` plus the handful of columns needed to
//! filter a scan without a join. `searchKNN` is a brute-force cosine scan,
//! narrowed by `project_id`/`orphaned`/`chunk_type` in SQL before scoring in
//! Rust — the same shape as the teacher's keyword/vector candidate fetch in
//! the original `search.rs`, minus the now-removed `documents` join.

use anyhow::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::ChunkType;

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk_id: String,
    pub project_id: String,
    pub source_id: String,
    pub chunk_type: ChunkType,
    pub embedding: Vec<f32>,
}

pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent on `chunk_id`.
    pub async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for point in points {
            let blob = vec_to_blob(&point.embedding);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, project_id, source_id, chunk_type, orphaned, embedding, updated_at)
                VALUES (?, ?, ?, ?, 0, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    project_id = excluded.project_id,
                    source_id = excluded.source_id,
                    chunk_type = excluded.chunk_type,
                    orphaned = 0,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&point.chunk_id)
            .bind(&point.project_id)
            .bind(&point.source_id)
            .bind(point.chunk_type.as_str())
            .bind(blob)
            .bind(now)
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
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM chunk_vectors WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Marks points orphaned rather than deleting them, mirroring the Text
    /// Store's orphaning so a reconciliation sweep can find stores that
    /// disagree about which chunks are live.
    pub async fn mark_orphaned(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE chunk_vectors SET orphaned = 1 WHERE chunk_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Cosine-similarity scan over non-orphaned vectors in `project_id`,
    /// optionally narrowed to `type_filter`. Returns the top `k` as
    /// `(chunk_id, score)` descending.
    pub async fn search_knn(
        &self,
        query_vector: &[f32],
        k: usize,
        project_id: &str,
        type_filter: Option<&[ChunkType]>,
    ) -> Result<Vec<(String, f64)>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT chunk_id, embedding FROM chunk_vectors WHERE project_id = ",
        );
        qb.push_bind(project_id);
        qb.push(" AND orphaned = 0");
        if let Some(types) = type_filter {
            if !types.is_empty() {
                qb.push(" AND chunk_type IN (");
                let mut separated = qb.separated(", ");
                for t in types {
                    separated.push_bind(t.as_str());
                }
                separated.push_unseparated(")");
            }
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut scored: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let chunk_id: String = row.get("chunk_id");
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let score = cosine_similarity(query_vector, &vector) as f64;
                (chunk_id, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// `true` if any non-orphaned vector exists for `project_id` — used by
    /// the Hybrid Searcher to decide whether the dense side of a query is
    /// even populated, vs. just empty because nothing has embedded yet.
    pub async fn has_any_vectors(&self, project_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunk_vectors WHERE project_id = ? AND orphaned = 0",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// `chunk_id`s present in this store and not orphaned, for the Two-store
    /// consistency reconciliation sweep (§9 design notes).
    pub async fn active_chunk_ids(&self, project_id: &str) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_id FROM chunk_vectors WHERE project_id = ? AND orphaned = 0",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::migrate;

    fn test_config(db_path: std::path::PathBuf) -> Config {
        Config {
            db: crate::config::DbConfig { path: db_path },
            server: crate::config::ServerConfig { bind: "127.0.0.1:0".into() },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            crawler: Default::default(),
            registry: crate::config::RegistryConfig { config_root: "/tmp/nonexistent".into() },
            quality: Default::default(),
        }
    }

    async fn test_store() -> VectorStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");
        std::mem::forget(dir);
        let config = test_config(db_path);
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        VectorStore::new(pool)
    }

    fn point(chunk_id: &str, project_id: &str, embedding: Vec<f32>) -> VectorPoint {
        VectorPoint {
            chunk_id: chunk_id.to_string(),
            project_id: project_id.to_string(),
            source_id: "src-1".to_string(),
            chunk_type: ChunkType::Prose,
            embedding,
        }
    }

    #[tokio::test]
    async fn knn_returns_nearest_first() {
        let store = test_store().await;
        store
            .upsert(&[
                point("close", "proj", vec![1.0, 0.0, 0.0]),
                point("far", "proj", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search_knn(&[0.9, 0.1, 0.0], 2, "proj", None).await.unwrap();
        assert_eq!(hits[0].0, "close");
    }

    #[tokio::test]
    async fn knn_excludes_orphaned_points() {
        let store = test_store().await;
        store.upsert(&[point("c1", "proj", vec![1.0, 0.0])]).await.unwrap();
        store.mark_orphaned(&["c1".to_string()]).await.unwrap();

        let hits = store.search_knn(&[1.0, 0.0], 10, "proj", None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn knn_is_project_scoped() {
        let store = test_store().await;
        store.upsert(&[point("c1", "mina", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[point("c2", "solana", vec![1.0, 0.0])]).await.unwrap();

        let hits = store.search_knn(&[1.0, 0.0], 10, "mina", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c1");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_chunk_id() {
        let store = test_store().await;
        store.upsert(&[point("c1", "proj", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[point("c1", "proj", vec![0.0, 1.0])]).await.unwrap();

        let hits = store.search_knn(&[0.0, 1.0], 10, "proj", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }
}
