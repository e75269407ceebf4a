//! Coordinator (C11): drives one indexing run across a project's sources.
//!
//! Applies the Quality Gate (C7) before a `GitHubRepo` source is handed to
//! the Indexer, caps in-flight sources with a semaphore sized off
//! `crawler.concurrency`, and persists/loads resume cursors through the
//! Text Store so a `--resume` invocation picks back up mid-source instead
//! of restarting it. A [`tokio_util::sync::CancellationToken`] lets the
//! CLI's Ctrl-C handler stop a run between sources without killing an
//! in-flight document write.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::embedding;
use crate::indexer::{IndexReport, Indexer, RunStatus};
use crate::quality_gate::{QualityDecision, QualityGate, StaticRelevanceScorer};
use crate::registry::Registry;
use crate::source_adapters::build_adapter;
use crate::text_store::TextStore;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Skipped,
    Succeeded,
    Partial,
    Failed,
}

#[derive(Debug)]
pub struct SourceRunResult {
    pub source_id: String,
    pub state: SourceState,
    pub report: Option<IndexReport>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub sources: Vec<SourceRunResult>,
}

impl BatchReport {
    /// `true` iff every attempted source fully succeeded. A batch with zero
    /// attempted sources (e.g. all excluded by `--source`) counts as
    /// succeeded — there was nothing to fail.
    pub fn all_succeeded(&self) -> bool {
        self.sources.iter().all(|s| s.state == SourceState::Succeeded)
    }

    pub fn any_failed(&self) -> bool {
        self.sources.iter().any(|s| s.state == SourceState::Failed)
    }
}

pub struct Coordinator<'a> {
    pub config: &'a Config,
    pub registry: &'a Registry,
    pub text_store: &'a TextStore,
    pub vector_store: &'a VectorStore,
}

impl<'a> Coordinator<'a> {
    /// Runs every source mapped to `project_id`, or just `source_filter` if
    /// given. Unknown `project_id` is a caller error, not an empty batch.
    #[instrument(skip(self, cancel))]
    pub async fn index_project(
        &self,
        project_id: &str,
        source_filter: Option<&str>,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        if !self.registry.contains_project(project_id) {
            anyhow::bail!("unknown project: {project_id}");
        }
        self.reconcile_stores(project_id).await?;
        let sources = self.registry.list_sources_for(project_id);

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let scorer = StaticRelevanceScorer::default();
        let gate = QualityGate::new(http.clone(), &scorer);
        let embedding_provider = embedding::create_provider(&self.config.embedding)?;

        let quota = Arc::new(Semaphore::new(self.config.crawler.concurrency.max(1)));
        let mut report = BatchReport::default();

        for source in sources {
            if let Some(filter) = source_filter {
                if source.id() != filter {
                    continue;
                }
            }

            if cancel.is_cancelled() {
                info!(source_id = source.id(), "run cancelled, skipping remaining sources");
                report.sources.push(SourceRunResult {
                    source_id: source.id().to_string(),
                    state: SourceState::Skipped,
                    report: None,
                    error: Some("cancelled".to_string()),
                });
                continue;
            }

            let decision = gate.evaluate(source, project_id).await?;
            if let QualityDecision::Rejected { reason } = decision {
                warn!(source_id = source.id(), %reason, "source rejected by quality gate, skipping");
                report.sources.push(SourceRunResult {
                    source_id: source.id().to_string(),
                    state: SourceState::Skipped,
                    report: None,
                    error: Some(reason),
                });
                continue;
            }

            let _permit = quota.clone().acquire_owned().await?;

            let resume_cursor = if resume {
                self.text_store
                    .load_resume_cursor(project_id, source.id())
                    .await?
            } else {
                None
            };

            let project = self
                .registry
                .load_project(project_id)
                .expect("project existence checked above");
            let adapter = build_adapter(source, http.clone(), &project.crawler_policy);

            let indexer = Indexer {
                text_store: self.text_store,
                vector_store: self.vector_store,
                embedding_provider: embedding_provider.as_ref(),
                embedding_config: &self.config.embedding,
                chunking_config: &self.config.chunking,
            };

            info!(source_id = source.id(), "indexing source");
            match indexer.index_source(source, adapter.as_ref(), resume_cursor).await {
                Ok(run_report) => {
                    match &run_report.next_cursor {
                        Some(cursor) => {
                            self.text_store
                                .save_resume_cursor(project_id, source.id(), cursor)
                                .await?;
                        }
                        None => {
                            self.text_store.clear_resume_cursor(project_id, source.id()).await?;
                        }
                    }
                    let state = match run_report.status {
                        RunStatus::Succeeded => SourceState::Succeeded,
                        RunStatus::Partial => SourceState::Partial,
                    };
                    report.sources.push(SourceRunResult {
                        source_id: source.id().to_string(),
                        state,
                        report: Some(run_report),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(source_id = source.id(), error = %err, "source run failed");
                    report.sources.push(SourceRunResult {
                        source_id: source.id().to_string(),
                        state: SourceState::Failed,
                        report: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Two-store consistency sweep (§9 design notes): the Text Store is
    /// authoritative, the Vector Store derived. A chunk live in the Text
    /// Store but missing its vector (e.g. a crash between the two phases of
    /// a write) is flagged `pendingEmbedding` so the next indexing pass
    /// re-embeds it; a vector with no matching live Text Store record is
    /// orphaned so it stops showing up in dense search.
    async fn reconcile_stores(&self, project_id: &str) -> Result<()> {
        let text_ids: HashSet<String> =
            self.text_store.all_active_chunk_ids(project_id).await?.into_iter().collect();
        let vector_ids: HashSet<String> =
            self.vector_store.active_chunk_ids(project_id).await?.into_iter().collect();

        let missing_vectors: Vec<String> = text_ids.difference(&vector_ids).cloned().collect();
        if !missing_vectors.is_empty() {
            warn!(
                project_id,
                count = missing_vectors.len(),
                "chunks have no matching dense vector, scheduling re-embedding"
            );
            self.text_store.mark_pending_embedding(&missing_vectors).await?;
        }

        let stale_vectors: Vec<String> = vector_ids.difference(&text_ids).cloned().collect();
        if !stale_vectors.is_empty() {
            warn!(
                project_id,
                count = stale_vectors.len(),
                "vectors have no matching live text-store record, orphaning"
            );
            self.vector_store.mark_orphaned(&stale_vectors).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig, QualityConfig, RegistryConfig, ServerConfig};
    use crate::db;
    use crate::migrate;
    use crate::models::{Chunk, ChunkType};
    use crate::vector_store::VectorPoint;
    use std::fs;

    fn write_layout(root: &std::path::Path) {
        fs::create_dir_all(root.join("projects")).unwrap();
        fs::create_dir_all(root.join("sources")).unwrap();
        fs::write(root.join("projects/demo.json"), r#"{"id": "demo", "name": "Demo"}"#).unwrap();
        fs::write(
            root.join("sources/demo-docs.json"),
            r#"{"kind": "local-markdown", "id": "demo-docs", "project_id": "demo", "root": "/tmp/demo", "url_prefix": "demo"}"#,
        )
        .unwrap();
        fs::write(
            root.join("mapping.json"),
            r#"{"projects": [{"project_id": "demo", "source_ids": ["demo-docs"]}]}"#,
        )
        .unwrap();
    }

    fn test_chunk(chunk_id: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            document_id: "doc-1".to_string(),
            project_id: "demo".to_string(),
            source_id: "demo-docs".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_type: ChunkType::Prose,
            text: "reconciliation fixture".to_string(),
            title: Some("Fixture".to_string()),
            heading_path: vec!["Fixture".to_string()],
            url: "generated-docs://demo/fixture.md".to_string(),
            language: None,
            content_hash: "hash".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            orphaned_at: None,
        }
    }

    #[tokio::test]
    async fn reconcile_flags_text_chunk_missing_its_vector_as_pending() {
        let registry_dir = tempfile::tempdir().unwrap();
        write_layout(registry_dir.path());
        let db_dir = tempfile::tempdir().unwrap();

        let config = Config {
            db: DbConfig { path: db_dir.path().join("data.sqlite") },
            server: ServerConfig { bind: "127.0.0.1:0".into() },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            crawler: Default::default(),
            registry: RegistryConfig { config_root: registry_dir.path().to_path_buf() },
            quality: QualityConfig::default(),
        };
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        let text_store = TextStore::new(pool.clone());
        let vector_store = VectorStore::new(pool);
        let registry = Registry::load(&config.registry.config_root, &config.quality).unwrap();

        // Simulate a crash between the two phases of a write: the chunk
        // landed in the Text Store but never got its vector.
        text_store.upsert(&[test_chunk("orphan-of-vector-failure")]).await.unwrap();

        let coordinator = Coordinator {
            config: &config,
            registry: &registry,
            text_store: &text_store,
            vector_store: &vector_store,
        };
        coordinator.reconcile_stores("demo").await.unwrap();

        // Pending-embedding chunks are excluded from dense search until
        // re-embedded; the text record itself must still be retrievable.
        let chunks = text_store.get_by_chunk_ids(&["orphan-of-vector-failure".to_string()]).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_orphans_vectors_with_no_live_text_record() {
        let registry_dir = tempfile::tempdir().unwrap();
        write_layout(registry_dir.path());
        let db_dir = tempfile::tempdir().unwrap();

        let config = Config {
            db: DbConfig { path: db_dir.path().join("data.sqlite") },
            server: ServerConfig { bind: "127.0.0.1:0".into() },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            crawler: Default::default(),
            registry: RegistryConfig { config_root: registry_dir.path().to_path_buf() },
            quality: QualityConfig::default(),
        };
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        let text_store = TextStore::new(pool.clone());
        let vector_store = VectorStore::new(pool);
        let registry = Registry::load(&config.registry.config_root, &config.quality).unwrap();

        vector_store
            .upsert(&[VectorPoint {
                chunk_id: "stale-vector".to_string(),
                project_id: "demo".to_string(),
                source_id: "demo-docs".to_string(),
                chunk_type: ChunkType::Prose,
                embedding: vec![1.0, 0.0],
            }])
            .await
            .unwrap();

        let coordinator = Coordinator {
            config: &config,
            registry: &registry,
            text_store: &text_store,
            vector_store: &vector_store,
        };
        coordinator.reconcile_stores("demo").await.unwrap();

        let active = vector_store.active_chunk_ids("demo").await.unwrap();
        assert!(active.is_empty(), "stale vector should have been orphaned, got: {active:?}");
    }
}
