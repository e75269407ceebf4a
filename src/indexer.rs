//! Indexer (C8): the parse → chunk → embed → upsert pipeline for one
//! source's documents.
//!
//! Writes the Text Store first (cheap to roll back, authoritative for
//! metadata), then the Vector Store; a Vector Store failure marks the
//! affected chunks `pendingEmbedding` in the Text Store rather than
//! failing the whole document, so a later run can retry just the
//! embedding step. Orphaning happens two ways: chunks within a changed
//! document that weren't re-emitted, and whole documents whose URL wasn't
//! visited this run (deleted upstream, or excluded by a policy change).

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::chunk::{chunk_sections, ChunkerInput};
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{Chunk, RawDocument, Source};
use crate::parser::parse_document;
use crate::source_adapters::SourceAdapter;
use crate::text_store::TextStore;
use crate::vector_store::{VectorPoint, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Partial,
}

#[derive(Debug)]
pub struct IndexReport {
    pub documents_seen: usize,
    pub documents_changed: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_orphaned: usize,
    pub next_cursor: Option<String>,
    pub status: RunStatus,
}

impl Default for IndexReport {
    fn default() -> Self {
        Self {
            documents_seen: 0,
            documents_changed: 0,
            documents_skipped: 0,
            documents_failed: 0,
            chunks_orphaned: 0,
            next_cursor: None,
            status: RunStatus::Succeeded,
        }
    }
}

pub struct Indexer<'a> {
    pub text_store: &'a TextStore,
    pub vector_store: &'a VectorStore,
    pub embedding_provider: &'a dyn EmbeddingProvider,
    pub embedding_config: &'a EmbeddingConfig,
    pub chunking_config: &'a ChunkingConfig,
}

impl<'a> Indexer<'a> {
    /// Runs one source's adapter to exhaustion (or to the cursor the
    /// Coordinator hands back for the next `--resume` run), then orphans
    /// any document URL previously indexed for this source that wasn't
    /// visited this time.
    #[instrument(skip(self, adapter, resume_cursor), fields(source_id = source.id()))]
    pub async fn index_source(
        &self,
        source: &Source,
        adapter: &dyn SourceAdapter,
        resume_cursor: Option<String>,
    ) -> Result<IndexReport> {
        let project_id = source.project_id().to_string();
        let source_id = source.id().to_string();

        let previously_indexed = self
            .text_store
            .document_urls_for_source(&project_id, &source_id)
            .await?;
        let mut visited_urls: HashSet<String> = HashSet::new();

        let mut report = IndexReport::default();
        let mut cursor = resume_cursor;
        loop {
            let batch = adapter.fetch(cursor.clone()).await?;
            for doc in &batch.documents {
                visited_urls.insert(doc.url.clone());
                report.documents_seen += 1;
                match self.index_document(&project_id, &source_id, doc).await {
                    Ok(true) => report.documents_changed += 1,
                    Ok(false) => report.documents_skipped += 1,
                    Err(err) => {
                        warn!(url = %doc.url, error = %err, "document failed to index, continuing run");
                        report.documents_failed += 1;
                    }
                }
            }
            cursor = batch.next_cursor.clone();
            if batch.done {
                report.next_cursor = None;
                break;
            }
            report.next_cursor = cursor.clone();
        }

        for (url, document_id) in previously_indexed {
            if visited_urls.contains(&url) {
                continue;
            }
            let stale_chunks = self.text_store.get_by_document(&document_id).await?;
            let ids: Vec<String> = stale_chunks
                .iter()
                .filter(|c| !c.is_orphaned())
                .map(|c| c.chunk_id.clone())
                .collect();
            if ids.is_empty() {
                continue;
            }
            self.text_store.mark_orphaned(&ids).await?;
            self.vector_store.mark_orphaned(&ids).await?;
            self.text_store.forget_document_hash(&document_id).await?;
            report.chunks_orphaned += ids.len();
        }

        report.status = if report.documents_failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
        info!(
            seen = report.documents_seen,
            changed = report.documents_changed,
            skipped = report.documents_skipped,
            failed = report.documents_failed,
            orphaned = report.chunks_orphaned,
            "source run complete"
        );
        Ok(report)
    }

    /// Returns `true` if the document's content changed and was
    /// (re)chunked, `false` if it was skipped because its content hash
    /// matched the previously indexed one.
    async fn index_document(&self, project_id: &str, source_id: &str, doc: &RawDocument) -> Result<bool> {
        let document_id = doc.document_id();

        if let Some(stored_hash) = self.text_store.document_hash(&document_id).await? {
            if stored_hash == doc.content_hash {
                return Ok(false);
            }
        }

        let sections = parse_document(&doc.body, &doc.content_type);
        let input = ChunkerInput {
            project_id,
            source_id,
            document_id: &document_id,
            url: &doc.url,
            sections: &sections,
            max_chars: self.chunking_config.max_chars,
            overlap_chars: self.chunking_config.overlap_chars,
        };
        let new_chunks = chunk_sections(&input);

        let previous_chunks = self.text_store.get_by_document(&document_id).await?;
        let previous_by_id: HashMap<&str, &Chunk> =
            previous_chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

        let mut to_embed: Vec<Chunk> = Vec::new();
        for chunk in &new_chunks {
            match previous_by_id.get(chunk.chunk_id.as_str()) {
                Some(prev) if prev.content_hash == chunk.content_hash && !prev.is_orphaned() => {}
                _ => to_embed.push(chunk.clone()),
            }
        }

        // Text Store first: cheap to roll back, authoritative for metadata.
        self.text_store.upsert(&new_chunks).await?;

        if !to_embed.is_empty() {
            self.embed_and_store(&to_embed).await?;
        }

        let new_ids: HashSet<&str> = new_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let stale: Vec<String> = previous_chunks
            .iter()
            .filter(|c| !c.is_orphaned() && !new_ids.contains(c.chunk_id.as_str()))
            .map(|c| c.chunk_id.clone())
            .collect();
        if !stale.is_empty() {
            self.text_store.mark_orphaned(&stale).await?;
            self.vector_store.mark_orphaned(&stale).await?;
        }

        self.text_store
            .record_document_hash(project_id, source_id, &doc.url, &document_id, &doc.content_hash)
            .await?;

        Ok(true)
    }

    /// Embeds `chunks` in `embedding.batch_size`-sized groups and writes
    /// the Vector Store. A group that fails (provider error or store
    /// write) is marked `pendingEmbedding` in the Text Store for retry on
    /// the next run, rather than failing the whole document.
    async fn embed_and_store(&self, chunks: &[Chunk]) -> Result<()> {
        if !self.embedding_config.is_enabled() {
            info!("embedding provider disabled, leaving changed chunks lexical-only");
            return Ok(());
        }

        let batch_size = self.embedding_config.batch_size.max(1);
        for batch in chunks.chunks(batch_size) {
            let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let vectors = match embedding::embed_texts(self.embedding_provider, self.embedding_config, &texts).await {
                Ok(vectors) => vectors,
                Err(err) => {
                    warn!(error = %err, "embedding call failed, chunks left pending");
                    self.text_store.mark_pending_embedding(&ids).await?;
                    continue;
                }
            };

            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(c, v)| VectorPoint {
                    chunk_id: c.chunk_id.clone(),
                    project_id: c.project_id.clone(),
                    source_id: c.source_id.clone(),
                    chunk_type: c.chunk_type,
                    embedding: v,
                })
                .collect();

            match self.vector_store.upsert(&points).await {
                Ok(()) => self.text_store.clear_pending_embedding(&ids).await?,
                Err(err) => {
                    warn!(error = %err, "vector store write failed, marking pending embedding for retry");
                    self.text_store.mark_pending_embedding(&ids).await?;
                }
            }
        }
        Ok(())
    }
}
