//! Hybrid Searcher (C9): fuses dense (vector) and lexical (full-text)
//! candidate lists with Reciprocal Rank Fusion.
//!
//! `score(c) = Σ_l 1 / (K + rank_l(c))`, `K = 60` by default
//! ([`crate::config::RetrievalConfig::rrf_k`]), summed over the lists
//! containing `c` — a chunk present in only one list still scores, just
//! lower. Dense and lexical queries run concurrently via `tokio::join!`;
//! either side failing degrades the result to the other rather than
//! failing the whole search.

use std::collections::HashMap;

use anyhow::{bail, Result};
use tracing::{instrument, warn};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{ChunkType, SearchHit};
use crate::registry::Registry;
use crate::text_store::TextStore;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub k: Option<usize>,
    pub k_dense: Option<usize>,
    pub k_lexical: Option<usize>,
    pub type_filter: Option<Vec<ChunkType>>,
    pub expand_adjacent: bool,
}

#[derive(Debug)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// `true` if either the dense or lexical side failed and the response
    /// reflects only the surviving side.
    pub degraded: bool,
}

pub struct HybridSearcher<'a> {
    pub registry: &'a Registry,
    pub text_store: &'a TextStore,
    pub vector_store: &'a VectorStore,
    pub embedding_provider: &'a dyn EmbeddingProvider,
    pub config: &'a Config,
}

impl<'a> HybridSearcher<'a> {
    #[instrument(skip(self, options), fields(project_id, query))]
    pub async fn search(
        &self,
        query: &str,
        project_id: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        if !self.registry.contains_project(project_id) {
            bail!("unknown project: {project_id}");
        }

        let k = options.k.unwrap_or(self.config.retrieval.k);
        let k_dense = options.k_dense.unwrap_or(self.config.retrieval.k_dense);
        let k_lexical = options.k_lexical.unwrap_or(self.config.retrieval.k_lexical);
        let rrf_k = self.config.retrieval.rrf_k;
        let type_filter = options.type_filter.as_deref();

        let (dense_result, lexical_result) = tokio::join!(
            self.dense_candidates(query, k_dense, project_id, type_filter),
            self.lexical_candidates(query, k_lexical, project_id, type_filter),
        );

        let mut degraded = false;
        let dense = match dense_result {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "dense search failed, degrading to lexical-only");
                degraded = true;
                Vec::new()
            }
        };
        let lexical = match lexical_result {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "lexical search failed, degrading to dense-only");
                degraded = true;
                Vec::new()
            }
        };

        if dense.is_empty() && lexical.is_empty() {
            return Ok(SearchResponse { hits: Vec::new(), degraded });
        }

        let fused = fuse_rrf(&dense, &lexical, rrf_k);
        let top: Vec<(String, f64, Option<usize>, Option<usize>)> =
            fused.into_iter().take(k).collect();

        let chunk_ids: Vec<String> = top.iter().map(|(id, ..)| id.clone()).collect();
        let chunks = self.text_store.get_by_chunk_ids(&chunk_ids).await?;
        let mut chunks_by_id: HashMap<String, crate::models::Chunk> =
            chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();

        let mut hits = Vec::with_capacity(top.len());
        for (chunk_id, score, dense_rank, lexical_rank) in top {
            let Some(chunk) = chunks_by_id.remove(&chunk_id) else {
                continue;
            };
            if chunk.is_orphaned() {
                continue;
            }

            let adjacent = if options.expand_adjacent {
                self.text_store
                    .get_adjacent(&chunk.document_id, chunk.chunk_index)
                    .await?
                    .into_iter()
                    .map(|c| crate::models::AdjacentChunk {
                        chunk_id: c.chunk_id,
                        chunk_index: c.chunk_index,
                        text: c.text,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            hits.push(SearchHit {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                project_id: chunk.project_id,
                url: chunk.url,
                title: chunk.title,
                chunk_type: chunk.chunk_type.as_str().to_string(),
                language: chunk.language,
                text: chunk.text,
                score,
                dense_rank,
                lexical_rank,
                adjacent,
            });
        }

        Ok(SearchResponse { hits, degraded })
    }

    async fn dense_candidates(
        &self,
        query: &str,
        k: usize,
        project_id: &str,
        type_filter: Option<&[ChunkType]>,
    ) -> Result<Vec<(String, f64)>> {
        if k == 0 || !self.vector_store.has_any_vectors(project_id).await? {
            return Ok(Vec::new());
        }
        let config = &self.config.embedding;
        if !config.is_enabled() {
            return Ok(Vec::new());
        }
        let query_vec = embedding::embed_query(self.embedding_provider, config, query).await?;
        self.vector_store
            .search_knn(&query_vec, k, project_id, type_filter)
            .await
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        k: usize,
        project_id: &str,
        type_filter: Option<&[ChunkType]>,
    ) -> Result<Vec<(String, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.text_store
            .search_full_text(query, k, project_id, type_filter)
            .await
    }
}

/// Combine two score-sorted `(chunkId, score)` candidate lists into fused
/// `(chunkId, rrfScore, denseRank, lexicalRank)` tuples, sorted descending
/// by fused score (ties by `chunkId` ascending for determinism).
fn fuse_rrf(
    dense: &[(String, f64)],
    lexical: &[(String, f64)],
    rrf_k: f64,
) -> Vec<(String, f64, Option<usize>, Option<usize>)> {
    let dense_ranks: HashMap<&str, usize> = dense
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i + 1))
        .collect();
    let lexical_ranks: HashMap<&str, usize> = lexical
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i + 1))
        .collect();

    let mut ids: Vec<&str> = Vec::new();
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for (id, _) in dense.iter().chain(lexical.iter()) {
        if seen.insert(id.as_str()) {
            ids.push(id.as_str());
        }
    }

    let mut fused: Vec<(String, f64, Option<usize>, Option<usize>)> = ids
        .into_iter()
        .map(|id| {
            let dense_rank = dense_ranks.get(id).copied();
            let lexical_rank = lexical_ranks.get(id).copied();
            let mut score = 0.0;
            if let Some(r) = dense_rank {
                score += 1.0 / (rrf_k + r as f64);
            }
            if let Some(r) = lexical_rank {
                score += 1.0 / (rrf_k + r as f64);
            }
            (id.to_string(), score, dense_rank, lexical_rank)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_favors_chunk_present_in_both_lists() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let lexical = vec![("b".to_string(), 10.0), ("a".to_string(), 1.0)];
        let fused = fuse_rrf(&dense, &lexical, 60.0);
        // Both "a" and "b" appear in both lists at the same rank pairs,
        // so fused scores tie; deterministic tiebreak is chunk_id asc.
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn rrf_scores_lower_rank_higher() {
        let dense = vec![
            ("first".to_string(), 0.9),
            ("second".to_string(), 0.8),
            ("third".to_string(), 0.7),
        ];
        let lexical = Vec::new();
        let fused = fuse_rrf(&dense, &lexical, 60.0);
        assert_eq!(fused[0].0, "first");
        assert_eq!(fused[1].0, "second");
        assert_eq!(fused[2].0, "third");
        assert!(fused[0].1 > fused[1].1);
        assert!(fused[1].1 > fused[2].1);
    }

    #[test]
    fn rrf_includes_candidates_present_in_only_one_list() {
        let dense = vec![("dense-only".to_string(), 0.9)];
        let lexical = vec![("lexical-only".to_string(), 5.0)];
        let fused = fuse_rrf(&dense, &lexical, 60.0);
        assert_eq!(fused.len(), 2);
        let ids: Vec<&str> = fused.iter().map(|(id, ..)| id.as_str()).collect();
        assert!(ids.contains(&"dense-only"));
        assert!(ids.contains(&"lexical-only"));
    }

    #[test]
    fn rrf_scenario_matches_spec_formula() {
        // Two candidates each appear once in each list but at different ranks.
        let dense = vec![("branch-if".to_string(), 0.8), ("other".to_string(), 0.2)];
        let lexical = vec![("other".to_string(), 4.0), ("branch-if".to_string(), 1.0)];
        let fused = fuse_rrf(&dense, &lexical, 60.0);
        let branch = fused.iter().find(|(id, ..)| id == "branch-if").unwrap();
        // dense rank 1, lexical rank 2
        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((branch.1 - expected).abs() < 1e-9);
    }
}
