//! Core data types shared across the ingestion and retrieval pipeline.
//!
//! These types mirror the data model: [`Project`] and [`Source`] describe
//! configuration-time entities; [`RawDocument`] is the transient unit an
//! adapter produces; [`Chunk`] is the durable, retrievable unit that both
//! stores (vector and text) key on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace UUID for deriving deterministic chunk ids via UUIDv5.
///
/// Fixed so that `chunkId` is reproducible across processes and machines;
/// changing it would orphan every previously indexed chunk.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6a, 0x1e, 0x3b, 0x52, 0x4f, 0x0d, 0x4b, 0x8a, 0x9e, 0x2c, 0x71, 0x5d, 0x3a, 0x8f, 0x02, 0x17,
]);

/// Derive a stable `chunkId` from `(sourceId, url, chunkIndex)`.
///
/// Two runs over identical parsed input produce identical ids; this is
/// what makes re-indexing idempotent and orphaning precise.
pub fn derive_chunk_id(source_id: &str, url: &str, chunk_index: i64) -> String {
    let name = format!("{source_id}\u{0}{url}\u{0}{chunk_index}");
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Identity of the `RawDocument` a chunk was produced from: `sourceId + url`.
pub fn derive_document_id(source_id: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash used for change detection (`RawDocument.contentHash`, `Chunk.contentHash`).
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A named corpus boundary. Every chunk is scoped to exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Lowercase, dash-separated identity (`^[a-z][a-z0-9-]*$`).
    pub id: String,
    pub name: String,
    /// Documentation site base URL, if this project has an HTTP doc site.
    #[serde(default)]
    pub docs_base_url: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Primary source repository, e.g. `"owner/repo"`.
    #[serde(default)]
    pub primary_repo: Option<String>,
    #[serde(default)]
    pub crawler_policy: CrawlerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerPolicy {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub use_browser: bool,
}

impl Default for CrawlerPolicy {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            delay_ms: default_delay_ms(),
            use_browser: false,
        }
    }
}

fn default_max_pages() -> usize {
    500
}
fn default_concurrency() -> usize {
    3
}
fn default_delay_ms() -> u64 {
    250
}

/// Trust level of a `GitHubRepo` source; drives Quality Gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    Official,
    VerifiedCommunity,
    Community,
}

/// Heuristic classification of a file within a `GitHubRepo` source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoType {
    Sdk,
    ExampleRepo,
    TutorialRepo,
    EcosystemLib,
}

/// Quality thresholds attached to a source; loosened/tightened by trust level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default = "default_min_doc_score")]
    pub min_doc_score: f64,
    #[serde(default = "default_min_llm_score")]
    pub min_llm_score: f64,
    #[serde(default)]
    pub require_readme: bool,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_doc_score: default_min_doc_score(),
            min_llm_score: default_min_llm_score(),
            require_readme: false,
        }
    }
}

fn default_min_doc_score() -> f64 {
    0.4
}
fn default_min_llm_score() -> f64 {
    0.5
}

/// A discoverable content location feeding exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Source {
    DocsSite {
        id: String,
        project_id: String,
        base_url: String,
        #[serde(default)]
        exclude_patterns: Vec<String>,
        #[serde(default)]
        use_browser: bool,
        #[serde(default)]
        quality: QualityThresholds,
    },
    GitHubRepo {
        id: String,
        project_id: String,
        owner: String,
        repo: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        include_globs: Vec<String>,
        #[serde(default)]
        exclude_globs: Vec<String>,
        repo_type: RepoType,
        trust_level: TrustLevel,
        #[serde(default)]
        quality: QualityThresholds,
    },
    LocalMarkdown {
        id: String,
        project_id: String,
        root: std::path::PathBuf,
        url_prefix: String,
        #[serde(default)]
        quality: QualityThresholds,
    },
}

fn default_branch() -> String {
    "main".to_string()
}

impl Source {
    pub fn id(&self) -> &str {
        match self {
            Source::DocsSite { id, .. } => id,
            Source::GitHubRepo { id, .. } => id,
            Source::LocalMarkdown { id, .. } => id,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Source::DocsSite { project_id, .. } => project_id,
            Source::GitHubRepo { project_id, .. } => project_id,
            Source::LocalMarkdown { project_id, .. } => project_id,
        }
    }

    pub fn quality(&self) -> &QualityThresholds {
        match self {
            Source::DocsSite { quality, .. } => quality,
            Source::GitHubRepo { quality, .. } => quality,
            Source::LocalMarkdown { quality, .. } => quality,
        }
    }
}

/// A single fetched unit (page or file) before parsing. Transient: produced
/// by a Source Adapter, consumed by the Parser, never persisted as-is.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub project_id: String,
    pub source_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    pub body: String,
    pub content_type: String,
}

impl RawDocument {
    pub fn document_id(&self) -> String {
        derive_document_id(&self.source_id, &self.url)
    }
}

/// One of the five retrievable chunk shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkType {
    Prose,
    Code,
    ApiReference,
    HeadingSection,
    Example,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Prose => "prose",
            ChunkType::Code => "code",
            ChunkType::ApiReference => "api-reference",
            ChunkType::HeadingSection => "heading-section",
            ChunkType::Example => "example",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prose" => Some(ChunkType::Prose),
            "code" => Some(ChunkType::Code),
            "api-reference" => Some(ChunkType::ApiReference),
            "heading-section" => Some(ChunkType::HeadingSection),
            "example" => Some(ChunkType::Example),
            _ => None,
        }
    }
}

/// The retrievable unit. Owned exclusively by the Indexer (C8); C2/C3 store
/// it but do not interpret its semantics.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub project_id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub chunk_type: ChunkType,
    pub text: String,
    pub title: Option<String>,
    pub heading_path: Vec<String>,
    pub url: String,
    /// Present iff `chunk_type == Code` (or `Example`, which carries code too).
    pub language: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub orphaned_at: Option<DateTime<Utc>>,
}

impl Chunk {
    pub fn is_orphaned(&self) -> bool {
        self.orphaned_at.is_some()
    }
}

/// A single hit returned from the Hybrid Searcher (C9).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub project_id: String,
    pub url: String,
    pub title: Option<String>,
    pub chunk_type: String,
    pub language: Option<String>,
    pub text: String,
    /// Fused RRF score.
    pub score: f64,
    /// 1-based rank within the dense candidate list, if present there.
    pub dense_rank: Option<usize>,
    /// 1-based rank within the lexical candidate list, if present there.
    pub lexical_rank: Option<usize>,
    /// Adjacent chunks (`chunkIndex ± 1`), populated when `expandAdjacent` is set.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub adjacent: Vec<AdjacentChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjacentChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let a = derive_chunk_id("src-1", "https://example.com/docs", 3);
        let b = derive_chunk_id("src-1", "https://example.com/docs", 3);
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_varies_with_index() {
        let a = derive_chunk_id("src-1", "https://example.com/docs", 0);
        let b = derive_chunk_id("src-1", "https://example.com/docs", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_id_varies_with_source() {
        let a = derive_chunk_id("src-1", "https://example.com/docs", 0);
        let b = derive_chunk_id("src-2", "https://example.com/docs", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn document_id_stable_for_same_inputs() {
        let a = derive_document_id("src-1", "https://example.com/docs");
        let b = derive_document_id("src-1", "https://example.com/docs");
        assert_eq!(a, b);
    }

    #[test]
    fn quality_thresholds_have_sane_defaults() {
        let thresholds = QualityThresholds::default();
        assert!(thresholds.min_doc_score > 0.0);
        assert!(thresholds.min_llm_score > 0.0);
    }
}
