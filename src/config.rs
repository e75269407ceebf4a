//! Configuration parsing and validation.
//!
//! The service is configured via a TOML file (default: `config/ctx.toml`)
//! holding ambient settings not scoped to any single project: database
//! path, server bind address, embedding provider credentials/timeouts,
//! chunking target size, crawler defaults, and the quality-gate threshold
//! table by trust level. Per-project and per-source configuration lives
//! in a separate on-disk layout loaded by [`crate::registry`], rooted at
//! `registry.config_root` (see `CTX_CONFIG_ROOT` below).
//!
//! # Environment overrides
//!
//! A handful of settings come from the environment rather than the TOML
//! file, so secrets never need to land on disk next to the rest of the
//! config:
//! - `OPENAI_API_KEY` — read directly by the embedding provider, never by
//!   this module.
//! - `CTX_CONFIG_ROOT` — overrides `registry.config_root`.
//! - `GITHUB_TOKEN` — read directly by the GitHub source adapter.
//! - `CTX_DB_PATH` — overrides `db.path`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::TrustLevel;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Project/source on-disk registry layout root: `<config_root>/projects/*.json`,
/// `<config_root>/sources/*.json`, `<config_root>/mapping.json`.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub config_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    crate::chunk::DEFAULT_MAX_CHARS
}
fn default_overlap_chars() -> usize {
    crate::chunk::DEFAULT_OVERLAP_CHARS
}

/// Hybrid Searcher (C9) tuning. `k` is the final result count; `k_dense`
/// and `k_lexical` size the candidate pools fed into Reciprocal Rank
/// Fusion before the K=60 fusion and truncation to `k`.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_k")]
    pub k: usize,
    #[serde(default = "default_candidate_k")]
    pub k_dense: usize,
    #[serde(default = "default_candidate_k")]
    pub k_lexical: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_final_k(),
            k_dense: default_candidate_k(),
            k_lexical: default_candidate_k(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_final_k() -> usize {
    10
}
fn default_candidate_k() -> usize {
    50
}
fn default_rrf_k() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for providers that talk to a local daemon (Ollama). Unused
    /// by OpenAI, which always targets `https://api.openai.com`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Defaults applied to a source's [`crate::models::CrawlerPolicy`] when a
/// project/source config doesn't override them.
#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            delay_ms: default_delay_ms(),
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

/// Quality Gate (C7) thresholds by trust level (Open Question (b)): the
/// concrete numbers are configuration, not core behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_official_thresholds")]
    pub official: TrustThresholds,
    #[serde(default = "default_verified_thresholds")]
    pub verified_community: TrustThresholds,
    #[serde(default = "default_community_thresholds")]
    pub community: TrustThresholds,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            official: default_official_thresholds(),
            verified_community: default_verified_thresholds(),
            community: default_community_thresholds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrustThresholds {
    pub min_doc_score: f64,
    pub min_llm_score: f64,
    #[serde(default)]
    pub require_readme: bool,
}

fn default_official_thresholds() -> TrustThresholds {
    TrustThresholds {
        min_doc_score: 0.2,
        min_llm_score: 0.3,
        require_readme: false,
    }
}
fn default_verified_thresholds() -> TrustThresholds {
    TrustThresholds {
        min_doc_score: 0.4,
        min_llm_score: 0.5,
        require_readme: true,
    }
}
fn default_community_thresholds() -> TrustThresholds {
    TrustThresholds {
        min_doc_score: 0.6,
        min_llm_score: 0.65,
        require_readme: true,
    }
}

impl QualityConfig {
    pub fn for_trust_level(&self, level: TrustLevel) -> &TrustThresholds {
        match level {
            TrustLevel::Official => &self.official,
            TrustLevel::VerifiedCommunity => &self.verified_community,
            TrustLevel::Community => &self.community,
        }
    }
}

/// Load, parse and validate `path`, applying environment overrides for
/// `CTX_CONFIG_ROOT` and `CTX_DB_PATH`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(root) = std::env::var("CTX_CONFIG_ROOT") {
        config.registry.config_root = PathBuf::from(root);
    }
    if let Ok(db_path) = std::env::var("CTX_DB_PATH") {
        config.db.path = PathBuf::from(db_path);
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}

/// `GITHUB_TOKEN`, read directly where the GitHub adapter needs it rather
/// than threaded through `Config` — optional; absence just means a lower
/// anonymous rate limit.
pub fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_disabled_by_default() {
        let config = EmbeddingConfig::default();
        assert!(!config.is_enabled());
    }

    #[test]
    fn quality_defaults_loosen_for_official() {
        let quality = QualityConfig::default();
        let official = quality.for_trust_level(TrustLevel::Official);
        let community = quality.for_trust_level(TrustLevel::Community);
        assert!(official.min_doc_score < community.min_doc_score);
        assert!(official.min_llm_score < community.min_llm_score);
    }
}
