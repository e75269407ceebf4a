//! Quality Gate (C7): decides whether a candidate GitHub source is worth
//! indexing before the Coordinator ever hands it to the Indexer.
//!
//! Two independent scores feed the decision: a [`documentation_score`]
//! computed locally from repo structure (README presence/length, `docs/`
//! and `examples/` directories), and an opaque `llmRelevanceScore` behind
//! the [`RelevanceScorer`] trait — the core consumes this signal but does
//! not define the model that produces it, mirroring the teacher's
//! `EmbeddingProvider` trait-plus-implementations split in
//! [`crate::embedding`].

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::github_token;
use crate::models::{RepoType, Source, TrustLevel};

/// An external relevance signal for `(projectId, owner/repo)`, keyed by
/// an LLM evaluator this core does not implement.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, project_id: &str, owner: &str, repo: &str) -> anyhow::Result<f64>;
}

/// Default implementation: a constant score. Used in tests and for
/// `official` trust-level sources, which skip external evaluation.
pub struct StaticRelevanceScorer {
    pub score: f64,
}

impl Default for StaticRelevanceScorer {
    fn default() -> Self {
        Self { score: 1.0 }
    }
}

#[async_trait]
impl RelevanceScorer for StaticRelevanceScorer {
    async fn score(&self, _project_id: &str, _owner: &str, _repo: &str) -> anyhow::Result<f64> {
        Ok(self.score)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QualityDecision {
    Accepted,
    Rejected { reason: String },
}

pub struct QualityGate<'a> {
    http: reqwest::Client,
    scorer: &'a dyn RelevanceScorer,
}

impl<'a> QualityGate<'a> {
    pub fn new(http: reqwest::Client, scorer: &'a dyn RelevanceScorer) -> Self {
        Self { http, scorer }
    }

    /// Evaluate a `GitHubRepo` source. Non-GitHub sources are always
    /// accepted — the gate only applies to GitHub per §4.2. Thresholds
    /// come from `source.quality()`, which the Project Registry (C10)
    /// resolves from the `ctx.toml` trust-level table at load time.
    pub async fn evaluate(&self, source: &Source, project_id: &str) -> anyhow::Result<QualityDecision> {
        let Source::GitHubRepo {
            owner,
            repo,
            branch,
            repo_type,
            trust_level,
            quality,
            ..
        } = source
        else {
            return Ok(QualityDecision::Accepted);
        };

        let min_doc_score = quality.min_doc_score;
        let min_llm_score = quality.min_llm_score;
        let require_readme = quality.require_readme;

        let readme = fetch_readme(&self.http, owner, repo, branch).await.ok().flatten();
        let has_readme = readme.is_some();

        let doc_score = documentation_score(
            &self.http,
            owner,
            repo,
            branch,
            readme.as_deref(),
            *repo_type,
        )
        .await;

        let llm_score = if *trust_level == TrustLevel::Official {
            1.0
        } else {
            self.scorer.score(project_id, owner, repo).await.unwrap_or(0.0)
        };

        let accepted = doc_score >= min_doc_score
            && llm_score >= min_llm_score
            && (has_readme || !require_readme);

        if accepted {
            info!(owner, repo, doc_score, llm_score, "source accepted by quality gate");
            Ok(QualityDecision::Accepted)
        } else {
            let reason = format!(
                "doc_score={doc_score:.2} (min {min_doc_score:.2}), llm_score={llm_score:.2} (min {min_llm_score:.2}), readme={has_readme} (required {require_readme})"
            );
            warn!(owner, repo, %reason, "source rejected by quality gate");
            Ok(QualityDecision::Rejected { reason })
        }
    }
}

/// Heuristic documentation score in `[0.0, 1.0]`: README length, presence
/// of `docs/`/`examples/` directories, and a repo-type baseline (SDKs and
/// tutorial repos are assumed to document more thoroughly than bare
/// ecosystem libraries).
async fn documentation_score(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    branch: &str,
    readme: Option<&str>,
    repo_type: RepoType,
) -> f64 {
    let mut score = 0.0;

    if let Some(readme) = readme {
        score += (readme.len() as f64 / 4000.0).min(0.4);
    }

    if let Ok(paths) = list_top_level_dirs(http, owner, repo, branch).await {
        if paths.iter().any(|p| p.starts_with("docs/")) {
            score += 0.25;
        }
        if paths.iter().any(|p| p.starts_with("examples/")) {
            score += 0.2;
        }
    }

    score += match repo_type {
        RepoType::Sdk => 0.15,
        RepoType::TutorialRepo => 0.15,
        RepoType::ExampleRepo => 0.1,
        RepoType::EcosystemLib => 0.0,
    };

    score.min(1.0)
}

async fn fetch_readme(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    branch: &str,
) -> anyhow::Result<Option<String>> {
    let url = format!("https://api.github.com/repos/{owner}/{repo}/readme?ref={branch}");
    let mut req = http.get(&url).header("User-Agent", "docs-retrieval-core");
    if let Some(token) = github_token() {
        req = req.header("Authorization", format!("Bearer {token}"));
    }
    let resp = req.send().await?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let body: serde_json::Value = resp.error_for_status()?.json().await?;
    let Some(content) = body.get("content").and_then(|c| c.as_str()) else {
        return Ok(None);
    };
    use base64::Engine;
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

async fn list_top_level_dirs(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    branch: &str,
) -> anyhow::Result<Vec<String>> {
    let url = format!("https://api.github.com/repos/{owner}/{repo}/git/trees/{branch}");
    let mut req = http.get(&url).header("User-Agent", "docs-retrieval-core");
    if let Some(token) = github_token() {
        req = req.header("Authorization", format!("Bearer {token}"));
    }
    let resp = req.send().await?.error_for_status()?;
    let body: serde_json::Value = resp.json().await?;
    let entries = body
        .get("tree")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(entries
        .into_iter()
        .filter_map(|e| {
            if e.get("type").and_then(|t| t.as_str()) == Some("tree") {
                e.get("path").and_then(|p| p.as_str()).map(|s| format!("{s}/"))
            } else {
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_scorer_returns_configured_constant() {
        let scorer = StaticRelevanceScorer { score: 0.75 };
        let score = scorer.score("proj", "owner", "repo").await.unwrap();
        assert_eq!(score, 0.75);
    }

    #[tokio::test]
    async fn non_github_sources_are_always_accepted() {
        let source = Source::LocalMarkdown {
            id: "local".into(),
            project_id: "proj".into(),
            root: "/tmp/docs".into(),
            url_prefix: "proj".into(),
            quality: Default::default(),
        };
        let scorer = StaticRelevanceScorer::default();
        let gate = QualityGate::new(reqwest::Client::new(), &scorer);
        let decision = gate.evaluate(&source, "proj").await.unwrap();
        assert_eq!(decision, QualityDecision::Accepted);
    }
}
