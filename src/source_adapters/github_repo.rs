//! `GitHubRepo` adapter: reads files out of a GitHub repository via the
//! REST API rather than a local clone, so a deployment never needs a `git`
//! binary or clone cache on disk.
//!
//! One API call lists the whole tree (`git/trees/{branch}?recursive=1`);
//! the matched paths are then fetched one file at a time and turned into
//! `RawDocument`s. The cursor is just the remaining path queue, so a crash
//! mid-repo resumes without re-listing the tree or re-fetching files
//! already emitted.

use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::github_token;
use crate::models::{content_hash, RawDocument, Source};
use crate::source_adapters::{FetchBatch, SourceAdapter};

const GITHUB_API: &str = "https://api.github.com";

/// Files fetched per `fetch()` call before yielding a cursor back to the
/// Coordinator. Keeps a single call bounded even for very large repos.
const FILES_PER_BATCH: usize = 40;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CrawlState {
    /// Paths still to fetch, in tree order. Populated once on first call.
    pending: Vec<String>,
}

pub struct GitHubRepoAdapter {
    source: Source,
    http: reqwest::Client,
}

impl GitHubRepoAdapter {
    pub fn new(source: Source, http: reqwest::Client) -> Self {
        Self { source, http }
    }

    fn globset(patterns: &[String]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            } else {
                warn!(pattern, "invalid glob pattern, ignoring");
            }
        }
        builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
    }

    fn auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("User-Agent", "docs-retrieval-core");
        match github_token() {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

#[async_trait]
impl SourceAdapter for GitHubRepoAdapter {
    async fn fetch(&self, cursor: Option<String>) -> anyhow::Result<FetchBatch> {
        let Source::GitHubRepo {
            id,
            project_id,
            owner,
            repo,
            branch,
            include_globs,
            exclude_globs,
            ..
        } = &self.source
        else {
            anyhow::bail!("GitHubRepoAdapter given a non-github-repo source");
        };

        let mut state: CrawlState = match cursor {
            Some(c) => serde_json::from_str(&c)?,
            None => CrawlState {
                pending: list_matching_paths(
                    &self.http,
                    owner,
                    repo,
                    branch,
                    include_globs,
                    exclude_globs,
                    |req| self.auth_header(req),
                )
                .await?,
            },
        };

        let mut documents = Vec::new();
        let mut fetched = 0;
        while fetched < FILES_PER_BATCH {
            let Some(path) = state.pending.pop() else {
                break;
            };
            fetched += 1;

            match fetch_file(&self.http, owner, repo, branch, &path, |req| self.auth_header(req)).await
            {
                Ok(body) => {
                    let url = format!(
                        "https://github.com/{owner}/{repo}/blob/{branch}/{path}"
                    );
                    documents.push(RawDocument {
                        project_id: project_id.clone(),
                        source_id: id.clone(),
                        url,
                        fetched_at: Utc::now(),
                        content_hash: content_hash(&body),
                        body,
                        content_type: content_type_for_path(&path),
                    });
                }
                Err(err) => {
                    debug!(path, error = %err, "failed to fetch file, skipping");
                }
            }
        }

        let done = state.pending.is_empty();
        let next_cursor = if done {
            None
        } else {
            Some(serde_json::to_string(&state)?)
        };

        Ok(FetchBatch {
            documents,
            next_cursor,
            done,
        })
    }
}

/// List `git/trees/{branch}?recursive=1`, keeping only blob entries that
/// match `include_globs` and none of `exclude_globs`.
async fn list_matching_paths(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    branch: &str,
    include_globs: &[String],
    exclude_globs: &[String],
    auth: impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
) -> anyhow::Result<Vec<String>> {
    let include = if include_globs.is_empty() {
        GitHubRepoAdapter::globset(&["**/*.md".to_string(), "**/*.mdx".to_string()])
    } else {
        GitHubRepoAdapter::globset(include_globs)
    };
    let exclude = GitHubRepoAdapter::globset(exclude_globs);

    let url = format!("{GITHUB_API}/repos/{owner}/{repo}/git/trees/{branch}?recursive=1");
    let resp = request_with_rate_limit(http, &url, &auth).await?;
    let body: serde_json::Value = resp.json().await?;

    let entries = body
        .get("tree")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("malformed tree response for {owner}/{repo}"))?;

    let mut paths = Vec::new();
    for entry in entries {
        if entry.get("type").and_then(|t| t.as_str()) != Some("blob") {
            continue;
        }
        let Some(path) = entry.get("path").and_then(|p| p.as_str()) else {
            continue;
        };
        if include.is_match(path) && !exclude.is_match(path) {
            paths.push(path.to_string());
        }
    }
    // Reversed so `Vec::pop` yields tree order.
    paths.reverse();
    Ok(paths)
}

async fn fetch_file(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    branch: &str,
    path: &str,
    auth: impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
) -> anyhow::Result<String> {
    let url = format!("{GITHUB_API}/repos/{owner}/{repo}/contents/{path}?ref={branch}");
    let resp = request_with_rate_limit(http, &url, &auth).await?;
    let body: serde_json::Value = resp.json().await?;

    let encoding = body.get("encoding").and_then(|e| e.as_str());
    let content = body
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("contents response for {path} has no content field"))?;

    match encoding {
        Some("base64") => {
            use base64::Engine;
            let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Ok(content.to_string()),
    }
}

/// Issue a GET, sleeping and retrying once if the response indicates the
/// rate limit is exhausted (`403`/`429` with `X-RateLimit-Remaining: 0`).
async fn request_with_rate_limit(
    http: &reqwest::Client,
    url: &str,
    auth: &impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
) -> anyhow::Result<reqwest::Response> {
    loop {
        let resp = auth(http.get(url)).send().await?;
        let status = resp.status();
        let is_rate_limited = (status.as_u16() == 403 || status.as_u16() == 429)
            && resp
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "0")
                .unwrap_or(false);

        if is_rate_limited {
            let reset_at = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            if let Some(reset_at) = reset_at {
                let now = Utc::now().timestamp();
                let wait_secs = (reset_at - now).max(1) as u64;
                warn!(wait_secs, "GitHub rate limit exhausted, sleeping until reset");
                tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                continue;
            }
        }

        return Ok(resp.error_for_status()?);
    }
}

fn content_type_for_path(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "md" | "mdx" => "text/markdown".to_string(),
        "html" | "htm" => "text/html".to_string(),
        _ => "text/plain".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_inferred_from_extension() {
        assert_eq!(content_type_for_path("docs/readme.md"), "text/markdown");
        assert_eq!(content_type_for_path("src/index.html"), "text/html");
        assert_eq!(content_type_for_path("src/lib.rs"), "text/plain");
    }

    #[test]
    fn globset_matches_markdown_recursively() {
        let set = GitHubRepoAdapter::globset(&["**/*.md".to_string()]);
        assert!(set.is_match("docs/guide/intro.md"));
        assert!(!set.is_match("src/lib.rs"));
    }
}
