//! Source Adapters (C6): pull `RawDocument`s from a configured [`Source`]
//! with a resumable cursor.
//!
//! Each adapter hides a different transport (HTTP crawl, GitHub REST API,
//! local filesystem walk) behind one trait so the Coordinator and Indexer
//! never branch on source kind.

mod docs_site;
mod github_repo;
mod local_markdown;

use async_trait::async_trait;
use tracing::instrument;

use crate::models::{CrawlerPolicy, RawDocument, Source};

/// One page of fetched documents plus a cursor to resume from.
///
/// `done == true` means the adapter has no more work for this cursor chain;
/// the Coordinator should not call `fetch` again until the next scheduled
/// sync.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub documents: Vec<RawDocument>,
    pub next_cursor: Option<String>,
    pub done: bool,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the next batch starting from `cursor` (`None` means "from the
    /// start"). Implementations must be safe to call repeatedly with the
    /// cursor they themselves returned — that's what makes a crawl resumable
    /// after a crash or a `--resume` invocation.
    async fn fetch(&self, cursor: Option<String>) -> anyhow::Result<FetchBatch>;
}

/// Build the adapter matching a source's `kind` tag. `project_policy` is
/// the owning project's [`CrawlerPolicy`], applied to `DocsSite` sources
/// (which have no crawl policy of their own) and ignored otherwise.
#[instrument(skip(source, http, project_policy), fields(source_id = source.id()))]
pub fn build_adapter(
    source: &Source,
    http: reqwest::Client,
    project_policy: &CrawlerPolicy,
) -> Box<dyn SourceAdapter> {
    match source {
        Source::DocsSite { .. } => Box::new(docs_site::DocsSiteAdapter::with_policy(
            source.clone(),
            http,
            project_policy.clone(),
        )),
        Source::GitHubRepo { .. } => {
            Box::new(github_repo::GitHubRepoAdapter::new(source.clone(), http))
        }
        Source::LocalMarkdown { .. } => {
            Box::new(local_markdown::LocalMarkdownAdapter::new(source.clone()))
        }
    }
}
