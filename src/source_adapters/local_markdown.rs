//! `LocalMarkdown` adapter: walks a directory tree for `.md`/`.mdx` files.
//!
//! No network calls, so there is no rate limiting or retry logic here — the
//! whole tree is small enough to walk in one `fetch` call. The cursor is
//! unused; a single batch with `done: true` is always returned.

use async_trait::async_trait;
use chrono::Utc;
use walkdir::WalkDir;

use crate::models::{content_hash, RawDocument, Source};
use crate::source_adapters::{FetchBatch, SourceAdapter};

pub struct LocalMarkdownAdapter {
    source: Source,
}

impl LocalMarkdownAdapter {
    pub fn new(source: Source) -> Self {
        Self { source }
    }
}

#[async_trait]
impl SourceAdapter for LocalMarkdownAdapter {
    async fn fetch(&self, _cursor: Option<String>) -> anyhow::Result<FetchBatch> {
        let Source::LocalMarkdown {
            id,
            project_id,
            root,
            url_prefix,
            ..
        } = &self.source
        else {
            anyhow::bail!("LocalMarkdownAdapter given a non-local-markdown source");
        };

        let root = root.clone();
        let id = id.clone();
        let project_id = project_id.clone();
        let url_prefix = url_prefix.clone();

        let documents = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<RawDocument>> {
            let mut documents = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let is_markdown = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("mdx"))
                    .unwrap_or(false);
                if !is_markdown {
                    continue;
                }

                let relative = path.strip_prefix(&root).unwrap_or(path);
                let url = format!(
                    "generated-docs://{}/{}",
                    url_prefix.trim_matches('/'),
                    relative.to_string_lossy().replace('\\', "/")
                );

                let body = std::fs::read_to_string(path)?;
                documents.push(RawDocument {
                    project_id: project_id.clone(),
                    source_id: id.clone(),
                    url,
                    fetched_at: Utc::now(),
                    content_hash: content_hash(&body),
                    body,
                    content_type: "text/markdown".to_string(),
                });
            }
            Ok(documents)
        })
        .await??;

        Ok(FetchBatch {
            documents,
            next_cursor: None,
            done: true,
        })
    }
}
