//! `DocsSite` adapter: a polite, breadth-first crawler over an HTTP
//! documentation site.
//!
//! The crawl state (visited set + frontier queue) is serialized into the
//! cursor so a crash or an explicit `--resume` picks back up without
//! re-fetching pages already seen. A single [`SourceAdapter::fetch`] call
//! walks until the frontier drains or `maxPages` is hit, using a bounded
//! semaphore for per-source concurrency and a delay between requests, per
//! [`CrawlerPolicy`](crate::models::CrawlerPolicy)-style source config.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::models::{content_hash, CrawlerPolicy, RawDocument, Source};
use crate::source_adapters::{FetchBatch, SourceAdapter};

/// Attempts for a single page before a transient failure is given up on.
const MAX_FETCH_ATTEMPTS: u32 = 4;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CrawlState {
    visited: HashSet<String>,
    frontier: VecDeque<String>,
}

pub struct DocsSiteAdapter {
    source: Source,
    http: reqwest::Client,
    policy: CrawlerPolicy,
}

impl DocsSiteAdapter {
    pub fn new(source: Source, http: reqwest::Client) -> Self {
        Self::with_policy(source, http, CrawlerPolicy::default())
    }

    /// `policy` should be the owning [`crate::models::Project`]'s
    /// `crawler_policy` — `DocsSite` sources don't carry their own, they
    /// inherit the project's crawl defaults.
    pub fn with_policy(source: Source, http: reqwest::Client, policy: CrawlerPolicy) -> Self {
        Self { source, http, policy }
    }

    /// §4.1: exclude patterns are substring/prefix matches against the
    /// request path only (not the full URL, not a glob) — a pattern like
    /// `/changelog` or `blog` excludes any URL whose path contains it,
    /// regardless of scheme or host. Substring containment subsumes prefix
    /// matching (a prefix is just a substring anchored at index 0).
    fn path_excluded(patterns: &[String], path: &str) -> bool {
        patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

#[async_trait]
impl SourceAdapter for DocsSiteAdapter {
    async fn fetch(&self, cursor: Option<String>) -> anyhow::Result<FetchBatch> {
        let Source::DocsSite {
            id,
            project_id,
            base_url,
            exclude_patterns,
            use_browser,
            ..
        } = &self.source
        else {
            anyhow::bail!("DocsSiteAdapter given a non-docs-site source");
        };

        let policy = &self.policy;
        let base = reqwest::Url::parse(base_url)?;

        let mut state: CrawlState = match cursor {
            Some(c) => serde_json::from_str(&c).unwrap_or_default(),
            None => CrawlState {
                visited: HashSet::new(),
                frontier: VecDeque::from([base_url.clone()]),
            },
        };

        let semaphore = Arc::new(Semaphore::new(policy.concurrency.max(1)));
        let mut documents = Vec::new();
        let link_sel = Selector::parse("a[href]").unwrap();

        while !state.frontier.is_empty() && state.visited.len() < policy.max_pages {
            let mut batch = Vec::new();
            while batch.len() < policy.concurrency.max(1) {
                match state.frontier.pop_front() {
                    Some(url) if !state.visited.contains(&url) => batch.push(url),
                    Some(_) => continue,
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::new();
            for url in batch {
                let excluded = reqwest::Url::parse(&url)
                    .map(|u| Self::path_excluded(exclude_patterns, u.path()))
                    .unwrap_or(false);
                if excluded {
                    state.visited.insert(url);
                    continue;
                }
                let permit = semaphore.clone().acquire_owned().await?;
                let http = self.http.clone();
                let delay = Duration::from_millis(policy.delay_ms);
                let use_browser = *use_browser;
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    tokio::time::sleep(delay).await;
                    let result = fetch_page(&http, &url, use_browser).await;
                    (url, result)
                }));
            }

            for handle in handles {
                let (url, result) = handle.await?;
                state.visited.insert(url.clone());
                match result {
                    Ok(Some((body, content_type))) => {
                        let links = extract_links(&body, &base, &link_sel);
                        for link in links {
                            if !state.visited.contains(&link) {
                                state.frontier.push_back(link);
                            }
                        }
                        documents.push(RawDocument {
                            project_id: project_id.clone(),
                            source_id: id.clone(),
                            url,
                            fetched_at: Utc::now(),
                            content_hash: content_hash(&body),
                            body,
                            content_type,
                        });
                    }
                    Ok(None) => {
                        debug!(url, "response was not text/html, no document emitted");
                    }
                    Err(err) => {
                        debug!(url, error = %err, "permanent fetch failure, skipping");
                    }
                }
            }
        }

        let done = state.frontier.is_empty() || state.visited.len() >= policy.max_pages;
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

/// `Ok(None)` means the page was fetched but its `Content-Type` wasn't
/// `text/html`, so no document is emitted for it. 4xx responses surface as
/// a permanent `Err`; 5xx/429 and network errors retry with exponential
/// backoff before surfacing as permanent.
async fn fetch_page(
    http: &reqwest::Client,
    url: &str,
    use_browser: bool,
) -> anyhow::Result<Option<(String, String)>> {
    if use_browser {
        return render_with_browser(url).map(|body| Some((body, "text/html".to_string())));
    }

    let mut last_err = None;
    for attempt in 0..MAX_FETCH_ATTEMPTS {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(4));
            tokio::time::sleep(delay).await;
        }

        let resp = match http.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                last_err = Some(anyhow::anyhow!(err));
                continue;
            }
        };

        let status = resp.status();
        if status.is_client_error() {
            anyhow::bail!("permanent failure fetching {url}: {status}");
        }
        if status.is_server_error() || status.as_u16() == 429 {
            last_err = Some(anyhow::anyhow!("transient failure fetching {url}: {status}"));
            continue;
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !content_type.contains("html") {
            return Ok(None);
        }

        let body = resp.error_for_status()?.text().await?;
        return Ok(Some((body, "text/html".to_string())));
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("failed to fetch {url} after retries")))
}

#[cfg(feature = "browser-render")]
fn render_with_browser(url: &str) -> anyhow::Result<String> {
    use headless_chrome::Browser;

    let browser = Browser::default()?;
    let tab = browser.new_tab()?;
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    let html = tab.get_content()?;
    Ok(html)
}

#[cfg(not(feature = "browser-render"))]
fn render_with_browser(_url: &str) -> anyhow::Result<String> {
    anyhow::bail!(
        "source has useBrowser = true but this build lacks the browser-render feature"
    )
}

fn extract_links(body: &str, base: &reqwest::Url, link_sel: &Selector) -> Vec<String> {
    let document = Html::parse_document(body);
    let mut links = Vec::new();
    for el in document.select(link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.host_str() != base.host_str() {
            continue;
        }
        let mut resolved = resolved;
        resolved.set_fragment(None);
        links.push(resolved.to_string());
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityThresholds;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn docs_site(base_url: String) -> Source {
        Source::DocsSite {
            id: "site".to_string(),
            project_id: "proj".to_string(),
            base_url,
            exclude_patterns: vec![],
            use_browser: false,
            quality: QualityThresholds::default(),
        }
    }

    fn fast_policy() -> CrawlerPolicy {
        CrawlerPolicy {
            max_pages: 10,
            concurrency: 2,
            delay_ms: 0,
            use_browser: false,
        }
    }

    #[tokio::test]
    async fn crawl_follows_same_host_links_and_stops_at_frontier_drain() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><body><a href="{}/page2">next</a></body></html>"#,
                        server.uri()
                    )),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>leaf page, no links</body></html>"),
            )
            .mount(&server)
            .await;

        let adapter = DocsSiteAdapter::with_policy(
            docs_site(format!("{}/", server.uri())),
            reqwest::Client::new(),
            fast_policy(),
        );

        let batch = adapter.fetch(None).await.unwrap();
        assert!(batch.done);
        assert_eq!(batch.documents.len(), 2);
        assert!(batch.documents.iter().any(|d| d.url.ends_with("/page2")));
    }

    #[tokio::test]
    async fn non_html_response_is_skipped_without_aborting_crawl() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"not":"html"}"#),
            )
            .mount(&server)
            .await;

        let adapter = DocsSiteAdapter::with_policy(
            docs_site(format!("{}/", server.uri())),
            reqwest::Client::new(),
            fast_policy(),
        );

        let batch = adapter.fetch(None).await.unwrap();
        assert!(batch.done);
        assert!(batch.documents.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_on_one_page_does_not_abort_the_crawl() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><body><a href="{}/missing">broken</a></body></html>"#,
                        server.uri()
                    )),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = DocsSiteAdapter::with_policy(
            docs_site(format!("{}/", server.uri())),
            reqwest::Client::new(),
            fast_policy(),
        );

        let batch = adapter.fetch(None).await.unwrap();
        assert!(batch.done);
        assert_eq!(batch.documents.len(), 1);
    }

    #[test]
    fn path_excluded_matches_substring_and_prefix_on_the_path_only() {
        let patterns = vec!["/changelog".to_string()];
        assert!(DocsSiteAdapter::path_excluded(&patterns, "/changelog"));
        assert!(DocsSiteAdapter::path_excluded(&patterns, "/changelog/v2"));
        assert!(!DocsSiteAdapter::path_excluded(&patterns, "/docs/guide"));

        // A pattern with no leading slash still matches anywhere in the path
        // (plain substring), not as a glob requiring `**/blog/**`.
        let mid_path = vec!["blog".to_string()];
        assert!(DocsSiteAdapter::path_excluded(&mid_path, "/2024/blog/post"));
    }

    #[tokio::test]
    async fn crawl_skips_links_whose_path_matches_an_exclude_pattern() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><body><a href="{base}/changelog/v1">changelog</a><a href="{base}/page2">next</a></body></html>"#,
                        base = server.uri()
                    )),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>leaf page, no links</body></html>"),
            )
            .mount(&server)
            .await;

        // No mock registered for /changelog/v1 — if the crawler fetched it
        // despite the exclude pattern, wiremock would 404 and the test would
        // still need to assert it was never attempted, so instead assert on
        // the resulting document set directly.
        let mut source = docs_site(format!("{}/", server.uri()));
        if let Source::DocsSite { exclude_patterns, .. } = &mut source {
            *exclude_patterns = vec!["/changelog".to_string()];
        }

        let adapter = DocsSiteAdapter::with_policy(source, reqwest::Client::new(), fast_policy());

        let batch = adapter.fetch(None).await.unwrap();
        assert!(batch.done);
        assert_eq!(batch.documents.len(), 2);
        assert!(!batch.documents.iter().any(|d| d.url.contains("/changelog")));
        assert!(batch.documents.iter().any(|d| d.url.ends_with("/page2")));
    }
}
