use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use roundtable_models::NewsConfig;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::AgentError;

/// Markdown digest handed to agents before the first round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsDigest {
    pub markdown: String,
    pub urls: Vec<String>,
}

impl NewsDigest {
    pub fn is_empty(&self) -> bool {
        self.markdown.trim().is_empty()
    }
}

/// Supplies the news digest for a session topic. Mockable for testing.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn digest(&self, topic: &str) -> Result<NewsDigest, AgentError>;
}

/// Fixed digest, for tests and pre-collected news.
pub struct StaticNewsSource {
    digest: NewsDigest,
}

impl StaticNewsSource {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            digest: NewsDigest {
                markdown: markdown.into(),
                urls: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl NewsSource for StaticNewsSource {
    async fn digest(&self, _topic: &str) -> Result<NewsDigest, AgentError> {
        Ok(self.digest.clone())
    }
}

/// Search (`GET {base}/search?q=`) then fetch the hits concurrently.
pub struct HttpNewsSource {
    client: Client,
    config: NewsConfig,
}

impl HttpNewsSource {
    pub fn new(config: NewsConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .user_agent("roundtable-news/0.1")
            .build()
            .map_err(|e| AgentError::News(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn search(&self, topic: &str) -> Result<Vec<String>, AgentError> {
        let url = format!("{}/search", self.config.search_base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("q", topic)])
            .timeout(Duration::from_millis(self.config.search_timeout_ms))
            .send()
            .await
            .map_err(|e| AgentError::News(format!("search failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::News(format!(
                "search returned HTTP {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::News(format!("search response: {e}")))?;
        Ok(parse_search_urls(&body, self.config.max_results))
    }

    async fn fetch(&self, url: &str) -> Result<String, AgentError> {
        let fetch = async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| AgentError::News(format!("{url}: {e}")))?;
            if !resp.status().is_success() {
                return Err(AgentError::News(format!("{url}: HTTP {}", resp.status())));
            }
            resp.text()
                .await
                .map_err(|e| AgentError::News(format!("{url}: {e}")))
        };
        let body = tokio::time::timeout(Duration::from_millis(self.config.per_url_timeout_ms), fetch)
            .await
            .map_err(|_| AgentError::News(format!("{url}: timed out")))??;
        Ok(readable_text(&body))
    }
}

#[async_trait]
impl NewsSource for HttpNewsSource {
    async fn digest(&self, topic: &str) -> Result<NewsDigest, AgentError> {
        let urls = self.search(topic).await?;
        debug!(topic, hits = urls.len(), "News search complete");

        let semaphore = Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1)));
        let fetches = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match self.fetch(url).await {
                    Ok(text) => Some((url.clone(), text)),
                    Err(e) => {
                        warn!(url = %url, error = %e, "News fetch failed");
                        None
                    }
                }
            }
        });
        let pages: Vec<(String, String)> = join_all(fetches).await.into_iter().flatten().collect();

        let digest = build_digest(
            &pages,
            self.config.per_url_max_chars,
            self.config.total_max_chars,
        );
        info!(topic, pages = digest.urls.len(), chars = digest.markdown.len(), "News digest built");
        Ok(digest)
    }
}

/// Accepts `{"results": [...]}`, `{"urls": [...]}` or a bare array, with entries that
/// are either URL strings or objects carrying `url`/`link`.
fn parse_search_urls(body: &Value, max_results: usize) -> Vec<String> {
    let items = body
        .get("results")
        .or_else(|| body.get("urls"))
        .unwrap_or(body)
        .as_array()
        .cloned()
        .unwrap_or_default();

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.clone()),
            Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("link"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .take(max_results)
        .collect()
}

fn readable_text(body: &str) -> String {
    let head: String = body.chars().take(512).collect::<String>().to_lowercase();
    if head.contains("<html") || head.contains("<!doctype") || head.contains("<body") {
        htmd::convert(body).unwrap_or_else(|_| body.to_string())
    } else {
        body.to_string()
    }
}

/// Assemble fetched pages under the per-URL and total character caps.
pub fn build_digest(pages: &[(String, String)], per_url_max: usize, total_max: usize) -> NewsDigest {
    let mut markdown = String::new();
    let mut urls = Vec::new();
    let mut used = 0usize;

    for (url, text) in pages {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let heading = format!("### {url}\n");
        let room = total_max.saturating_sub(used + heading.chars().count() + 2);
        if room == 0 {
            break;
        }
        let body: String = text.chars().take(per_url_max.min(room)).collect();
        let section = format!("{heading}{body}\n\n");
        used += section.chars().count();
        markdown.push_str(&section);
        urls.push(url.clone());
    }

    NewsDigest {
        markdown: markdown.trim_end().to_string(),
        urls,
    }
}
