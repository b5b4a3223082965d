use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SourceUnavailable;
use crate::model::RawArticle;

const MAX_FETCH_BACKOFF_SECS: u64 = 60;

/// Uniform contract every news source implements.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<RawArticle>, SourceUnavailable>;
}

/// RSS/Atom feed source.
pub struct FeedSource {
    name: String,
    url: String,
    max_articles: usize,
    max_retries: u32,
    client: Client,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Newsdigest/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            max_articles: 10,
            max_retries: 3,
            client,
        })
    }

    pub fn with_limits(mut self, max_articles: usize, max_retries: u32) -> Self {
        self.max_articles = max_articles;
        self.max_retries = max_retries.max(1);
        self
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawArticle>, SourceUnavailable> {
        let feed = fetch_and_parse_feed(&self.client, &self.url, self.max_retries)
            .await
            .map_err(|e| SourceUnavailable {
                name: self.name.clone(),
                reason: format!("{:#}", e),
            })?;

        let fetched_at = Utc::now();
        let articles: Vec<RawArticle> = feed
            .entries
            .iter()
            .take(self.max_articles)
            .map(|entry| entry_to_raw(&self.name, entry, fetched_at))
            .collect();

        info!(source = %self.name, entries = feed.entries.len(), taken = articles.len(), "feed fetched");
        Ok(articles)
    }
}

/// NewsAPI `/v2/everything` source, queried once per configured source id.
pub struct NewsApiSource {
    name: String,
    endpoint: String,
    api_key: String,
    source_ids: Vec<String>,
    days_back: i64,
    max_articles: usize,
    max_retries: u32,
    client: Client,
}

impl NewsApiSource {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        source_ids: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        if source_ids.is_empty() {
            anyhow::bail!("NewsAPI source needs at least one source id");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Newsdigest/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            source_ids,
            days_back: 2,
            max_articles: 10,
            max_retries: 3,
            client,
        })
    }

    pub fn with_limits(mut self, max_articles: usize, max_retries: u32, days_back: i64) -> Self {
        self.max_articles = max_articles;
        self.max_retries = max_retries.max(1);
        self.days_back = days_back.max(0);
        self
    }

    async fn fetch_source_id(&self, source_id: &str, from: &str) -> Result<Vec<NewsApiArticle>> {
        let page_size = self.max_articles.to_string();
        let response = get_with_retry(&self.endpoint, self.max_retries, || {
            self.client
                .get(&self.endpoint)
                .header("X-Api-Key", &self.api_key)
                .query(&[
                    ("sources", source_id),
                    ("from", from),
                    ("sortBy", "publishedAt"),
                    ("pageSize", page_size.as_str()),
                ])
        })
        .await?;

        let body: NewsApiResponse = response.json().await.context("failed to parse NewsAPI response")?;
        if body.status != "ok" {
            anyhow::bail!("NewsAPI returned status '{}': {}", body.status, body.message.unwrap_or_default());
        }
        Ok(body.articles.into_iter().take(self.max_articles).collect())
    }
}

#[async_trait::async_trait]
impl SourceAdapter for NewsApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    /// A failing source id only loses its own articles; the source is
    /// unavailable when every id fails.
    async fn fetch(&self) -> Result<Vec<RawArticle>, SourceUnavailable> {
        let from = (Utc::now() - chrono::Duration::days(self.days_back))
            .format("%Y-%m-%d")
            .to_string();
        let fetched_at = Utc::now();
        let mut articles = Vec::new();
        let mut errors = Vec::new();

        for source_id in &self.source_ids {
            match self.fetch_source_id(source_id, &from).await {
                Ok(items) => {
                    info!(source = %self.name, source_id = %source_id, count = items.len(), "NewsAPI source fetched");
                    articles.extend(items.into_iter().map(|item| newsapi_to_raw(&self.name, item, fetched_at)));
                }
                Err(e) => {
                    warn!(source = %self.name, source_id = %source_id, error = %format!("{:#}", e), "NewsAPI source id failed");
                    errors.push(format!("{}: {:#}", source_id, e));
                }
            }
        }

        if errors.len() == self.source_ids.len() {
            return Err(SourceUnavailable {
                name: self.name.clone(),
                reason: errors.join("; "),
            });
        }
        Ok(articles)
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    #[serde(default)]
    source: Option<NewsApiSourceRef>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSourceRef {
    #[serde(default)]
    name: Option<String>,
}

fn newsapi_to_raw(fallback_source: &str, item: NewsApiArticle, fetched_at: DateTime<Utc>) -> RawArticle {
    let source = item
        .source
        .and_then(|s| s.name)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback_source.to_string());
    let published_at = item
        .published_at
        .as_deref()
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|d| d.with_timezone(&Utc));

    RawArticle {
        source,
        title: item.title.unwrap_or_default(),
        body: item.description.or(item.content).unwrap_or_default(),
        url: item.url,
        published_at,
        fetched_at,
    }
}

/// Extract the fields the normalizer needs from a feed entry.
fn entry_to_raw(source: &str, entry: &Entry, fetched_at: DateTime<Utc>) -> RawArticle {
    let title = entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_default();
    // Use the first link as the URL
    let url = entry.links.first().map(|l| l.href.clone());
    if url.is_none() {
        debug!("Entry without URL: {:?}", title);
    }

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();

    RawArticle {
        source: source.to_string(),
        title,
        body,
        url,
        published_at: entry.published.or(entry.updated),
        fetched_at,
    }
}

/// Fetches a feed from the given URL and parses it.
pub async fn fetch_and_parse_feed(client: &Client, url: &str, max_retries: u32) -> Result<Feed> {
    let response = get_with_retry(url, max_retries, || client.get(url)).await?;
    let bytes = response.bytes().await.context("failed to read response body")?;
    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
    Ok(feed)
}

/// Sends the request built by `build` until it succeeds.
/// Server errors, rate limiting and network errors are retried with backoff;
/// other client errors are not.
async fn get_with_retry<F>(url: &str, max_retries: u32, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 1..=max_retries.max(1) {
        if attempt > 1 {
            let backoff = fetch_backoff(attempt);
            info!("Retrying fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_retries, backoff);
            tokio::time::sleep(backoff).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// 1s, 2s, 4s... before the given attempt, capped at a minute.
fn fetch_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(2)).min(MAX_FETCH_BACKOFF_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_backoff_doubles_and_caps() {
        assert_eq!(fetch_backoff(2), Duration::from_secs(1));
        assert_eq!(fetch_backoff(3), Duration::from_secs(2));
        assert_eq!(fetch_backoff(5), Duration::from_secs(8));
        assert_eq!(fetch_backoff(8), Duration::from_secs(60));
        assert_eq!(fetch_backoff(66), Duration::from_secs(60));
        assert_eq!(fetch_backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn newsapi_article_prefers_description_and_parses_date() {
        let item: NewsApiArticle = serde_json::from_str(
            r#"{
                "source": {"id": "wired", "name": "Wired"},
                "title": "Chips act",
                "description": "<p>Funding lands</p>",
                "url": "https://www.wired.com/story/chips",
                "publishedAt": "2024-05-01T10:30:00Z",
                "content": "Funding lands… [+2300 chars]"
            }"#,
        )
        .unwrap();
        let raw = newsapi_to_raw("NewsAPI", item, Utc::now());
        assert_eq!(raw.source, "Wired");
        assert_eq!(raw.body, "<p>Funding lands</p>");
        assert_eq!(raw.published_at.map(|d| d.to_rfc3339()).as_deref(), Some("2024-05-01T10:30:00+00:00"));
    }

    #[test]
    fn newsapi_article_tolerates_missing_fields() {
        let item: NewsApiArticle =
            serde_json::from_str(r#"{"source": {"id": null, "name": null}, "title": "T", "publishedAt": "yesterday"}"#)
                .unwrap();
        let raw = newsapi_to_raw("NewsAPI", item, Utc::now());
        assert_eq!(raw.source, "NewsAPI");
        assert_eq!(raw.url, None);
        assert_eq!(raw.body, "");
        assert_eq!(raw.published_at, None);
    }
}
