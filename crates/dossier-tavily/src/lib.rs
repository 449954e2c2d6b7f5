//! # Tavily Search Provider
//!
//! Tavily is a search API designed for AI agents, returning clean,
//! pre-processed content with optional raw page text. It is the primary
//! search provider for the investigation engine.
//!
//! Auth failures (401/403/422) surface as [`Error::SearchAuth`] so the
//! orchestrator degrades to an empty result set without retrying; transient
//! failures are retried here with short backoff.

use async_trait::async_trait;
use dossier::error::{Error, Result};
use dossier::tools::{NormalizedResult, SearchProvider, SearchResponse};
use dossier::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_URL: &str = "https://api.tavily.com/search";
const RAW_CONTENT_CAP: usize = 5000;
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Clone, Serialize)]
struct TavilyRequest {
    api_key: String,
    query: String,
    max_results: u32,
    include_raw_content: bool,
    search_depth: &'static str,
}

// Custom Debug implementation to prevent API key exposure in logs
impl std::fmt::Debug for TavilyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyRequest")
            .field("api_key", &"[REDACTED]")
            .field("query", &self.query)
            .field("max_results", &self.max_results)
            .field("include_raw_content", &self.include_raw_content)
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    /// Content snippet.
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    raw_content: Option<String>,
}

/// Tavily search tool.
pub struct TavilySearch {
    api_key: String,
    search_depth: &'static str,
    include_raw_content: bool,
    api_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TavilySearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilySearch")
            .field("api_key", &"[REDACTED]")
            .field("search_depth", &self.search_depth)
            .field("include_raw_content", &self.include_raw_content)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            search_depth: "advanced",
            include_raw_content: true,
            api_url: API_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
                .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// "basic" (faster) or "advanced" (more comprehensive).
    #[must_use]
    pub fn with_search_depth(mut self, depth: &'static str) -> Self {
        self.search_depth = depth;
        self
    }

    #[must_use]
    pub fn with_raw_content(mut self, include: bool) -> Self {
        self.include_raw_content = include;
        self
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn search_once(&self, query: &str, max_results: u32) -> Result<SearchResponse> {
        let request = TavilyRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            max_results,
            include_raw_content: self.include_raw_content,
            search_depth: self.search_depth,
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("Tavily request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 | 422 => {
                    Error::search_auth(format!("Tavily auth error ({status}): {body}"))
                }
                429 => Error::rate_limit(format!("Tavily rate limited: {body}")),
                s if s >= 500 => Error::network(format!("Tavily server error ({status}): {body}")),
                _ => Error::tool_error(format!("Tavily API error ({status}): {body}")),
            });
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| Error::tool_error(format!("Failed to parse Tavily response: {e}")))?;

        let results = parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| {
                let mut raw = r.raw_content.unwrap_or_default();
                let cap = raw
                    .char_indices()
                    .nth(RAW_CONTENT_CAP)
                    .map_or(raw.len(), |(i, _)| i);
                raw.truncate(cap);
                NormalizedResult {
                    title: r.title,
                    url: r.url,
                    snippet: r.content,
                    domain: String::new(),
                    score: r.score.unwrap_or(0.0),
                    raw_content: raw,
                }
                .with_domain()
            })
            .collect::<Vec<_>>();

        Ok(SearchResponse {
            query: query.to_string(),
            provider: "tavily".to_string(),
            total_results: results.len(),
            results,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse> {
        if self.api_key.is_empty() {
            tracing::warn!("tavily_no_api_key");
            return Ok(SearchResponse {
                query: query.to_string(),
                provider: "tavily".to_string(),
                ..Default::default()
            });
        }
        let mut attempt = 1;
        loop {
            match self.search_once(query, max_results).await {
                Ok(response) => {
                    tracing::info!(
                        query,
                        num_results = response.results.len(),
                        "tavily_search_complete"
                    );
                    return Ok(response);
                }
                Err(e @ Error::SearchAuth(_)) => return Err(e),
                Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                    let backoff = Duration::from_secs(1 << (attempt - 1)).min(Duration::from_secs(10));
                    tracing::warn!(query, attempt, error = %e, "tavily_retry");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "tavily"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_normalizes_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": "jensen huang",
                "results": [
                    {"title": "Profile", "url": "https://www.nvidia.com/about", "content": "snippet", "score": 0.92, "raw_content": "full body"},
                    {"title": "no url dropped", "url": "", "content": "x"}
                ]
            })))
            .mount(&server)
            .await;
        let tool = TavilySearch::new("tvly-key").with_api_url(format!("{}/search", server.uri()));
        let resp = tool.search("jensen huang", 5).await.unwrap();
        assert_eq!(resp.provider, "tavily");
        assert_eq!(resp.results.len(), 1);
        let r = &resp.results[0];
        assert_eq!(r.domain, "www.nvidia.com");
        assert_eq!(r.raw_content, "full body");
        assert!((r.score - 0.92).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_auth_error_is_search_auth_no_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;
        let tool = TavilySearch::new("bad").with_api_url(format!("{}/search", server.uri()));
        let err = tool.search("q", 5).await.unwrap_err();
        assert!(matches!(err, Error::SearchAuth(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        let tool = TavilySearch::new("key").with_api_url(format!("{}/search", server.uri()));
        let err = tool.search("q", 5).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_key_returns_empty() {
        let tool = TavilySearch::new("");
        let resp = tool.search("q", 5).await.unwrap();
        assert!(resp.results.is_empty());
    }
}
