//! # Brave Search Provider
//!
//! Brave Search runs on an independent web index, which makes it the
//! fallback and triangulation complement to Tavily: a different index
//! surfaces different documents for the same query.

use async_trait::async_trait;
use dossier::error::{Error, Result};
use dossier::tools::{NormalizedResult, SearchProvider, SearchResponse};
use dossier::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde::Deserialize;
use std::time::Duration;

const API_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Clone, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Brave search tool.
pub struct BraveSearch {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for BraveSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BraveSearch")
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: API_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
                .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn search_once(&self, query: &str, max_results: u32) -> Result<SearchResponse> {
        let response = self
            .client
            .get(&self.api_url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| Error::network(format!("Brave request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 | 422 => Error::search_auth(format!("Brave auth error ({status}): {body}")),
                429 => Error::rate_limit(format!("Brave rate limited: {body}")),
                s if s >= 500 => Error::network(format!("Brave server error ({status}): {body}")),
                _ => Error::tool_error(format!("Brave API error ({status}): {body}")),
            });
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| Error::tool_error(format!("Failed to parse Brave response: {e}")))?;

        let results = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| {
                NormalizedResult {
                    title: r.title,
                    url: r.url,
                    snippet: r.description,
                    ..Default::default()
                }
                .with_domain()
            })
            .collect::<Vec<_>>();

        Ok(SearchResponse {
            query: query.to_string(),
            provider: "brave".to_string(),
            total_results: results.len(),
            results,
        })
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse> {
        if self.api_key.is_empty() {
            tracing::warn!("brave_no_api_key");
            return Ok(SearchResponse {
                query: query.to_string(),
                provider: "brave".to_string(),
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
                        "brave_search_complete"
                    );
                    return Ok(response);
                }
                Err(e @ Error::SearchAuth(_)) => return Err(e),
                Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                    let backoff = Duration::from_secs(1 << (attempt - 1)).min(Duration::from_secs(10));
                    tracing::warn!(query, attempt, error = %e, "brave_retry");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "brave"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_parses_web_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("X-Subscription-Token", "bsk-key"))
            .and(query_param("q", "acme lawsuit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"title": "Acme sued", "url": "https://news.example/acme", "description": "filed in Delaware"}
                ]}
            })))
            .mount(&server)
            .await;
        let tool = BraveSearch::new("bsk-key").with_api_url(server.uri());
        let resp = tool.search("acme lawsuit", 5).await.unwrap();
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].snippet, "filed in Delaware");
        assert_eq!(resp.results[0].domain, "news.example");
    }

    #[tokio::test]
    async fn test_missing_web_section_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        let tool = BraveSearch::new("key").with_api_url(server.uri());
        let resp = tool.search("q", 5).await.unwrap();
        assert!(resp.results.is_empty());
    }

    #[tokio::test]
    async fn test_422_is_search_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;
        let tool = BraveSearch::new("key").with_api_url(server.uri());
        let err = tool.search("q", 5).await.unwrap_err();
        assert!(matches!(err, Error::SearchAuth(_)));
    }
}
