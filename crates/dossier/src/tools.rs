// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Search and fetch seams, and the orchestrator that coordinates providers.
//!
//! `dossier-tavily` / `dossier-brave` implement [`SearchProvider`];
//! `dossier-webfetch` implements [`UrlFetcher`]. The orchestrator owns the
//! fallback and triangulation strategy so agent code doesn't care which
//! provider returned the data.

use crate::error::{Error, Result};
use crate::models::{Phase, SearchRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single normalized search result from any provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NormalizedResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub score: f64,
    /// Full page content if the provider returned it.
    #[serde(default)]
    pub raw_content: String,
}

impl NormalizedResult {
    /// Fill `domain` from the URL when the provider left it empty.
    pub fn with_domain(mut self) -> Self {
        if self.domain.is_empty() {
            if let Ok(parsed) = url::Url::parse(&self.url) {
                self.domain = parsed.host_str().unwrap_or_default().to_string();
            }
        }
        self
    }
}

/// Aggregated search response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub query: String,
    pub provider: String,
    #[serde(default)]
    pub results: Vec<NormalizedResult>,
    #[serde(default)]
    pub total_results: usize,
}

/// Result of a tiered URL fetch; distinguishes success from
/// tried-but-inaccessible.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FetchOutcome {
    pub content: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub inaccessible_reason: Option<String>,
}

impl FetchOutcome {
    pub fn success(content: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            status: status.into(),
            inaccessible_reason: None,
        }
    }

    pub fn inaccessible(status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            content: None,
            status: status.into(),
            inaccessible_reason: Some(reason.into()),
        }
    }
}

/// A web search provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Execute a search. Auth failures return [`Error::SearchAuth`]; the
    /// orchestrator maps those to empty result sets.
    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse>;

    /// Provider tag for search records ("tavily", "brave").
    fn name(&self) -> &'static str;
}

/// A URL fetcher (the tiered pipeline).
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Coordinates search providers with intelligent fallback.
///
/// Strategy: primary provider first; fall back to the secondary when the
/// primary returns nothing. Triangulation and adversarial phases run both in
/// parallel and merge URL-keyed for result diversity.
pub struct SearchOrchestrator {
    primary: Arc<dyn SearchProvider>,
    secondary: Option<Arc<dyn SearchProvider>>,
    fetcher: Arc<dyn UrlFetcher>,
    max_results: u32,
}

impl SearchOrchestrator {
    pub fn new(
        primary: Arc<dyn SearchProvider>,
        secondary: Option<Arc<dyn SearchProvider>>,
        fetcher: Arc<dyn UrlFetcher>,
        max_results: u32,
    ) -> Self {
        Self {
            primary,
            secondary,
            fetcher,
            max_results,
        }
    }

    /// Execute one query, producing the response and its search record.
    pub async fn search(
        &self,
        query: &str,
        phase: Phase,
        iteration: u32,
        use_both: bool,
    ) -> Result<(SearchResponse, SearchRecord)> {
        if use_both && self.secondary.is_some() {
            return self.parallel_search(query, phase, iteration).await;
        }

        let response = self.provider_search(&*self.primary, query).await;
        if !response.results.is_empty() {
            let record = Self::record_for(&response, phase, iteration);
            return Ok((response, record));
        }

        let Some(secondary) = &self.secondary else {
            let record = Self::record_for(&response, phase, iteration);
            return Ok((response, record));
        };
        tracing::info!(query, fallback = secondary.name(), "search_fallback");
        let response = self.provider_search(&**secondary, query).await;
        let record = Self::record_for(&response, phase, iteration);
        Ok((response, record))
    }

    async fn parallel_search(
        &self,
        query: &str,
        phase: Phase,
        iteration: u32,
    ) -> Result<(SearchResponse, SearchRecord)> {
        let secondary = self
            .secondary
            .as_ref()
            .ok_or_else(|| Error::tool_error("parallel search requires a secondary provider"))?;

        let (first, second) = futures::join!(
            self.provider_search(&*self.primary, query),
            self.provider_search(&**secondary, query),
        );

        let mut merged: Vec<NormalizedResult> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for result in first.results.into_iter().chain(second.results) {
            if seen.insert(result.url.clone()) {
                merged.push(result);
            }
        }
        let provider = format!("{}+{}", self.primary.name(), secondary.name());
        let response = SearchResponse {
            query: query.to_string(),
            provider,
            total_results: merged.len(),
            results: merged,
        };
        let record = Self::record_for(&response, phase, iteration);
        Ok((response, record))
    }

    /// One provider call; auth and transport failures become empty responses
    /// so a bad provider never sinks the batch.
    async fn provider_search(&self, provider: &dyn SearchProvider, query: &str) -> SearchResponse {
        match provider.search(query, self.max_results).await {
            Ok(response) => response,
            Err(Error::SearchAuth(msg)) => {
                tracing::error!(provider = provider.name(), query, error = %msg, "search_auth_error");
                SearchResponse {
                    query: query.to_string(),
                    provider: provider.name().to_string(),
                    ..Default::default()
                }
            }
            Err(e) => {
                tracing::error!(provider = provider.name(), query, error = %e, "search_error");
                SearchResponse {
                    query: query.to_string(),
                    provider: provider.name().to_string(),
                    ..Default::default()
                }
            }
        }
    }

    fn record_for(response: &SearchResponse, phase: Phase, iteration: u32) -> SearchRecord {
        SearchRecord {
            query: response.query.clone(),
            provider: response.provider.clone(),
            phase,
            iteration,
            timestamp: Utc::now(),
            num_results: response.results.len(),
            result_urls: response.results.iter().map(|r| r.url.clone()).collect(),
            raw_snippets: response
                .results
                .iter()
                .take(5)
                .map(|r| r.snippet.clone())
                .collect(),
            was_useful: !response.results.is_empty(),
        }
    }

    /// Fetch a specific URL through the tiered pipeline.
    pub async fn fetch_url(&self, url: &str) -> FetchOutcome {
        self.fetcher.fetch(url).await
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted search provider for tests.
    pub struct MockSearchProvider {
        pub provider_name: &'static str,
        pub responses: Mutex<std::collections::HashMap<String, Vec<NormalizedResult>>>,
        pub fail_with: Mutex<Option<Error>>,
    }

    impl MockSearchProvider {
        pub fn new(name: &'static str) -> Self {
            Self {
                provider_name: name,
                responses: Mutex::new(std::collections::HashMap::new()),
                fail_with: Mutex::new(None),
            }
        }

        pub fn respond(&self, query: &str, results: Vec<NormalizedResult>) {
            self.responses.lock().insert(query.to_string(), results);
        }
    }

    #[async_trait]
    impl SearchProvider for MockSearchProvider {
        async fn search(&self, query: &str, _max_results: u32) -> Result<SearchResponse> {
            if let Some(err) = self.fail_with.lock().take() {
                return Err(err);
            }
            let results = self
                .responses
                .lock()
                .get(query)
                .cloned()
                .unwrap_or_default();
            Ok(SearchResponse {
                query: query.to_string(),
                provider: self.provider_name.to_string(),
                total_results: results.len(),
                results,
            })
        }

        fn name(&self) -> &'static str {
            self.provider_name
        }
    }

    /// Fetcher that serves canned outcomes by URL.
    pub struct MockFetcher {
        pub outcomes: Mutex<std::collections::HashMap<String, FetchOutcome>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self {
                outcomes: Mutex::new(std::collections::HashMap::new()),
            }
        }

        pub fn respond(&self, url: &str, outcome: FetchOutcome) {
            self.outcomes.lock().insert(url.to_string(), outcome);
        }
    }

    #[async_trait]
    impl UrlFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            self.outcomes
                .lock()
                .get(url)
                .cloned()
                .unwrap_or_else(|| FetchOutcome::inaccessible("404", "not_found"))
        }
    }

    pub fn result(url: &str, title: &str, snippet: &str) -> NormalizedResult {
        NormalizedResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            ..Default::default()
        }
        .with_domain()
    }
}
