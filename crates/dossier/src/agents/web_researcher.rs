// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Web researcher: executes the director's queries and collects raw content.
//!
//! Queries run in parallel; results are deduplicated by URL across the batch.
//! Outside the baseline phase, results without raw content go through the
//! tiered fetcher, and fetch failures land in `inaccessible_urls` instead of
//! stopping the batch. Triangulation and adversarial phases query both search
//! providers and merge.

use crate::error::Result;
use crate::events::{event, ProgressEvent, ProgressSink};
use crate::graph::Node;
use crate::models::{InaccessibleUrl, InvestigationState, PendingContent, Phase};
use crate::prompts::truncate;
use crate::tools::SearchOrchestrator;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Raw-content cap per fetched page.
const RAW_CONTENT_CAP: usize = 5000;

pub struct WebResearcher {
    orchestrator: Arc<SearchOrchestrator>,
    sink: Arc<ProgressSink>,
}

impl WebResearcher {
    pub fn new(orchestrator: Arc<SearchOrchestrator>, sink: Arc<ProgressSink>) -> Self {
        Self { orchestrator, sink }
    }

    pub async fn execute_searches(
        &self,
        mut state: InvestigationState,
        queries: Vec<String>,
    ) -> InvestigationState {
        if queries.is_empty() {
            tracing::warn!("web_research_no_queries");
            return state;
        }
        let phase = state.current_phase;
        let use_both = matches!(phase, Phase::Triangulation | Phase::Adversarial);

        for q in &queries {
            self.sink.emit(
                ProgressEvent::new(event::SEARCH)
                    .phase(phase.as_str())
                    .with("query", q),
            );
        }

        let searches = queries
            .iter()
            .map(|q| self.orchestrator.search(q, phase, state.iteration, use_both));
        let results = futures::future::join_all(searches).await;

        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut new_content: Vec<PendingContent> = Vec::new();

        for result in results {
            let (response, record) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "search_task_error");
                    state.error_log.push(format!("Search error: {e}"));
                    continue;
                }
            };
            state.search_history.push(record);
            state.total_search_calls += 1;

            for item in response.results {
                if !seen_urls.insert(item.url.clone()) {
                    continue;
                }
                let mut entry = PendingContent {
                    url: item.url.clone(),
                    title: item.title,
                    snippet: item.snippet,
                    domain: item.domain,
                    raw_content: if item.raw_content.is_empty() {
                        None
                    } else {
                        Some(item.raw_content)
                    },
                    query: response.query.clone(),
                };
                if entry.raw_content.is_none() && phase != Phase::Baseline {
                    let outcome = self.orchestrator.fetch_url(&item.url).await;
                    match (outcome.content, outcome.inaccessible_reason) {
                        (Some(content), _) => {
                            entry.raw_content = Some(truncate(&content, RAW_CONTENT_CAP));
                        }
                        (None, Some(reason)) => {
                            state.inaccessible_urls.push(InaccessibleUrl {
                                url: item.url.clone(),
                                reason: truncate(&reason, 200),
                                query: response.query.clone(),
                                phase,
                            });
                        }
                        (None, None) => {}
                    }
                }
                new_content.push(entry);
            }
        }

        let num_results = new_content.len();
        state.pending_content.extend(new_content);
        tracing::info!(
            num_queries = queries.len(),
            num_results,
            phase = phase.as_str(),
            "web_research_complete"
        );
        state
    }
}

#[async_trait]
impl Node<InvestigationState> for WebResearcher {
    async fn execute(&self, state: InvestigationState) -> Result<InvestigationState> {
        let queries = state
            .last_decision
            .as_ref()
            .map(|d| d.search_queries.clone())
            .unwrap_or_default();
        Ok(self.execute_searches(state, queries).await)
    }

    fn name(&self) -> String {
        "web_research".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectorDecision;
    use crate::tools::test_support::{result, MockFetcher, MockSearchProvider};
    use crate::tools::FetchOutcome;

    fn orchestrator_with(
        primary: Arc<MockSearchProvider>,
        secondary: Option<Arc<MockSearchProvider>>,
        fetcher: Arc<MockFetcher>,
    ) -> Arc<SearchOrchestrator> {
        Arc::new(SearchOrchestrator::new(primary, secondary.map(|s| s as _), fetcher, 10))
    }

    fn state_with_queries(queries: &[&str], phase: Phase) -> InvestigationState {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.current_phase = phase;
        state.iteration = 1;
        state.last_decision = Some(DirectorDecision {
            search_queries: queries.iter().map(|q| (*q).to_string()).collect(),
            ..Default::default()
        });
        state
    }

    #[tokio::test]
    async fn test_results_deduped_by_url_across_batch() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        primary.respond("q1", vec![result("https://a.example", "A", "s")]);
        primary.respond("q2", vec![result("https://a.example", "A again", "s2")]);
        let researcher = WebResearcher::new(
            orchestrator_with(primary, None, Arc::new(MockFetcher::new())),
            Arc::new(ProgressSink::disabled()),
        );
        let out = researcher
            .execute(state_with_queries(&["q1", "q2"], Phase::Baseline))
            .await
            .unwrap();
        assert_eq!(out.pending_content.len(), 1);
        assert_eq!(out.search_history.len(), 2);
        assert_eq!(out.total_search_calls, 2);
    }

    #[tokio::test]
    async fn test_baseline_phase_skips_fetch() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        primary.respond("q", vec![result("https://a.example", "A", "snippet only")]);
        let fetcher = Arc::new(MockFetcher::new());
        let researcher = WebResearcher::new(
            orchestrator_with(primary, None, fetcher),
            Arc::new(ProgressSink::disabled()),
        );
        let out = researcher
            .execute(state_with_queries(&["q"], Phase::Baseline))
            .await
            .unwrap();
        assert!(out.pending_content[0].raw_content.is_none());
        assert!(out.inaccessible_urls.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_records_inaccessible_url() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        primary.respond("q", vec![result("https://blocked.example/x", "B", "s")]);
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            "https://blocked.example/x",
            FetchOutcome::inaccessible("403", "blocked_403"),
        );
        let researcher = WebResearcher::new(
            orchestrator_with(primary, None, fetcher),
            Arc::new(ProgressSink::disabled()),
        );
        let out = researcher
            .execute(state_with_queries(&["q"], Phase::Depth))
            .await
            .unwrap();
        assert_eq!(out.inaccessible_urls.len(), 1);
        let entry = &out.inaccessible_urls[0];
        assert_eq!(entry.url, "https://blocked.example/x");
        assert_eq!(entry.reason, "blocked_403");
        assert_eq!(entry.query, "q");
        assert_eq!(entry.phase, Phase::Depth);
    }

    #[tokio::test]
    async fn test_fetch_success_fills_raw_content() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        primary.respond("q", vec![result("https://ok.example", "OK", "s")]);
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            "https://ok.example",
            FetchOutcome::success("full page body", "200"),
        );
        let researcher = WebResearcher::new(
            orchestrator_with(primary, None, fetcher),
            Arc::new(ProgressSink::disabled()),
        );
        let out = researcher
            .execute(state_with_queries(&["q"], Phase::Breadth))
            .await
            .unwrap();
        assert_eq!(
            out.pending_content[0].raw_content.as_deref(),
            Some("full page body")
        );
    }

    #[tokio::test]
    async fn test_adversarial_phase_merges_both_providers() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        primary.respond("q", vec![result("https://t.example", "T", "s")]);
        let secondary = Arc::new(MockSearchProvider::new("brave"));
        secondary.respond("q", vec![result("https://b.example", "B", "s")]);
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("https://t.example", FetchOutcome::success("t", "200"));
        fetcher.respond("https://b.example", FetchOutcome::success("b", "200"));
        let researcher = WebResearcher::new(
            orchestrator_with(primary, Some(secondary), fetcher),
            Arc::new(ProgressSink::disabled()),
        );
        let out = researcher
            .execute(state_with_queries(&["q"], Phase::Adversarial))
            .await
            .unwrap();
        assert_eq!(out.pending_content.len(), 2);
        assert_eq!(out.search_history[0].provider, "tavily+brave");
    }

    #[tokio::test]
    async fn test_no_queries_is_a_noop() {
        let primary = Arc::new(MockSearchProvider::new("tavily"));
        let researcher = WebResearcher::new(
            orchestrator_with(primary, None, Arc::new(MockFetcher::new())),
            Arc::new(ProgressSink::disabled()),
        );
        let mut state = InvestigationState::default();
        state.last_decision = Some(DirectorDecision::default());
        let out = researcher.execute(state).await.unwrap();
        assert!(out.search_history.is_empty());
    }
}
