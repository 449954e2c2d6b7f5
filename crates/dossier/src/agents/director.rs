// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Research director: the supervisor that plans each investigation step.
//!
//! Planning protocol, evaluated in order: hard iteration limit, persistent
//! LLM failure, diminishing returns, LLM planning, budget exhaustion,
//! deterministic fallback. The director may advance the phase but never
//! regresses it, and never emits a query that was already executed.

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{AgentAction, DirectorDecision, InvestigationState, Phase};
use crate::prompts;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

pub struct ResearchDirector {
    gateway: Arc<LlmGateway>,
    config: AgentConfig,
    consecutive_failures: AtomicU32,
}

impl ResearchDirector {
    pub fn new(gateway: Arc<LlmGateway>, config: AgentConfig) -> Self {
        Self {
            gateway,
            config,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    fn synthesis_decision(reason: impl Into<String>, state: &InvestigationState) -> DirectorDecision {
        DirectorDecision {
            reasoning: reason.into(),
            next_action: AgentAction::GenerateReport,
            current_phase: Phase::Synthesis,
            confidence_in_completeness: state.overall_confidence,
            ..Default::default()
        }
    }

    /// Analyze state and decide the next action. Never errors: every failure
    /// mode maps to either a synthesis decision or the deterministic fallback.
    pub async fn plan_next_step(&self, state: &InvestigationState) -> DirectorDecision {
        if state.iteration >= state.max_iterations {
            tracing::info!(iteration = state.iteration, "director_max_iterations_reached");
            return Self::synthesis_decision(
                "Maximum iterations reached. Moving to synthesis.",
                state,
            );
        }

        let failures = self.consecutive_failures.load(Ordering::SeqCst);
        if failures >= CONSECUTIVE_FAILURE_LIMIT {
            tracing::error!(consecutive = failures, "director_persistent_failures");
            // Reset so a resumed run gets a fresh failure window.
            self.consecutive_failures.store(0, Ordering::SeqCst);
            return Self::synthesis_decision(
                format!(
                    "LLM provider failed {failures} consecutive times. Check API keys and provider status. Generating report with whatever findings exist."
                ),
                state,
            );
        }

        let lookback = self.config.diminishing_returns_lookback as usize;
        let min_entities = self.config.diminishing_returns_min_entities;
        if lookback > 0 && state.entities_added_per_iteration.len() >= lookback {
            let recent =
                &state.entities_added_per_iteration[state.entities_added_per_iteration.len() - lookback..];
            if recent.iter().all(|n| *n < min_entities) {
                tracing::info!(?recent, lookback, "director_diminishing_returns");
                return Self::synthesis_decision(
                    "Diminishing returns: recent iterations yielded few new entities. Moving to synthesis.",
                    state,
                );
            }
        }

        let user_prompt = prompts::research_director_user(state);
        match self
            .gateway
            .generate_for_task(
                ModelTask::ResearchDirector,
                prompts::RESEARCH_DIRECTOR_SYSTEM,
                &user_prompt,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                let decision = self.parse_decision(&raw, state);
                tracing::info!(
                    action = decision.next_action.as_str(),
                    phase = decision.current_phase.as_str(),
                    num_queries = decision.search_queries.len(),
                    confidence = decision.confidence_in_completeness,
                    reasoning = prompts::truncate(&decision.reasoning, 200),
                    "director_decision"
                );
                decision
            }
            Err(Error::BudgetExhausted(msg)) => {
                tracing::warn!(error = %msg, "director_budget_exhausted");
                Self::synthesis_decision(
                    format!("Cost budget exhausted: {msg}. Generating report with current findings."),
                    state,
                )
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(error = %e, consecutive_failures = failures, "director_planning_error");
                self.fallback_decision(state)
            }
        }
    }

    fn parse_decision(&self, raw: &str, state: &InvestigationState) -> DirectorDecision {
        let Some(data) = json_repair::parse_lenient(raw) else {
            tracing::warn!(preview = prompts::truncate(raw, 300), "director_json_parse_failed");
            return self.fallback_decision(state);
        };

        let next_action = data
            .get("next_action")
            .and_then(|v| v.as_str())
            .map(AgentAction::parse_lenient)
            .unwrap_or_default();

        let current_phase = data
            .get("current_phase")
            .and_then(|v| v.as_str())
            .map(|s| Phase::parse_lenient(s, state.current_phase))
            .unwrap_or(state.current_phase);

        let used = state.queries_used();
        let search_queries: Vec<String> = data
            .get("search_queries")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|q| q.as_str())
                    .filter(|q| !used.contains(&q.trim().to_lowercase()))
                    .map(str::to_string)
                    .take(5)
                    .collect()
            })
            .unwrap_or_default();

        let str_vec = |key: &str| -> Vec<String> {
            data.get(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|g| g.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        DirectorDecision {
            reasoning: data
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("No reasoning provided")
                .to_string(),
            next_action,
            search_queries,
            target_entity_ids: str_vec("target_entity_ids"),
            current_phase,
            confidence_in_completeness: data
                .get("confidence_in_completeness")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0),
            gaps_identified: str_vec("gaps_identified"),
        }
    }

    /// Deterministic fallback ladder; never repeats a used query.
    fn fallback_decision(&self, state: &InvestigationState) -> DirectorDecision {
        let subject = &state.subject;
        let used = state.queries_used();
        let unused = |q: &String| !used.contains(&q.trim().to_lowercase());

        if state.iteration <= 1 {
            let candidates = vec![
                format!(
                    "{} {}",
                    subject.full_name,
                    subject.current_organization.as_deref().unwrap_or("")
                )
                .trim()
                .to_string(),
                format!("{} LinkedIn background", subject.full_name),
                format!("{} biography", subject.full_name),
            ];
            let mut queries: Vec<String> =
                candidates.iter().filter(|q| unused(q)).take(2).cloned().collect();
            if queries.is_empty() {
                queries = candidates.into_iter().take(1).collect();
            }
            return DirectorDecision {
                reasoning: "Fallback: Initial baseline search for subject".to_string(),
                next_action: AgentAction::SearchWeb,
                search_queries: queries,
                current_phase: Phase::Baseline,
                confidence_in_completeness: 0.0,
                gaps_identified: vec!["Everything, this is the first search".to_string()],
                ..Default::default()
            };
        }

        if state.iteration + 1 >= state.max_iterations {
            return DirectorDecision {
                reasoning: "Fallback: Approaching max iterations, generating report".to_string(),
                next_action: AgentAction::GenerateReport,
                current_phase: Phase::Synthesis,
                confidence_in_completeness: state.overall_confidence,
                ..Default::default()
            };
        }

        let mut queries: Vec<String> = state
            .entities
            .iter()
            .take(5)
            .map(|e| format!("{} {}", subject.full_name, e.name))
            .filter(|q| unused(q))
            .take(3)
            .collect();

        if queries.is_empty() {
            let keywords: &[&str] = match state.current_phase {
                Phase::Baseline => &["career history", "education"],
                Phase::Breadth => &["SEC filings", "board memberships"],
                Phase::Depth => &["controversy", "legal disputes"],
                Phase::Adversarial => &["lawsuit", "fraud allegations"],
                Phase::Triangulation => &["interview quotes", "public statements"],
                Phase::Synthesis => &["news", "profile"],
            };
            queries = keywords
                .iter()
                .map(|kw| format!("{} {kw}", subject.full_name))
                .filter(|q| unused(q))
                .take(2)
                .collect();
        }

        if queries.is_empty() {
            return DirectorDecision {
                reasoning: "Fallback: All fallback queries already used, generating report"
                    .to_string(),
                next_action: AgentAction::GenerateReport,
                current_phase: Phase::Synthesis,
                confidence_in_completeness: state.overall_confidence,
                ..Default::default()
            };
        }

        DirectorDecision {
            reasoning: "Fallback: Exploring discovered entities or phase-appropriate queries"
                .to_string(),
            next_action: AgentAction::SearchWeb,
            search_queries: queries,
            current_phase: state.current_phase,
            confidence_in_completeness: (state.overall_confidence + 0.05).min(0.5),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Node<InvestigationState> for ResearchDirector {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        state.iteration += 1;
        tracing::info!(
            iteration = state.iteration,
            phase = state.current_phase.as_str(),
            entities = state.entities.len(),
            "director_iteration"
        );

        let mut decision = self.plan_next_step(&state).await;
        state.total_llm_calls += 1;
        // Phase discipline: the director may advance but never regress.
        if decision.current_phase < state.current_phase {
            decision.current_phase = state.current_phase;
        }
        state.current_phase = decision.current_phase;
        state.record_phase(decision.current_phase);
        if decision.next_action == AgentAction::Terminate {
            state.should_terminate = true;
        }
        state.last_decision = Some(decision);
        Ok(state)
    }

    fn name(&self) -> String {
        "director".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Entity, EntityType, SearchRecord, SubjectProfile};
    use chrono::Utc;

    fn gateway(script: Vec<Result<String>>) -> Arc<LlmGateway> {
        Arc::new(
            LlmGateway::builder()
                .deep_model(Provider::Claude, Arc::new(MockChatModel::new("m", script)))
                .build(),
        )
    }

    fn state_with_subject() -> InvestigationState {
        InvestigationState::new(
            SubjectProfile {
                full_name: "Jane Doe".into(),
                current_organization: Some("Acme".into()),
                ..Default::default()
            },
            8,
        )
    }

    fn record(query: &str) -> SearchRecord {
        SearchRecord {
            query: query.into(),
            provider: "tavily".into(),
            phase: Phase::Baseline,
            iteration: 1,
            timestamp: Utc::now(),
            num_results: 1,
            result_urls: vec![],
            raw_snippets: vec![],
            was_useful: true,
        }
    }

    #[tokio::test]
    async fn test_max_iterations_forces_report() {
        let director = ResearchDirector::new(gateway(vec![]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 8;
        let decision = director.plan_next_step(&state).await;
        assert_eq!(decision.next_action, AgentAction::GenerateReport);
        assert_eq!(decision.current_phase, Phase::Synthesis);
    }

    #[tokio::test]
    async fn test_diminishing_returns_forces_report() {
        let director = ResearchDirector::new(gateway(vec![]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 4;
        state.record_iteration_yield(1, 0);
        state.record_iteration_yield(0, 0);
        let decision = director.plan_next_step(&state).await;
        assert_eq!(decision.next_action, AgentAction::GenerateReport);
    }

    #[tokio::test]
    async fn test_high_yield_does_not_trip_diminishing_returns() {
        let raw = r#"{"reasoning": "dig", "next_action": "search_web", "search_queries": ["jane doe patents"], "current_phase": "breadth"}"#;
        let director =
            ResearchDirector::new(gateway(vec![Ok(raw.into())]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 4;
        state.record_iteration_yield(5, 3);
        state.record_iteration_yield(4, 1);
        let decision = director.plan_next_step(&state).await;
        assert_eq!(decision.next_action, AgentAction::SearchWeb);
    }

    #[tokio::test]
    async fn test_queries_never_repeat_used_ones() {
        let raw = r#"{"reasoning": "x", "next_action": "search_web", "search_queries": ["Jane Doe Acme", "jane doe lawsuit", "Jane Doe patents"], "current_phase": "breadth"}"#;
        let director =
            ResearchDirector::new(gateway(vec![Ok(raw.into())]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 2;
        state.record_iteration_yield(5, 2);
        state.search_history.push(record("jane doe acme"));
        state.search_history.push(record("Jane Doe lawsuit"));
        let decision = director.plan_next_step(&state).await;
        assert_eq!(decision.search_queries, vec!["Jane Doe patents".to_string()]);
    }

    #[tokio::test]
    async fn test_queries_capped_at_five() {
        let raw = r#"{"reasoning": "x", "next_action": "search_web", "search_queries": ["q1","q2","q3","q4","q5","q6","q7"]}"#;
        let director =
            ResearchDirector::new(gateway(vec![Ok(raw.into())]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 2;
        state.record_iteration_yield(5, 2);
        let decision = director.plan_next_step(&state).await;
        assert_eq!(decision.search_queries.len(), 5);
    }

    #[tokio::test]
    async fn test_persistent_failure_aborts_then_resets() {
        let script = vec![
            Err(Error::authentication("401 invalid api key")),
            Err(Error::authentication("401 invalid api key")),
            Err(Error::authentication("401 invalid api key")),
            Ok(r#"{"reasoning": "back", "next_action": "search_web", "search_queries": ["jane doe recovery"]}"#.into()),
        ];
        let director = ResearchDirector::new(gateway(script), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 2;
        state.record_iteration_yield(5, 2);
        state.record_iteration_yield(5, 2);

        for _ in 0..3 {
            let d = director.plan_next_step(&state).await;
            // Failures produce fallback decisions, not reports, until the limit.
            assert_ne!(d.next_action, AgentAction::GenerateReport);
        }
        // Fourth call: the counter has reached 3 → report without an LLM call,
        // and the failure window resets.
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::GenerateReport);
        assert_eq!(director.consecutive_failures.load(Ordering::SeqCst), 0);

        // Fifth call reaches the LLM again; its scripted success keeps the
        // counter at zero.
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::SearchWeb);
        assert_eq!(director.consecutive_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_report() {
        let script = vec![Err(Error::budget_exhausted("over budget"))];
        let director = ResearchDirector::new(gateway(script), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 2;
        state.record_iteration_yield(5, 2);
        state.record_iteration_yield(5, 2);
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::GenerateReport);
        assert!(d.reasoning.contains("budget"));
    }

    #[tokio::test]
    async fn test_fallback_baseline_queries_on_first_iteration() {
        let script = vec![Err(Error::invalid_input("400 malformed"))];
        let director = ResearchDirector::new(gateway(script), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 1;
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::SearchWeb);
        assert_eq!(d.search_queries.len(), 2);
        assert!(d.search_queries[0].contains("Jane Doe"));
        assert!(d.search_queries[0].contains("Acme"));
    }

    #[tokio::test]
    async fn test_fallback_uses_phase_keywords_when_entities_exhausted() {
        let script = vec![Err(Error::invalid_input("400 bad"))];
        let director = ResearchDirector::new(gateway(script), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 3;
        state.record_iteration_yield(5, 2);
        state.current_phase = Phase::Adversarial;
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::SearchWeb);
        assert!(d
            .search_queries
            .iter()
            .any(|q| q.contains("lawsuit") || q.contains("fraud allegations")));
    }

    #[tokio::test]
    async fn test_fallback_exhausted_everything_reports() {
        let script = vec![Err(Error::invalid_input("400 bad"))];
        let director = ResearchDirector::new(gateway(script), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 3;
        state.record_iteration_yield(5, 2);
        state.current_phase = Phase::Depth;
        state.add_entity(Entity::new("Acme", EntityType::Organization), None);
        // Exhaust the entity-combination and keyword queries.
        state.search_history.push(record("Jane Doe Acme"));
        state.search_history.push(record("Jane Doe controversy"));
        state.search_history.push(record("Jane Doe legal disputes"));
        let d = director.plan_next_step(&state).await;
        assert_eq!(d.next_action, AgentAction::GenerateReport);
    }

    #[tokio::test]
    async fn test_phase_never_regresses() {
        let raw = r#"{"reasoning": "x", "next_action": "search_web", "search_queries": ["jane doe q"], "current_phase": "baseline"}"#;
        let director =
            ResearchDirector::new(gateway(vec![Ok(raw.into())]), AgentConfig::default());
        let mut state = state_with_subject();
        state.iteration = 3;
        state.record_iteration_yield(5, 2);
        state.current_phase = Phase::Depth;
        let out = director.execute(state).await.unwrap();
        assert_eq!(out.current_phase, Phase::Depth);
    }

    #[tokio::test]
    async fn test_terminate_action_sets_flag() {
        let raw = r#"{"reasoning": "done", "next_action": "terminate", "current_phase": "synthesis"}"#;
        let director =
            ResearchDirector::new(gateway(vec![Ok(raw.into())]), AgentConfig::default());
        let mut state = state_with_subject();
        state.record_iteration_yield(5, 2);
        let out = director.execute(state).await.unwrap();
        assert!(out.should_terminate);
        assert_eq!(out.iteration, 1);
    }
}
