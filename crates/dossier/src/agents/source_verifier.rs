// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Source verifier: cross-references claims and scores confidence.
//!
//! Produces per-claim confidence scores; the overall confidence is the
//! arithmetic mean of everything recorded so far. Contradictions the model
//! reports land in the error log with a `CONTRADICTION:` prefix.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::InvestigationState;
use crate::prompts::{self, truncate};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct SourceVerifier {
    gateway: Arc<LlmGateway>,
}

impl SourceVerifier {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn collect_claims(state: &InvestigationState) -> Vec<String> {
        let mut claims = Vec::new();
        for entity in state.entities.iter().take(15) {
            for (key, value) in &entity.attributes {
                claims.push(format!("{}: {key} = {value}", entity.name));
            }
        }
        for assoc in state.subject.known_associations.iter().take(10) {
            claims.push(assoc.clone());
        }
        claims.truncate(20);
        claims
    }

    fn collect_sources(state: &InvestigationState) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut sources = Vec::new();
        for record in &state.search_history {
            for url in &record.result_urls {
                if seen.insert(url.clone()) {
                    sources.push(url.clone());
                }
            }
        }
        sources.truncate(30);
        sources
    }
}

#[async_trait]
impl Node<InvestigationState> for SourceVerifier {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.entities.is_empty() {
            return Ok(state);
        }
        let claims = Self::collect_claims(&state);
        if claims.is_empty() {
            return Ok(state);
        }
        let sources = Self::collect_sources(&state);
        let user = prompts::source_verifier_user(&state.subject.full_name, &claims, &sources);

        match self
            .gateway
            .generate_for_task(
                ModelTask::SourceVerification,
                prompts::SOURCE_VERIFIER_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                state.total_llm_calls += 1;
                let data = json_repair::parse_lenient(&raw).unwrap_or_else(
                    || serde_json::json!({"verified_claims": [], "contradictions": []}),
                );
                let empty = Vec::new();
                let verified = data
                    .get("verified_claims")
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                for vc in verified {
                    let claim = vc.get("claim").and_then(Value::as_str).unwrap_or("");
                    let confidence = vc.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
                    state
                        .confidence_scores
                        .insert(truncate(claim, 100), confidence);
                }
                if !state.confidence_scores.is_empty() {
                    let sum: f64 = state.confidence_scores.values().sum();
                    state.overall_confidence = sum / state.confidence_scores.len() as f64;
                }
                let contradictions = data
                    .get("contradictions")
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                for c in contradictions {
                    let claim = c
                        .get("claim")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    state.error_log.push(format!("CONTRADICTION: {claim}"));
                }
                tracing::info!(
                    verified = verified.len(),
                    contradictions = contradictions.len(),
                    overall_confidence = state.overall_confidence,
                    "source_verification_done"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "source_verification_error");
                state.error_log.push(format!("Source verification: {e}"));
            }
        }
        Ok(state)
    }

    fn name(&self) -> String {
        "source_verification".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Entity, EntityType};

    fn verifier(script: Vec<Result<String>>) -> SourceVerifier {
        SourceVerifier::new(Arc::new(
            LlmGateway::builder()
                .fast_model(Provider::Openai, Arc::new(MockChatModel::new("m", script)))
                .build(),
        ))
    }

    fn state_with_claims() -> InvestigationState {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        let mut e = Entity::new("Acme", EntityType::Organization);
        e.attributes.insert("hq".into(), "Delaware".into());
        state.add_entity(e, None);
        state
    }

    #[tokio::test]
    async fn test_overall_confidence_is_mean_of_scores() {
        let raw = r#"{"verified_claims": [
            {"claim": "Acme: hq = Delaware", "confidence": 0.9},
            {"claim": "Jane is CEO", "confidence": 0.5}
        ], "contradictions": []}"#;
        let node = verifier(vec![Ok(raw.into())]);
        let out = node.execute(state_with_claims()).await.unwrap();
        assert_eq!(out.confidence_scores.len(), 2);
        assert!((out.overall_confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_contradictions_logged_with_prefix() {
        let raw = r#"{"verified_claims": [], "contradictions": [{"claim": "conflicting tenure dates"}]}"#;
        let node = verifier(vec![Ok(raw.into())]);
        let out = node.execute(state_with_claims()).await.unwrap();
        assert_eq!(
            out.error_log,
            vec!["CONTRADICTION: conflicting tenure dates".to_string()]
        );
    }

    #[tokio::test]
    async fn test_no_entities_is_noop() {
        let node = verifier(vec![Ok("{}".into())]);
        let out = node.execute(InvestigationState::default()).await.unwrap();
        assert_eq!(out.total_llm_calls, 0);
    }

    #[tokio::test]
    async fn test_claim_keys_truncated_to_100_chars() {
        let long_claim = "x".repeat(300);
        let raw = format!(
            r#"{{"verified_claims": [{{"claim": "{long_claim}", "confidence": 0.6}}], "contradictions": []}}"#
        );
        let node = verifier(vec![Ok(raw)]);
        let out = node.execute(state_with_claims()).await.unwrap();
        assert!(out.confidence_scores.keys().all(|k| k.len() <= 100));
    }
}
