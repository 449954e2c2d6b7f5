// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Temporal analyzer: extracts timeline facts and detects contradictions.
//!
//! Contradictions of medium or higher severity auto-generate an
//! inconsistency risk flag.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{
    short_id, InvestigationState, RiskCategory, RiskFlag, RiskSeverity, TemporalContradiction,
    TemporalFact,
};
use crate::prompts::{self, truncate};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct TemporalAnalyzer {
    gateway: Arc<LlmGateway>,
}

impl TemporalAnalyzer {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn merge(state: &mut InvestigationState, data: &Value) {
        let empty = Vec::new();

        for tf in data
            .get("temporal_facts")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let date_range = tf
                .get("date_range")
                .and_then(Value::as_array)
                .map(|arr| {
                    let get = |i: usize| {
                        arr.get(i)
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .filter(|s| !s.is_empty())
                    };
                    (get(0), get(1))
                })
                .unwrap_or((None, None));
            state.temporal_facts.push(TemporalFact {
                id: short_id(),
                claim: tf
                    .get("claim")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                entity_id: tf
                    .get("entity_id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                date_range,
                as_of_date: tf
                    .get("as_of_date")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                source_urls: tf
                    .get("source_urls")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|u| u.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                confidence: tf.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
                category: tf
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or("event")
                    .to_string(),
            });
        }

        for tc in data
            .get("contradictions")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            // The model may return null or numeric ids; coerce to strings.
            let coerce = |key: &str| match tc.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let contradiction = TemporalContradiction {
                id: short_id(),
                fact_a_id: coerce("fact_a_id"),
                fact_b_id: coerce("fact_b_id"),
                description: coerce("description"),
                severity: tc
                    .get("severity")
                    .and_then(Value::as_str)
                    .map(RiskSeverity::parse_lenient)
                    .unwrap_or(RiskSeverity::Medium),
                confidence: tc.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
            };

            if contradiction.severity >= RiskSeverity::Medium {
                let mut flag = RiskFlag::new(
                    RiskCategory::Inconsistency,
                    contradiction.severity,
                    format!(
                        "Temporal contradiction: {}",
                        truncate(&contradiction.description, 80)
                    ),
                );
                flag.description = contradiction.description.clone();
                flag.confidence = contradiction.confidence;
                state.risk_flags.push(flag);
            }
            state.temporal_contradictions.push(contradiction);
        }
    }
}

#[async_trait]
impl Node<InvestigationState> for TemporalAnalyzer {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.entities.len() < 2 {
            tracing::info!(reason = "insufficient entities", "temporal_analysis_skipped");
            return Ok(state);
        }
        let user = prompts::temporal_analyzer_user(&state);
        match self
            .gateway
            .generate_for_task(
                ModelTask::TemporalAnalysis,
                prompts::TEMPORAL_ANALYZER_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                state.total_llm_calls += 1;
                let data = json_repair::parse_lenient(&raw).unwrap_or_else(
                    || serde_json::json!({"temporal_facts": [], "contradictions": []}),
                );
                Self::merge(&mut state, &data);
                tracing::info!(
                    temporal_facts = state.temporal_facts.len(),
                    contradictions = state.temporal_contradictions.len(),
                    "temporal_analysis_done"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "temporal_analysis_error");
                state.error_log.push(format!("Temporal analysis: {e}"));
            }
        }
        Ok(state)
    }

    fn name(&self) -> String {
        "temporal_analysis".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Entity, EntityType};

    fn analyzer(script: Vec<Result<String>>) -> TemporalAnalyzer {
        TemporalAnalyzer::new(Arc::new(
            LlmGateway::builder()
                .deep_model(Provider::Claude, Arc::new(MockChatModel::new("m", script)))
                .build(),
        ))
    }

    fn two_entity_state() -> InvestigationState {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.add_entity(Entity::new("Jane Doe", EntityType::Person), None);
        state.add_entity(Entity::new("Acme", EntityType::Organization), None);
        state
    }

    #[tokio::test]
    async fn test_medium_contradiction_auto_generates_inconsistency_flag() {
        let raw = r#"{
            "temporal_facts": [
                {"claim": "CEO at Acme", "date_range": ["2015", null], "confidence": 0.8, "category": "employment"}
            ],
            "contradictions": [
                {"fact_a_id": "a", "fact_b_id": "b", "description": "Claimed CEO of two firms simultaneously", "severity": "high", "confidence": 0.7}
            ]
        }"#;
        let node = analyzer(vec![Ok(raw.into())]);
        let out = node.execute(two_entity_state()).await.unwrap();
        assert_eq!(out.temporal_facts.len(), 1);
        assert_eq!(out.temporal_contradictions.len(), 1);
        assert_eq!(out.risk_flags.len(), 1);
        let flag = &out.risk_flags[0];
        assert_eq!(flag.category, RiskCategory::Inconsistency);
        assert_eq!(flag.severity, RiskSeverity::High);
        assert!(flag.title.starts_with("Temporal contradiction:"));
    }

    #[tokio::test]
    async fn test_low_contradiction_does_not_flag() {
        let raw = r#"{"temporal_facts": [], "contradictions": [
            {"fact_a_id": "a", "fact_b_id": "b", "description": "Minor date fuzz", "severity": "low"}
        ]}"#;
        let node = analyzer(vec![Ok(raw.into())]);
        let out = node.execute(two_entity_state()).await.unwrap();
        assert_eq!(out.temporal_contradictions.len(), 1);
        assert!(out.risk_flags.is_empty());
    }

    #[tokio::test]
    async fn test_null_ids_coerced_to_empty_strings() {
        let raw = r#"{"temporal_facts": [], "contradictions": [
            {"fact_a_id": null, "fact_b_id": 7, "description": "odd payload", "severity": "medium"}
        ]}"#;
        let node = analyzer(vec![Ok(raw.into())]);
        let out = node.execute(two_entity_state()).await.unwrap();
        assert_eq!(out.temporal_contradictions[0].fact_a_id, "");
        assert_eq!(out.temporal_contradictions[0].fact_b_id, "7");
    }

    #[tokio::test]
    async fn test_skipped_below_two_entities() {
        let node = analyzer(vec![Ok("{}".into())]);
        let out = node.execute(InvestigationState::default()).await.unwrap();
        assert_eq!(out.total_llm_calls, 0);
    }
}
