// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Connection mapper: traces relationships between entities, including
//! indirect links, and turns the model's suggested follow-ups into
//! hypotheses.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{Connection, Hypothesis, InvestigationState, RelationshipType};
use crate::prompts;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct ConnectionMapper {
    gateway: Arc<LlmGateway>,
}

impl ConnectionMapper {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn merge(state: &mut InvestigationState, data: &Value) -> usize {
        let empty = Vec::new();
        let mut new_count = 0usize;
        for rc in data
            .get("connections")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let src = rc.get("source").and_then(Value::as_str).unwrap_or("");
            let tgt = rc.get("target").and_then(Value::as_str).unwrap_or("");
            let (Some(src), Some(tgt)) = (
                state.find_entity_by_name(src).map(|e| e.id.clone()),
                state.find_entity_by_name(tgt).map(|e| e.id.clone()),
            ) else {
                continue;
            };
            let relationship = rc
                .get("relationship")
                .and_then(Value::as_str)
                .map(RelationshipType::parse_lenient)
                .unwrap_or_default();
            let mut conn = Connection::new(src, tgt, relationship);
            conn.description = rc
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            conn.confidence = rc.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
            if let Some(urls) = rc.get("source_urls").and_then(Value::as_array) {
                conn.source_urls = urls
                    .iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect();
            }
            state.add_connection(conn);
            new_count += 1;
        }
        for insight in data
            .get("suggested_investigations")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            if let Some(text) = insight.as_str() {
                state.hypotheses.push(Hypothesis::new(text, 7));
            }
        }
        new_count
    }
}

#[async_trait]
impl Node<InvestigationState> for ConnectionMapper {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.entities.len() < 3 {
            tracing::info!(reason = "too few entities", "connection_mapping_skipped");
            return Ok(state);
        }
        let user = prompts::connection_mapper_user(&state);
        match self
            .gateway
            .generate_for_task(
                ModelTask::ConnectionMapping,
                prompts::CONNECTION_MAPPER_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                state.total_llm_calls += 1;
                let data = json_repair::parse_lenient(&raw).unwrap_or_else(
                    || serde_json::json!({"connections": [], "suggested_investigations": []}),
                );
                let new_count = Self::merge(&mut state, &data);
                tracing::info!(new_connections = new_count, "connection_mapping_done");
            }
            Err(e) => {
                tracing::error!(error = %e, "connection_mapping_error");
                state.error_log.push(format!("Connection mapping: {e}"));
            }
        }
        Ok(state)
    }

    fn name(&self) -> String {
        "connection_mapping".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Entity, EntityType};

    fn mapper(script: Vec<Result<String>>) -> ConnectionMapper {
        ConnectionMapper::new(Arc::new(
            LlmGateway::builder()
                .deep_model(Provider::Claude, Arc::new(MockChatModel::new("m", script)))
                .build(),
        ))
    }

    fn three_entity_state() -> InvestigationState {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.add_entity(Entity::new("Jane Doe", EntityType::Person), None);
        state.add_entity(Entity::new("Acme", EntityType::Organization), None);
        state.add_entity(Entity::new("Globex", EntityType::Organization), None);
        state
    }

    #[tokio::test]
    async fn test_skipped_below_three_entities() {
        let node = mapper(vec![Ok("{}".into())]);
        let mut state = InvestigationState::default();
        state.add_entity(Entity::new("A", EntityType::Person), None);
        state.add_entity(Entity::new("B", EntityType::Person), None);
        let out = node.execute(state).await.unwrap();
        assert_eq!(out.total_llm_calls, 0);
    }

    #[tokio::test]
    async fn test_connections_resolved_and_suggestions_become_hypotheses() {
        let raw = r#"{
            "connections": [
                {"source": "Acme", "target": "Globex", "relationship": "SUBSIDIARY_OF", "confidence": 0.7},
                {"source": "Acme", "target": "Unknown Holdings", "relationship": "PARTNER_OF"}
            ],
            "suggested_investigations": ["Check Globex board overlap with Acme"]
        }"#;
        let node = mapper(vec![Ok(raw.into())]);
        let out = node.execute(three_entity_state()).await.unwrap();
        assert_eq!(out.connections.len(), 1);
        assert_eq!(
            out.connections[0].relationship_type,
            RelationshipType::SubsidiaryOf
        );
        assert_eq!(out.hypotheses.len(), 1);
        assert_eq!(out.hypotheses[0].priority, 7);
    }

    #[tokio::test]
    async fn test_error_goes_to_error_log() {
        let node = mapper(vec![Err(crate::error::Error::invalid_input("400"))]);
        let out = node.execute(three_entity_state()).await.unwrap();
        assert_eq!(out.error_log.len(), 1);
        assert!(out.error_log[0].starts_with("Connection mapping:"));
    }
}
