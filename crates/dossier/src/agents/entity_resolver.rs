// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Entity resolver: deduplicates entities via fuzzy candidates plus LLM
//! confirmation.
//!
//! Step 1: propose candidate pairs by normalized-name similarity (same type,
//! similarity in [0.75, 1.0), at most 20 pairs). Step 2: the model confirms
//! merges; only pairs with confidence ≥ 0.8 are accepted. Step 3: merge b
//! into a and rewrite every connection endpoint through the merge map.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{name_similarity, Entity, InvestigationState};
use crate::prompts;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const CANDIDATE_THRESHOLD: f64 = 0.75;
const CANDIDATE_LIMIT: usize = 20;
const CONFIRM_THRESHOLD: f64 = 0.8;

pub struct EntityResolver {
    gateway: Arc<LlmGateway>,
}

impl EntityResolver {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn find_candidates(entities: &[Entity]) -> Vec<Value> {
        let mut candidates = Vec::new();
        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                if a.entity_type != b.entity_type {
                    continue;
                }
                let score = name_similarity(&a.name, &b.name);
                if (CANDIDATE_THRESHOLD..1.0).contains(&score) {
                    candidates.push(json!({
                        "entity_a_id": a.id,
                        "entity_a_name": a.name,
                        "entity_b_id": b.id,
                        "entity_b_name": b.name,
                        "similarity": (score * 1000.0).round() / 1000.0,
                        "entity_type": a.entity_type.as_str(),
                    }));
                }
            }
        }
        candidates.truncate(CANDIDATE_LIMIT);
        candidates
    }

    /// Merge confirmed pairs; returns the number of merges applied.
    fn merge_entities(state: &mut InvestigationState, confirmed: &[Value]) -> usize {
        let mut merge_map: HashMap<String, String> = HashMap::new();
        let mut merged = 0usize;

        for pair in confirmed {
            let a_id = pair
                .get("entity_a_id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let b_id = pair
                .get("entity_b_id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            // Follow prior merges so chains (c→b→a) land on the survivor.
            let a_id = merge_map.get(&a_id).cloned().unwrap_or(a_id);
            if a_id == b_id {
                continue;
            }
            let Some(b_pos) = state.entities.iter().position(|e| e.id == b_id) else {
                continue;
            };
            if !state.entities.iter().any(|e| e.id == a_id) {
                continue;
            }
            let b = state.entities.remove(b_pos);
            let Some(a) = state.entities.iter_mut().find(|e| e.id == a_id) else {
                continue;
            };

            if !a.aliases.contains(&b.name) {
                a.aliases.push(b.name.clone());
            }
            for alias in b.aliases {
                if !a.aliases.contains(&alias) {
                    a.aliases.push(alias);
                }
            }
            for url in b.source_urls {
                if !a.source_urls.contains(&url) {
                    a.source_urls.push(url);
                }
            }
            a.attributes.extend(b.attributes);
            a.confidence = a.confidence.max(b.confidence);
            if a.description.is_empty() && !b.description.is_empty() {
                a.description = b.description;
            }

            merge_map.insert(b.id, a_id);
            merged += 1;
        }

        for conn in &mut state.connections {
            if let Some(new_id) = merge_map.get(&conn.source_entity_id) {
                conn.source_entity_id = new_id.clone();
            }
            if let Some(new_id) = merge_map.get(&conn.target_entity_id) {
                conn.target_entity_id = new_id.clone();
            }
        }

        merged
    }
}

#[async_trait]
impl Node<InvestigationState> for EntityResolver {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.entities.len() < 5 {
            tracing::info!(reason = "too few entities", "entity_resolution_skipped");
            return Ok(state);
        }

        let candidates = Self::find_candidates(&state.entities);
        if candidates.is_empty() {
            tracing::info!("entity_resolution_no_candidates");
            return Ok(state);
        }

        let all_entities: Vec<Value> = state
            .entities
            .iter()
            .take(40)
            .map(|e| {
                json!({
                    "id": e.id,
                    "name": e.name,
                    "type": e.entity_type.as_str(),
                    "aliases": e.aliases,
                })
            })
            .collect();
        let user = prompts::entity_resolver_user(
            &state.subject.full_name,
            &Value::Array(candidates.clone()),
            &Value::Array(all_entities),
        );

        let confirmed = match self
            .gateway
            .generate_for_task(
                ModelTask::EntityResolution,
                prompts::ENTITY_RESOLVER_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                state.total_llm_calls += 1;
                let data = json_repair::parse_lenient(&raw)
                    .unwrap_or_else(|| json!({"merge_pairs": []}));
                data.get("merge_pairs")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter(|pair| {
                                pair.get("confidence")
                                    .and_then(Value::as_f64)
                                    .unwrap_or(0.0)
                                    >= CONFIRM_THRESHOLD
                            })
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            }
            Err(e) => {
                tracing::error!(error = %e, "entity_resolution_llm_error");
                return Ok(state);
            }
        };

        if confirmed.is_empty() {
            tracing::info!("entity_resolution_no_confirmed_merges");
            return Ok(state);
        }
        let merged = Self::merge_entities(&mut state, &confirmed);
        tracing::info!(candidates = candidates.len(), merged, "entity_resolution_done");
        Ok(state)
    }

    fn name(&self) -> String {
        "entity_resolution".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Connection, EntityType, RelationshipType};

    fn resolver(script: Vec<Result<String>>) -> EntityResolver {
        EntityResolver::new(Arc::new(
            LlmGateway::builder()
                .fast_model(Provider::Openai, Arc::new(MockChatModel::new("m", script)))
                .build(),
        ))
    }

    fn state_with_near_duplicates() -> (InvestigationState, String, String) {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        for name in ["Alpha One", "Beta Two", "Gamma Three", "Delta Four"] {
            state.add_entity(Entity::new(name, EntityType::Person), None);
        }
        let (a_id, _) =
            state.add_entity(Entity::new("Acme Corporation", EntityType::Organization), None);
        let mut b = Entity::new("Acme Corporation Inc", EntityType::Organization);
        b.description = "Industrial conglomerate".into();
        b.source_urls.push("https://b.example".into());
        let (b_id, _) = state.add_entity(b, None);
        (state, a_id, b_id)
    }

    #[test]
    fn test_candidates_same_type_in_band() {
        let (state, _, _) = state_with_near_duplicates();
        let candidates = EntityResolver::find_candidates(&state.entities);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["entity_type"], "organization");
    }

    #[test]
    fn test_identical_names_not_candidates() {
        // Similarity 1.0 is exact-dedup territory, not resolution.
        let entities = vec![
            Entity::new("Same Name", EntityType::Person),
            Entity::new("Same Name", EntityType::Person),
        ];
        assert!(EntityResolver::find_candidates(&entities).is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_merge_rewrites_connections() {
        let (mut state, a_id, b_id) = state_with_near_duplicates();
        let (person_id, _) = (state.entities[0].id.clone(), ());
        state.add_connection(Connection::new(
            person_id.clone(),
            b_id.clone(),
            RelationshipType::WorksAt,
        ));
        let entity_count = state.entities.len();

        let raw = format!(
            r#"{{"merge_pairs": [{{"entity_a_id": "{a_id}", "entity_b_id": "{b_id}", "confidence": 0.95, "reasoning": "same org"}}]}}"#
        );
        let node = resolver(vec![Ok(raw)]);
        let out = node.execute(state).await.unwrap();

        assert_eq!(out.entities.len(), entity_count - 1);
        assert!(out.entity_by_id(&b_id).is_none());
        let survivor = out.entity_by_id(&a_id).unwrap();
        assert!(survivor.aliases.contains(&"Acme Corporation Inc".to_string()));
        assert_eq!(survivor.description, "Industrial conglomerate");
        assert!(survivor.source_urls.contains(&"https://b.example".to_string()));
        // The connection now points at the survivor.
        assert_eq!(out.connections[0].target_entity_id, a_id);
    }

    #[tokio::test]
    async fn test_low_confidence_pairs_rejected() {
        let (state, a_id, b_id) = state_with_near_duplicates();
        let entity_count = state.entities.len();
        let raw = format!(
            r#"{{"merge_pairs": [{{"entity_a_id": "{a_id}", "entity_b_id": "{b_id}", "confidence": 0.6}}]}}"#
        );
        let node = resolver(vec![Ok(raw)]);
        let out = node.execute(state).await.unwrap();
        assert_eq!(out.entities.len(), entity_count);
    }

    #[tokio::test]
    async fn test_skipped_below_five_entities() {
        let node = resolver(vec![Ok("{}".into())]);
        let mut state = InvestigationState::default();
        state.add_entity(Entity::new("Acme Corp", EntityType::Organization), None);
        state.add_entity(Entity::new("Acme Corp.", EntityType::Organization), None);
        let out = node.execute(state).await.unwrap();
        assert_eq!(out.total_llm_calls, 0);
    }
}
