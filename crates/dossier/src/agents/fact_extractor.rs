// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Fact extractor: turns raw web content into structured entities.
//!
//! Pending content is packed greedily into ≤6000-character batches; each
//! batch is one JSON-mode LLM call whose output goes through the repair
//! parser. Extracted entities dedup against state (optionally fuzzy),
//! connection endpoints resolve by name or are dropped, and key facts land in
//! the subject's known associations. The iteration yield is recorded even
//! when there was no content, so the diminishing-returns window keeps
//! advancing.

use crate::config::SourceAuthority;
use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask, ModelTier};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{
    ConfidenceScore, Connection, Entity, EntityType, InvestigationState, PendingContent,
    RelationshipType,
};
use crate::prompts::{self, truncate};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const BATCH_CHAR_LIMIT: usize = 6000;
const PROMPT_CONTENT_CAP: usize = 8000;

pub struct FactExtractor {
    gateway: Arc<LlmGateway>,
    source_authority: SourceAuthority,
    fuzzy_threshold: Option<f64>,
}

impl FactExtractor {
    pub fn new(
        gateway: Arc<LlmGateway>,
        source_authority: SourceAuthority,
        fuzzy_threshold: f64,
    ) -> Self {
        Self {
            gateway,
            source_authority,
            fuzzy_threshold: (fuzzy_threshold > 0.0).then_some(fuzzy_threshold),
        }
    }

    /// Pack items greedily into batches bounded by raw-content size.
    fn batch_content(content: &[PendingContent]) -> Vec<Vec<PendingContent>> {
        let mut batches = Vec::new();
        let mut batch: Vec<PendingContent> = Vec::new();
        let mut size = 0usize;
        for item in content {
            let item_size = item.text().len();
            if size + item_size > BATCH_CHAR_LIMIT && !batch.is_empty() {
                batches.push(std::mem::take(&mut batch));
                size = 0;
            }
            batch.push(item.clone());
            size += item_size;
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
        batches
    }

    fn format_known_entities(state: &InvestigationState) -> String {
        if state.entities.is_empty() {
            return "(None)".to_string();
        }
        state
            .entities
            .iter()
            .take(20)
            .map(|e| format!("- [{}] {}", e.entity_type.as_str(), e.name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Merge one parsed extraction into state.
    /// Returns (new_entities, new_connections, new_facts).
    fn merge_into_state(&self, state: &mut InvestigationState, data: &Value) -> (u32, u32, u32) {
        let mut ne = 0u32;
        let mut nc = 0u32;
        let mut nf = 0u32;
        let empty = Vec::new();

        for raw in data
            .get("entities")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if name.len() < 2 {
                continue;
            }
            let entity_type = raw
                .get("entity_type")
                .and_then(Value::as_str)
                .map(EntityType::parse_lenient)
                .unwrap_or_default();
            let source_url = raw
                .get("source_url")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let confidence = raw
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5);

            let mut entity = Entity::new(name, entity_type);
            entity.confidence = confidence;
            entity.first_seen_iteration = state.iteration;
            if !source_url.is_empty() {
                entity.source_urls.push(source_url.clone());
            }
            if let Some(attrs) = raw.get("attributes").and_then(Value::as_object) {
                for (k, v) in attrs {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    entity.attributes.insert(k.clone(), value);
                }
            }

            let authority = if source_url.is_empty() {
                0.5
            } else {
                let mut reference = crate::models::SourceReference::new(&source_url);
                reference.authority_score = self.source_authority.score_for(&reference.domain);
                reference.authority_score
            };
            entity.confidence_detail = Some(ConfidenceScore {
                source_authority: authority,
                corroboration_count: entity.source_urls.len() as u32,
                recency_score: 0.5,
                internal_consistency: confidence,
                extraction_clarity: confidence,
            });

            let (_, was_new) = state.add_entity(entity, self.fuzzy_threshold);
            if was_new {
                ne += 1;
            }
        }

        for raw in data
            .get("connections")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let src_name = raw.get("source").and_then(Value::as_str).unwrap_or("");
            let tgt_name = raw.get("target").and_then(Value::as_str).unwrap_or("");
            let src_id = self.resolve_entity_id(state, src_name);
            let tgt_id = self.resolve_entity_id(state, tgt_name);
            let (Some(src_id), Some(tgt_id)) = (src_id, tgt_id) else {
                continue;
            };
            let relationship = raw
                .get("relationship")
                .and_then(Value::as_str)
                .map(RelationshipType::parse_lenient)
                .unwrap_or_default();
            let mut conn = Connection::new(src_id, tgt_id, relationship);
            conn.description = raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            conn.confidence = raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
            if let Some(urls) = raw.get("source_urls").and_then(Value::as_array) {
                conn.source_urls = urls
                    .iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect();
            }
            state.add_connection(conn);
            nc += 1;
        }

        for fact in data
            .get("key_facts")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let claim = fact.get("claim").and_then(Value::as_str).unwrap_or("");
            if !claim.is_empty() && !state.subject.known_associations.iter().any(|a| a == claim) {
                state.subject.known_associations.push(claim.to_string());
                nf += 1;
            }
        }

        (ne, nc, nf)
    }

    fn resolve_entity_id(&self, state: &InvestigationState, name: &str) -> Option<String> {
        if let Some(e) = state.find_entity_by_name(name) {
            return Some(e.id.clone());
        }
        self.fuzzy_threshold
            .and_then(|t| state.find_entity_by_name_fuzzy(name, t))
            .map(|e| e.id.clone())
    }
}

#[async_trait]
impl Node<InvestigationState> for FactExtractor {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.pending_content.is_empty() {
            tracing::info!("fact_extraction_no_content");
            state.record_iteration_yield(0, 0);
            return Ok(state);
        }

        let batches = Self::batch_content(&state.pending_content);
        let known = Self::format_known_entities(&state);
        let num_batches = batches.len();
        let (mut total_ne, mut total_nc, mut total_nf) = (0u32, 0u32, 0u32);

        tracing::info!(
            iteration = state.iteration,
            phase = state.current_phase.as_str(),
            num_results = state.pending_content.len(),
            num_batches,
            model = self.gateway.tier_model_name(ModelTier::Fast),
            reasoning_model = self.gateway.tier_is_reasoning(ModelTier::Fast),
            "fact_extraction_started"
        );

        for (batch_idx, batch) in batches.iter().enumerate() {
            let content_str = batch
                .iter()
                .map(|item| {
                    format!("Source: {}\nTitle: {}\n{}", item.url, item.title, item.text())
                })
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            let user_prompt = prompts::fact_extractor_user(
                &state.subject.full_name,
                &batch.first().map(|i| i.query.clone()).unwrap_or_default(),
                &truncate(&content_str, PROMPT_CONTENT_CAP),
                &known,
            );

            match self
                .gateway
                .generate_for_task(
                    ModelTask::FactExtraction,
                    prompts::FACT_EXTRACTOR_SYSTEM,
                    &user_prompt,
                    GenerateParams {
                        json_mode: true,
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(raw) => {
                    state.total_llm_calls += 1;
                    // Parse failures are empty extractions, not errors.
                    let extraction = json_repair::parse_lenient(&raw).unwrap_or_else(
                        || serde_json::json!({"entities": [], "connections": [], "key_facts": []}),
                    );
                    let (ne, nc, nf) = self.merge_into_state(&mut state, &extraction);
                    total_ne += ne;
                    total_nc += nc;
                    total_nf += nf;
                    tracing::debug!(
                        batch = format!("{}/{num_batches}", batch_idx + 1),
                        new_entities = ne,
                        new_connections = nc,
                        new_facts = nf,
                        "fact_extraction_batch_done"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        batch = format!("{}/{num_batches}", batch_idx + 1),
                        error = %e,
                        "fact_extraction_error"
                    );
                    state
                        .error_log
                        .push(format!("Fact extraction batch {}/{num_batches}: {e}", batch_idx + 1));
                }
            }
        }

        state.pending_content.clear();
        state.record_iteration_yield(total_ne, total_nf);
        tracing::info!(
            iteration = state.iteration,
            num_batches,
            new_entities = total_ne,
            new_connections = total_nc,
            new_facts = total_nf,
            "fact_extraction_done"
        );
        Ok(state)
    }

    fn name(&self) -> String {
        "fact_extraction".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;

    fn extractor_with(script: Vec<Result<String>>, fuzzy: f64) -> FactExtractor {
        let gateway = Arc::new(
            LlmGateway::builder()
                .fast_model(Provider::Openai, Arc::new(MockChatModel::new("m", script)))
                .build(),
        );
        FactExtractor::new(gateway, SourceAuthority::default(), fuzzy)
    }

    fn pending(url: &str, text: &str) -> PendingContent {
        PendingContent {
            url: url.into(),
            title: "T".into(),
            snippet: "s".into(),
            domain: String::new(),
            raw_content: Some(text.into()),
            query: "q".into(),
        }
    }

    #[tokio::test]
    async fn test_no_content_still_records_yield() {
        let extractor = extractor_with(vec![], 0.0);
        let state = InvestigationState::default();
        let out = extractor.execute(state).await.unwrap();
        assert_eq!(out.entities_added_per_iteration, vec![0]);
        assert_eq!(out.facts_added_per_iteration, vec![0]);
    }

    #[tokio::test]
    async fn test_extraction_merges_entities_connections_facts() {
        let raw = r#"{
            "entities": [
                {"name": "Jane Doe", "entity_type": "person", "confidence": 0.9, "source_url": "https://www.sec.gov/item", "attributes": {"role": "CEO"}},
                {"name": "Acme Corp", "entity_type": "organization", "confidence": 0.8, "source_url": "https://acme.example"}
            ],
            "connections": [
                {"source": "Jane Doe", "target": "Acme Corp", "relationship": "WORKS_AT", "confidence": 0.85}
            ],
            "key_facts": [
                {"claim": "Jane Doe founded Acme in 2001", "source_url": "https://acme.example"}
            ]
        }"#;
        let extractor = extractor_with(vec![Ok(raw.into())], 0.0);
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.pending_content.push(pending("https://acme.example", "body"));
        let out = extractor.execute(state).await.unwrap();

        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.connections.len(), 1);
        assert_eq!(out.connections[0].relationship_type, RelationshipType::WorksAt);
        assert_eq!(out.subject.known_associations.len(), 1);
        assert_eq!(out.entities_added_per_iteration, vec![2]);
        assert_eq!(out.facts_added_per_iteration, vec![1]);
        assert!(out.pending_content.is_empty());
        // SEC source gets high authority in the confidence detail.
        let jane = out.find_entity_by_name("Jane Doe").unwrap();
        let detail = jane.confidence_detail.as_ref().unwrap();
        assert!((detail.source_authority - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unresolved_connection_endpoints_are_dropped() {
        let raw = r#"{
            "entities": [{"name": "Jane Doe", "entity_type": "person"}],
            "connections": [{"source": "Jane Doe", "target": "Ghost LLC", "relationship": "FOUNDED"}],
            "key_facts": []
        }"#;
        let extractor = extractor_with(vec![Ok(raw.into())], 0.0);
        let mut state = InvestigationState::default();
        state.pending_content.push(pending("https://x.example", "body"));
        let out = extractor.execute(state).await.unwrap();
        assert!(out.connections.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_output_is_empty_extraction_not_error() {
        let extractor = extractor_with(vec![Ok("utterly not json".into())], 0.0);
        let mut state = InvestigationState::default();
        state.pending_content.push(pending("https://x.example", "body"));
        let out = extractor.execute(state).await.unwrap();
        assert!(out.entities.is_empty());
        assert!(out.error_log.is_empty());
        assert_eq!(out.entities_added_per_iteration, vec![0]);
    }

    #[tokio::test]
    async fn test_llm_error_logged_and_yield_recorded() {
        let extractor = extractor_with(
            vec![Err(crate::error::Error::invalid_input("400 bad request"))],
            0.0,
        );
        let mut state = InvestigationState::default();
        state.pending_content.push(pending("https://x.example", "body"));
        let out = extractor.execute(state).await.unwrap();
        assert_eq!(out.error_log.len(), 1);
        assert!(out.error_log[0].contains("Fact extraction batch 1/1"));
        assert_eq!(out.entities_added_per_iteration, vec![0]);
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_dedups_extracted_entities() {
        let raw = r#"{"entities": [{"name": "J.P. Morgan Chase", "entity_type": "organization"}], "connections": [], "key_facts": []}"#;
        let extractor = extractor_with(vec![Ok(raw.into())], 0.85);
        let mut state = InvestigationState::default();
        state.add_entity(
            Entity::new("JP Morgan Chase", EntityType::Organization),
            None,
        );
        state.pending_content.push(pending("https://x.example", "body"));
        let out = extractor.execute(state).await.unwrap();
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities_added_per_iteration, vec![0]);
    }

    #[test]
    fn test_batching_respects_char_limit() {
        let items: Vec<PendingContent> = (0..5)
            .map(|i| pending(&format!("https://x{i}.example"), &"a".repeat(2500)))
            .collect();
        let batches = FactExtractor::batch_content(&items);
        // 2500 chars each, 6000 limit → two per batch.
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn test_oversized_single_item_gets_own_batch() {
        let items = vec![
            pending("https://big.example", &"a".repeat(9000)),
            pending("https://small.example", "tiny"),
        ];
        let batches = FactExtractor::batch_content(&items);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
    }
}
