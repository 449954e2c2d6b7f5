//! # Neo4j Identity Graph
//!
//! Persists investigation results as a queryable identity graph: entity
//! nodes labelled by type, a `RiskFlag` node label, and directed edges from
//! the closed relationship vocabulary.
//!
//! Cypher cannot parameterize labels or relationship types, so both are
//! *allowlisted*: anything off-list maps to `Entity` / `RELATED_TO` before
//! interpolation. Every value goes through query parameters.

mod discovery;

pub use discovery::DISCOVERY_QUERIES;

use async_trait::async_trait;
use chrono::Utc;
use dossier::config::GraphConfig;
use dossier::error::{Error, Result};
use dossier::graph_store::{IdentityGraphStore, PersistCounts};
use dossier::models::{EntityType, GraphInsight, InvestigationState};
use neo4rs::{query, Graph};
use parking_lot::Mutex;

/// Allowlisted node labels (Cypher does not support parameterized labels).
pub const VALID_NODE_LABELS: [&str; 8] = [
    "Person",
    "Organization",
    "Location",
    "Event",
    "Document",
    "FinancialInstrument",
    "Entity",
    "RiskFlag",
];

/// Allowlisted relationship types: the closed vocabulary plus the structural
/// edges this store adds itself.
pub const VALID_REL_TYPES: [&str; 17] = [
    "WORKS_AT",
    "BOARD_MEMBER_OF",
    "FOUNDED",
    "INVESTED_IN",
    "SUBSIDIARY_OF",
    "RELATED_TO",
    "KNOWS",
    "FAMILY_OF",
    "SUED_BY",
    "REGULATED_BY",
    "MENTIONED_IN",
    "PARTNER_OF",
    "ADVISOR_TO",
    "DONOR_TO",
    "PREVIOUSLY_AT",
    "LOCATED_AT",
    "FLAGGED_FOR",
];

/// Return the label if allowlisted, else `Entity`.
pub fn safe_label(label: &str) -> &str {
    if VALID_NODE_LABELS.contains(&label) {
        label
    } else {
        "Entity"
    }
}

/// Return the relationship type if allowlisted, else `RELATED_TO`.
pub fn safe_rel_type(rel: &str) -> &str {
    if VALID_REL_TYPES.contains(&rel) {
        rel
    } else {
        "RELATED_TO"
    }
}

pub fn entity_type_to_label(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Person => "Person",
        EntityType::Organization => "Organization",
        EntityType::Location => "Location",
        EntityType::Event => "Event",
        EntityType::Document => "Document",
        EntityType::FinancialInstrument => "FinancialInstrument",
    }
}

/// Stable investigation id derived from the subject name, for provenance.
pub fn investigation_id(subject_name: &str) -> String {
    let cleaned: String = subject_name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let id = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let id = if id.is_empty() { "run".to_string() } else { id };
    id.chars().take(64).collect()
}

/// Neo4j-backed identity graph store.
pub struct Neo4jStore {
    config: GraphConfig,
    graph: Mutex<Option<std::sync::Arc<Graph>>>,
}

impl Neo4jStore {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            graph: Mutex::new(None),
        }
    }

    fn graph(&self) -> Result<std::sync::Arc<Graph>> {
        self.graph
            .lock()
            .clone()
            .ok_or_else(|| Error::tool_error("Neo4j driver is not connected"))
    }

    async fn ensure_constraints(&self, graph: &Graph) {
        let constraints = [
            "CREATE CONSTRAINT IF NOT EXISTS FOR (p:Person) REQUIRE p.entity_id IS UNIQUE",
            "CREATE CONSTRAINT IF NOT EXISTS FOR (o:Organization) REQUIRE o.entity_id IS UNIQUE",
            "CREATE CONSTRAINT IF NOT EXISTS FOR (e:Event) REQUIRE e.entity_id IS UNIQUE",
            "CREATE CONSTRAINT IF NOT EXISTS FOR (r:RiskFlag) REQUIRE r.flag_id IS UNIQUE",
        ];
        let indexes = [
            "CREATE INDEX IF NOT EXISTS FOR (p:Person) ON (p.name)",
            "CREATE INDEX IF NOT EXISTS FOR (o:Organization) ON (o.name)",
            "CREATE INDEX IF NOT EXISTS FOR (l:Location) ON (l.name)",
            "CREATE INDEX IF NOT EXISTS FOR (rf:RiskFlag) ON (rf.severity)",
            "CREATE INDEX IF NOT EXISTS FOR (p:Person) ON (p.investigation_id)",
            "CREATE INDEX IF NOT EXISTS FOR (o:Organization) ON (o.investigation_id)",
        ];
        for cypher in constraints.iter().chain(indexes.iter()) {
            if let Err(e) = graph.run(query(cypher)).await {
                tracing::debug!(cypher, error = %e, "schema_statement_skipped");
            }
        }
    }
}

#[async_trait]
impl IdentityGraphStore for Neo4jStore {
    async fn connect(&self) -> Result<()> {
        if self.graph.lock().is_some() {
            return Ok(());
        }
        let graph = Graph::new(
            &self.config.uri,
            &self.config.username,
            &self.config.password,
        )
        .await
        .map_err(|e| Error::tool_error(format!("Failed to connect to Neo4j: {e}")))?;
        tracing::info!(uri = %self.config.uri, "neo4j_connected");
        *self.graph.lock() = Some(std::sync::Arc::new(graph));
        Ok(())
    }

    async fn close(&self) {
        *self.graph.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.graph.lock().is_some()
    }

    async fn clear(&self) -> Result<()> {
        let graph = self.graph()?;
        graph
            .run(query("MATCH (n) DETACH DELETE n"))
            .await
            .map_err(|e| Error::tool_error(format!("Neo4j clear failed: {e}")))?;
        tracing::info!("neo4j_graph_cleared");
        Ok(())
    }

    async fn persist(&self, state: &InvestigationState) -> Result<PersistCounts> {
        let graph = self.graph()?;
        self.ensure_constraints(&graph).await;

        let inv_id = investigation_id(&state.subject.full_name);
        let updated_at = Utc::now().to_rfc3339();
        let mut counts = PersistCounts::default();

        for entity in &state.entities {
            let label = safe_label(entity_type_to_label(entity.entity_type));
            // Label is allowlisted; every value is a parameter. Dynamic
            // attribute keys never reach Cypher; the map is stored as JSON,
            // with `location` lifted out because discovery queries match it.
            let cypher = format!(
                "MERGE (n:{label} {{entity_id: $entity_id}}) \
                 SET n.name = $name, n.entity_type = $entity_type, n.confidence = $confidence, \
                     n.description = $description, n.aliases = $aliases, n.source_urls = $source_urls, \
                     n.attributes_json = $attributes_json, n.location = $location, \
                     n.investigation_id = $inv_id, n.updated_at = $updated_at"
            );
            let attributes_json =
                serde_json::to_string(&entity.attributes).unwrap_or_else(|_| "{}".to_string());
            graph
                .run(
                    query(&cypher)
                        .param("entity_id", entity.id.clone())
                        .param("name", entity.name.clone())
                        .param("entity_type", entity.entity_type.as_str())
                        .param("confidence", entity.confidence)
                        .param("description", entity.description.clone())
                        .param("aliases", entity.aliases.clone())
                        .param("source_urls", entity.source_urls.clone())
                        .param("attributes_json", attributes_json)
                        .param(
                            "location",
                            entity.attributes.get("location").cloned().unwrap_or_default(),
                        )
                        .param("inv_id", inv_id.clone())
                        .param("updated_at", updated_at.clone()),
                )
                .await
                .map_err(|e| Error::tool_error(format!("Neo4j entity upsert failed: {e}")))?;
            counts.nodes += 1;
        }

        for conn in &state.connections {
            let (Some(src), Some(tgt)) = (
                state.entity_by_id(&conn.source_entity_id),
                state.entity_by_id(&conn.target_entity_id),
            ) else {
                continue;
            };
            let src_label = safe_label(entity_type_to_label(src.entity_type));
            let tgt_label = safe_label(entity_type_to_label(tgt.entity_type));
            let rel_type = safe_rel_type(conn.relationship_type.as_str());
            let cypher = format!(
                "MATCH (a:{src_label} {{entity_id: $src_id}}) \
                 MATCH (b:{tgt_label} {{entity_id: $tgt_id}}) \
                 MERGE (a)-[r:{rel_type}]->(b) \
                 SET r.description = $description, r.confidence = $confidence, \
                     r.source_urls = $source_urls, r.extraction_timestamp = $ts, \
                     r.source_url_primary = $primary_url, r.start_date = $start_date, \
                     r.end_date = $end_date, r.investigation_id = $inv_id"
            );
            graph
                .run(
                    query(&cypher)
                        .param("src_id", conn.source_entity_id.clone())
                        .param("tgt_id", conn.target_entity_id.clone())
                        .param("description", conn.description.clone())
                        .param("confidence", conn.confidence)
                        .param("source_urls", conn.source_urls.clone())
                        .param("ts", updated_at.clone())
                        .param(
                            "primary_url",
                            conn.source_urls.first().cloned().unwrap_or_default(),
                        )
                        .param("start_date", conn.start_date.clone().unwrap_or_default())
                        .param("end_date", conn.end_date.clone().unwrap_or_default())
                        .param("inv_id", inv_id.clone()),
                )
                .await
                .map_err(|e| Error::tool_error(format!("Neo4j connection upsert failed: {e}")))?;
            counts.relationships += 1;
        }

        for flag in &state.risk_flags {
            graph
                .run(
                    query(
                        "MERGE (r:RiskFlag {flag_id: $flag_id}) \
                         SET r.category = $category, r.severity = $severity, r.title = $title, \
                             r.description = $description, r.confidence = $confidence, \
                             r.evidence = $evidence, r.investigation_id = $inv_id",
                    )
                    .param("flag_id", flag.id.clone())
                    .param("category", flag.category.as_str())
                    .param("severity", flag.severity.as_str())
                    .param("title", flag.title.clone())
                    .param("description", flag.description.clone())
                    .param("confidence", flag.confidence)
                    .param("evidence", flag.evidence.clone())
                    .param("inv_id", inv_id.clone()),
                )
                .await
                .map_err(|e| Error::tool_error(format!("Neo4j flag upsert failed: {e}")))?;
            counts.nodes += 1;

            for entity_id in &flag.entity_ids {
                let Some(entity) = state.entity_by_id(entity_id) else {
                    continue;
                };
                let label = safe_label(entity_type_to_label(entity.entity_type));
                let cypher = format!(
                    "MATCH (r:RiskFlag {{flag_id: $flag_id}}) \
                     MATCH (e:{label} {{entity_id: $entity_id}}) \
                     MERGE (r)-[:FLAGGED_FOR]->(e)"
                );
                graph
                    .run(
                        query(&cypher)
                            .param("flag_id", flag.id.clone())
                            .param("entity_id", entity_id.clone()),
                    )
                    .await
                    .map_err(|e| Error::tool_error(format!("Neo4j flag link failed: {e}")))?;
                counts.relationships += 1;
            }
        }

        tracing::info!(
            nodes = counts.nodes,
            relationships = counts.relationships,
            "neo4j_persist_complete"
        );
        Ok(counts)
    }

    async fn discover(&self, subject_name: &str) -> Result<Vec<GraphInsight>> {
        let graph = self.graph()?;
        let mut insights = Vec::new();

        for spec in DISCOVERY_QUERIES {
            let q = query(spec.cypher).param("subject_name", subject_name);
            let mut stream = match graph.execute(q).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(query = spec.name, error = %e, "graph_discovery_query_failed");
                    continue;
                }
            };
            let mut results = Vec::new();
            loop {
                match stream.next().await {
                    Ok(Some(row)) => results.push(discovery::row_to_json(&row, spec.columns)),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(query = spec.name, error = %e, "graph_discovery_row_failed");
                        break;
                    }
                }
            }
            if results.is_empty() {
                tracing::debug!(query = spec.name, "graph_insight_empty");
                continue;
            }
            tracing::info!(query = spec.name, result_count = results.len(), "graph_insight_found");
            insights.push(GraphInsight {
                query_name: spec.name.to_string(),
                description: spec.description.to_string(),
                insight_type: spec.insight_type.to_string(),
                result_count: results.len(),
                results,
            });
        }

        Ok(insights)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Allowlist tests
    // ============================================================

    #[test]
    fn test_safe_label_passes_allowlisted() {
        for label in VALID_NODE_LABELS {
            assert_eq!(safe_label(label), label);
        }
    }

    #[test]
    fn test_safe_label_rejects_unknown() {
        assert_eq!(safe_label("Admin"), "Entity");
        assert_eq!(safe_label("Person) DETACH DELETE (n"), "Entity");
        assert_eq!(safe_label(""), "Entity");
    }

    #[test]
    fn test_safe_rel_type_passes_allowlisted() {
        for rel in VALID_REL_TYPES {
            assert_eq!(safe_rel_type(rel), rel);
        }
    }

    #[test]
    fn test_safe_rel_type_rejects_unknown() {
        assert_eq!(safe_rel_type("OWNS"), "RELATED_TO");
        assert_eq!(safe_rel_type("]->(x) DELETE x//"), "RELATED_TO");
    }

    #[test]
    fn test_entity_type_label_mapping() {
        assert_eq!(entity_type_to_label(EntityType::Person), "Person");
        assert_eq!(
            entity_type_to_label(EntityType::FinancialInstrument),
            "FinancialInstrument"
        );
        // Every mapped label must itself be allowlisted.
        for et in [
            EntityType::Person,
            EntityType::Organization,
            EntityType::Location,
            EntityType::Event,
            EntityType::Document,
            EntityType::FinancialInstrument,
        ] {
            let label = entity_type_to_label(et);
            assert_eq!(safe_label(label), label);
        }
    }

    // ============================================================
    // Investigation id derivation
    // ============================================================

    #[test]
    fn test_investigation_id_normalizes() {
        assert_eq!(investigation_id("Jensen Huang"), "jensen_huang");
        assert_eq!(investigation_id("  J. P. Morgan  "), "j_p_morgan");
        assert_eq!(investigation_id("!!!"), "run");
    }

    #[test]
    fn test_investigation_id_capped_at_64() {
        let long = "a".repeat(200);
        assert_eq!(investigation_id(&long).len(), 64);
    }

    // ============================================================
    // Cypher format tests (offline; integration needs a live server)
    // ============================================================

    #[test]
    fn test_entity_upsert_cypher_shape() {
        let label = safe_label("Person");
        let cypher = format!("MERGE (n:{label} {{entity_id: $entity_id}}) SET n.name = $name");
        assert!(cypher.contains("MERGE (n:Person {entity_id: $entity_id})"));
        assert!(!cypher.contains("DELETE"));
    }

    #[test]
    fn test_discovery_queries_are_parameterized() {
        for spec in DISCOVERY_QUERIES {
            // No string interpolation markers; subject enters via $subject_name.
            assert!(!spec.cypher.contains("{}"), "query {} interpolates", spec.name);
            if spec.cypher.contains("subject_name") {
                assert!(spec.cypher.contains("$subject_name"));
            }
        }
    }

    #[test]
    fn test_discovery_query_inventory() {
        let names: Vec<&str> = DISCOVERY_QUERIES.iter().map(|q| q.name).collect();
        assert_eq!(
            names,
            vec![
                "hidden_intermediaries",
                "shared_locations",
                "risk_proximity",
                "hub_entities",
                "temporal_overlap",
                "isolated_clusters"
            ]
        );
    }
}
