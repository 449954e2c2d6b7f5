//! Pre-built discovery queries, run automatically after graph population.
//!
//! Schema: entity nodes use `entity_id` and `name`; `RiskFlag` uses
//! `flag_id` and a lowercase `severity`. Only the subject name enters as a
//! parameter; labels in these queries are fixed allowlisted literals.

use neo4rs::Row;
use serde_json::{json, Value};

/// One discovery query and the columns its rows return.
pub struct DiscoveryQuery {
    pub name: &'static str,
    pub description: &'static str,
    pub insight_type: &'static str,
    pub cypher: &'static str,
    pub columns: &'static [&'static str],
}

pub const DISCOVERY_QUERIES: &[DiscoveryQuery] = &[
    DiscoveryQuery {
        name: "hidden_intermediaries",
        description: "Entities connected to subject through 2+ independent paths",
        insight_type: "hidden_connection",
        cypher: "MATCH (s:Person) WHERE s.name = $subject_name \
                 MATCH (s)-[*1..2]-(intermediate) \
                 WHERE intermediate <> s AND NOT intermediate:RiskFlag \
                 WITH intermediate, count(*) AS path_count \
                 WHERE path_count >= 2 \
                 RETURN intermediate.name AS entity, labels(intermediate)[0] AS type, \
                        path_count AS connection_strength \
                 ORDER BY connection_strength DESC LIMIT 10",
        columns: &["entity", "type", "connection_strength"],
    },
    DiscoveryQuery {
        name: "shared_locations",
        description: "Organizations sharing a location (shell company indicator)",
        insight_type: "shell_company_indicator",
        cypher: "MATCH (o1:Organization) MATCH (o2:Organization) \
                 WHERE o1 <> o2 AND o1.location IS NOT NULL \
                   AND o1.location = o2.location AND o1.location <> '' \
                 RETURN o1.name AS org1, o2.name AS org2, o1.location AS shared_location \
                 LIMIT 20",
        columns: &["org1", "org2", "shared_location"],
    },
    DiscoveryQuery {
        name: "risk_proximity",
        description: "Shortest path from subject to any high-severity risk flag",
        insight_type: "risk_proximity",
        cypher: "MATCH (s:Person) WHERE s.name = $subject_name \
                 MATCH (rf:RiskFlag) WHERE rf.severity IN ['high', 'critical'] \
                 MATCH p = shortestPath((s)-[*..4]-(rf)) \
                 RETURN rf.title AS risk, rf.severity AS severity, length(p) AS hops, \
                        [n IN nodes(p) | coalesce(n.name, n.title, '')] AS path_names \
                 ORDER BY hops LIMIT 10",
        columns: &["risk", "severity", "hops", "path_names"],
    },
    DiscoveryQuery {
        name: "hub_entities",
        description: "Most connected entities (potential key facilitators)",
        insight_type: "hub_entity",
        cypher: "MATCH (n)-[r]-() WHERE NOT n:RiskFlag \
                 WITH n, count(r) AS degree, labels(n)[0] AS type \
                 WHERE degree >= 3 \
                 RETURN n.name AS entity, type, degree \
                 ORDER BY degree DESC LIMIT 10",
        columns: &["entity", "type", "degree"],
    },
    DiscoveryQuery {
        name: "temporal_overlap",
        description: "Organizations with overlapping active periods and shared personnel",
        insight_type: "temporal_overlap",
        cypher: "MATCH (p:Person)-[r1]->(o1:Organization) \
                 MATCH (p)-[r2]->(o2:Organization) \
                 WHERE o1 <> o2 AND r1.start_date IS NOT NULL AND r1.start_date <> '' \
                   AND r2.start_date IS NOT NULL AND r2.start_date <> '' \
                 RETURN p.name AS person, o1.name AS org1, r1.start_date AS org1_start, \
                        r1.end_date AS org1_end, o2.name AS org2, r2.start_date AS org2_start, \
                        r2.end_date AS org2_end \
                 LIMIT 20",
        columns: &[
            "person",
            "org1",
            "org1_start",
            "org1_end",
            "org2",
            "org2_start",
            "org2_end",
        ],
    },
    DiscoveryQuery {
        name: "isolated_clusters",
        description: "Entity clusters disconnected from the main subject graph",
        insight_type: "isolated_entity",
        cypher: "MATCH (s:Person) WHERE s.name = $subject_name \
                 MATCH (n) WHERE NOT n:RiskFlag AND n <> s \
                   AND NOT exists((s)-[*1..4]-(n)) \
                 RETURN n.name AS entity, labels(n)[0] AS type \
                 LIMIT 10",
        columns: &["entity", "type"],
    },
];

/// Convert one row into JSON using the query's known column list. Bolt has
/// no runtime column introspection on rows here, so each value is probed by
/// type, most specific first.
pub fn row_to_json(row: &Row, columns: &[&str]) -> Value {
    let mut map = serde_json::Map::new();
    for col in columns {
        let value = if let Ok(v) = row.get::<String>(col) {
            json!(v)
        } else if let Ok(v) = row.get::<i64>(col) {
            json!(v)
        } else if let Ok(v) = row.get::<f64>(col) {
            json!(v)
        } else if let Ok(v) = row.get::<Vec<String>>(col) {
            json!(v)
        } else if let Ok(v) = row.get::<bool>(col) {
            json!(v)
        } else {
            Value::Null
        };
        map.insert((*col).to_string(), value);
    }
    Value::Object(map)
}
