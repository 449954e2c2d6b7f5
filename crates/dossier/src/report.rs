// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Report template rendering.
//!
//! The report generator asks the LLM for a narrative, then renders the final
//! markdown through a Tera template so every report carries the required
//! section structure regardless of what the model produced. If rendering
//! fails the narrative is used as-is.

use crate::models::{InvestigationState, RiskSeverity};
use serde_json::json;
use std::collections::HashMap;

const REPORT_TEMPLATE: &str = r#"# Due Diligence Report: {{ subject_name }}

**Generated:** {{ generated }} | **Investigation ID:** {{ investigation_id }} | **Iterations:** {{ iterations }}

## Executive Summary

**OVERALL RISK RATING: {{ overall_rating }}**

| Metric | Value |
|---|---|
| Facts Extracted | {{ facts_count }} |
| Entities Discovered | {{ entities_count }} |
| Connections Mapped | {{ connections_count }} |
| Risk Flags | {{ flags_count }} |
| Search Iterations | {{ iterations }} |
| Overall Confidence | {{ overall_confidence }} |

{% if top_flags %}Most significant findings:
{% for flag in top_flags %}- **[{{ flag.severity | upper }}]** {{ flag.title }}
{% endfor %}{% else %}No risk flags were raised during this investigation.
{% endif %}

## Subject Profile

- **Full Name:** {{ subject_name }}
- **Current Role:** {{ subject_role }}
- **Current Organization:** {{ subject_org }}
{% if subject_aliases %}- **Known Aliases:** {{ subject_aliases | join(sep=", ") }}
{% endif %}{% if subject_summary %}
{{ subject_summary }}
{% endif %}
{% if known_associations %}Key associations on record:
{% for assoc in known_associations %}- {{ assoc }}
{% endfor %}{% endif %}

## Organizational Connections

{% if connections %}{% for conn in connections %}- **{{ conn.source_name }}** -[{{ conn.relationship }}]-> **{{ conn.target_name }}** (confidence {{ conn.confidence }}){% if conn.description %}: {{ conn.description }}{% endif %}{% if conn.primary_source %} [Source]({{ conn.primary_source }}){% endif %}
{% endfor %}{% else %}No connections were mapped.
{% endif %}

## Risk Assessment

{% if severity_groups %}{% for group in severity_groups %}### {{ group.label }}

{% for flag in group.flags %}- **{{ flag.title }}** ({{ flag.category }}, confidence {{ flag.confidence }})
  {{ flag.description }}
{% if flag.evidence %}{% for url in flag.evidence %}  - Evidence: {{ url }}
{% endfor %}{% endif %}{% if flag.mitigating_factors %}{% for m in flag.mitigating_factors %}  - Mitigating: {{ m }}
{% endfor %}{% endif %}{% endfor %}
{% endfor %}{% else %}No risks flagged.
{% endif %}
{% if contradictions %}**Integrity Alerts**: temporal contradictions detected:
{% for c in contradictions %}- [{{ c.severity }}] {{ c.description }}
{% endfor %}{% endif %}

## Key Findings

{% if graph_insights %}{% for insight in graph_insights %}### {{ insight.description }}
{% for row in insight.rows %}- {{ row }}
{% endfor %}
{% endfor %}{% endif %}
{{ narrative }}

## Investigation Timeline

{% if timeline %}| Period | Category | Event | Confidence |
|---|---|---|---|
{% for fact in timeline %}| {{ fact.period }} | {{ fact.category }} | {{ fact.claim }} | {{ fact.confidence }} |
{% endfor %}{% else %}No dated events were established.
{% endif %}

## Confidence Assessment

- **Overall confidence:** {{ overall_confidence }}
- **Sources consulted:** {{ sources_accessed }}
- **Sources identified but not retrievable:** {{ sources_failed }}
{% if inaccessible %}{% for u in inaccessible %}  - {{ u.url }} ({{ u.reason }})
{% endfor %}{% endif %}

## Recommendations

{{ recommendations }}
"#;

/// Renders investigation reports through the embedded template.
pub struct TemplateRenderer {
    tera: Option<tera::Tera>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut tera = tera::Tera::default();
        let tera = match tera.add_raw_template("report.md", REPORT_TEMPLATE) {
            Ok(()) => Some(tera),
            Err(e) => {
                tracing::warn!(error = %e, "report_template_compile_failed");
                None
            }
        };
        Self { tera }
    }

    /// Render the structured report. Empty string means "fall back to the
    /// raw narrative".
    pub fn render_report(&self, state: &InvestigationState, llm_narrative: &str) -> String {
        let Some(tera) = &self.tera else {
            return String::new();
        };
        let context = match tera::Context::from_serialize(build_context(state, llm_narrative)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "report_context_failed");
                return String::new();
            }
        };
        match tera.render("report.md", &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, "report_render_failed");
                String::new()
            }
        }
    }
}

/// Highest flag severity drives the executive rating.
pub fn overall_rating(state: &InvestigationState) -> &'static str {
    match state.risk_flags.iter().map(|f| f.severity).max() {
        Some(RiskSeverity::Critical) => "CRITICAL",
        Some(RiskSeverity::High) => "HIGH",
        Some(RiskSeverity::Medium) => "ELEVATED",
        Some(RiskSeverity::Low) | Some(RiskSeverity::Info) | None => "LOW",
    }
}

fn build_context(state: &InvestigationState, narrative: &str) -> serde_json::Value {
    let entity_names: HashMap<&str, &str> = state
        .entities
        .iter()
        .map(|e| (e.id.as_str(), e.name.as_str()))
        .collect();

    let connections: Vec<serde_json::Value> = state
        .connections
        .iter()
        .map(|c| {
            json!({
                "source_name": entity_names.get(c.source_entity_id.as_str()).unwrap_or(&"Unknown Entity"),
                "target_name": entity_names.get(c.target_entity_id.as_str()).unwrap_or(&"Unknown Entity"),
                "relationship": c.relationship_type.as_str(),
                "confidence": format!("{:.2}", c.confidence),
                "description": c.description,
                "primary_source": c.source_urls.first().cloned().unwrap_or_default(),
            })
        })
        .collect();

    let severity_order = [
        (RiskSeverity::Critical, "Critical (5/5)"),
        (RiskSeverity::High, "High (4/5)"),
        (RiskSeverity::Medium, "Elevated (3/5)"),
        (RiskSeverity::Low, "Low (2/5)"),
        (RiskSeverity::Info, "Informational (1/5)"),
    ];
    let severity_groups: Vec<serde_json::Value> = severity_order
        .iter()
        .filter_map(|(severity, label)| {
            let flags: Vec<serde_json::Value> = state
                .risk_flags
                .iter()
                .filter(|f| f.severity == *severity)
                .map(|f| {
                    json!({
                        "title": f.title,
                        "category": f.category.as_str(),
                        "confidence": format!("{:.2}", f.confidence),
                        "description": f.description,
                        "evidence": f.evidence,
                        "mitigating_factors": f.mitigating_factors,
                    })
                })
                .collect();
            if flags.is_empty() {
                None
            } else {
                Some(json!({"label": label, "flags": flags}))
            }
        })
        .collect();

    let mut sorted_facts = state.temporal_facts.clone();
    sorted_facts.sort_by(|a, b| a.date_range.0.cmp(&b.date_range.0));
    let timeline: Vec<serde_json::Value> = sorted_facts
        .iter()
        .map(|tf| {
            let start = tf.date_range.0.as_deref().unwrap_or("?");
            let end = tf.date_range.1.as_deref().unwrap_or("present");
            json!({
                "period": format!("{start} – {end}"),
                "category": tf.category,
                "claim": tf.claim,
                "confidence": format!("{:.2}", tf.confidence),
            })
        })
        .collect();

    let graph_insights: Vec<serde_json::Value> = state
        .graph_insights
        .iter()
        .map(|insight| {
            let rows: Vec<String> = insight
                .results
                .iter()
                .take(15)
                .map(|r| r.to_string())
                .collect();
            json!({"description": insight.description, "rows": rows})
        })
        .collect();

    let mut top_flags: Vec<&crate::models::RiskFlag> = state.risk_flags.iter().collect();
    top_flags.sort_by_key(|f| std::cmp::Reverse(f.severity));
    let top_flags: Vec<serde_json::Value> = top_flags
        .iter()
        .take(5)
        .map(|f| json!({"severity": f.severity.as_str(), "title": f.title}))
        .collect();

    let rating = overall_rating(state);
    let recommendations = match rating {
        "CRITICAL" => {
            "Do not engage pending resolution of critical findings. Escalate to legal and compliance review; independently verify all critical evidence."
        }
        "HIGH" => {
            "Proceed only with enhanced due diligence. Monitor open litigation and regulatory matters; require disclosure of flagged relationships."
        }
        "ELEVATED" => {
            "Standard engagement acceptable with monitoring. Re-verify flagged items before material commitments."
        }
        _ => "No blocking findings. Standard onboarding checks are sufficient.",
    };

    json!({
        "subject_name": state.subject.full_name,
        "subject_role": state.subject.current_role.clone().unwrap_or_else(|| "Unknown".into()),
        "subject_org": state.subject.current_organization.clone().unwrap_or_else(|| "Unknown".into()),
        "subject_aliases": state.subject.aliases,
        "subject_summary": state.subject.summary,
        "known_associations": state.subject.known_associations.iter().take(15).collect::<Vec<_>>(),
        "generated": chrono::Utc::now().format("%Y-%m-%d").to_string(),
        "investigation_id": crate::models::subject_slug(&state.subject.full_name),
        "iterations": state.iteration,
        "overall_rating": rating,
        "facts_count": state.subject.known_associations.len(),
        "entities_count": state.entities.len(),
        "connections_count": state.connections.len(),
        "flags_count": state.risk_flags.len(),
        "overall_confidence": format!("{:.0}%", state.overall_confidence * 100.0),
        "top_flags": top_flags,
        "connections": connections,
        "severity_groups": severity_groups,
        "contradictions": state.temporal_contradictions.iter().map(|c| json!({
            "severity": c.severity.as_str(),
            "description": c.description,
        })).collect::<Vec<_>>(),
        "graph_insights": graph_insights,
        "narrative": narrative,
        "timeline": timeline,
        "sources_accessed": state.search_history.len(),
        "sources_failed": state.inaccessible_urls.len(),
        "inaccessible": state.inaccessible_urls.iter().take(20).map(|u| json!({
            "url": u.url,
            "reason": u.reason,
        })).collect::<Vec<_>>(),
        "recommendations": recommendations,
    })
}
