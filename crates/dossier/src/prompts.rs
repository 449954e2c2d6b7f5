// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Prompt templates for all agent roles.
//!
//! Conventions: one focused job per prompt, XML tags for structured context,
//! domain-expert personas, and the closed vocabularies printed into the
//! prompts so model output stays on the wire contract.

use crate::models::{DebateEntry, InvestigationState};

// ═══════════════════════════════════════════════════════════
// Research director
// ═══════════════════════════════════════════════════════════

pub const RESEARCH_DIRECTOR_SYSTEM: &str = r#"You are a senior intelligence analyst and research director with 20 years of experience in financial due diligence, corporate investigations, and risk assessment. You lead a team of specialist analysts.

Your job is to PLAN the next step of an investigation. You analyze what has been discovered so far, identify gaps, form hypotheses, and decide what to investigate next.

<investigation_phases>
1. BASELINE: Establish basic biographical facts and public profile
2. BREADTH: Map the entity landscape — associated people, organizations, locations
3. DEPTH: Deep-dive into each discovered entity and relationship
4. ADVERSARIAL: Search for what the subject might want hidden (litigation, sanctions, removed content)
5. TRIANGULATION: Cross-reference and validate findings across independent sources
6. SYNTHESIS: Produce final risk assessment with confidence scores
</investigation_phases>

<decision_rules>
- Move to next phase when current phase yields diminishing returns (< 2 new facts per search)
- Prioritize hypotheses with high potential impact and low current confidence
- NEVER repeat a search query that has already been executed
- Generate 2-5 diverse search queries per decision (different angles on the same question)
- Prefer specific, targeted queries over broad ones
- When in ADVERSARIAL phase, search for: litigation, bankruptcy, sanctions, regulatory actions, negative news, removed articles
- Before generating the report, you MUST run risk analysis at least once when there are entities and connections: if Risk Flags is 0 and you have not yet chosen next_action "analyze_risks" in this investigation, prefer next_action "analyze_risks" so the judge can flag SEC, litigation, and other risks from the findings.
- TERMINATE when: (a) confidence_in_completeness > 0.8, OR (b) max_iterations reached, OR (c) consecutive iterations yield few new entities
</decision_rules>

You MUST respond with a JSON object. Include: "reasoning", "next_action" (search_web|extract_facts|analyze_risks|map_connections|verify_sources|generate_report|terminate), "search_queries" (array), "current_phase", "confidence_in_completeness" (0-1), "gaps_identified" (array). Think step-by-step about what we know, what gaps remain, and what queries will fill them."#;

/// Build the director's planning context from the full current state.
pub fn research_director_user(state: &InvestigationState) -> String {
    let mut entities_summary = String::new();
    for e in state.entities.iter().take(30) {
        let attrs = e
            .attributes
            .iter()
            .take(5)
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        entities_summary.push_str(&format!(
            "- [{}] {} (conf: {:.2}) {}\n",
            e.entity_type.as_str(),
            e.name,
            e.confidence,
            attrs
        ));
    }
    if entities_summary.is_empty() {
        entities_summary = "(No entities discovered yet)".to_string();
    }

    let mut recent_findings = String::new();
    let tail = state.search_history.len().saturating_sub(3);
    for r in &state.search_history[tail..] {
        let snippets = r
            .raw_snippets
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n  ");
        recent_findings.push_str(&format!(
            "Query: \"{}\" → {} results\n  {}\n\n",
            r.query, r.num_results, snippets
        ));
    }
    if recent_findings.is_empty() {
        recent_findings = "(No searches executed yet)".to_string();
    }

    let search_history = if state.search_history.is_empty() {
        "(None)".to_string()
    } else {
        state
            .search_history
            .iter()
            .map(|r| format!("- \"{}\" [{}, {} results]", r.query, r.provider, r.num_results))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let open = state.open_hypotheses();
    let hypotheses = if open.is_empty() {
        "(No open hypotheses)".to_string()
    } else {
        open.iter()
            .map(|h| format!("- [{}/10] {} (status: open)", h.priority, h.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let gaps = state
        .last_decision
        .as_ref()
        .map(|d| d.gaps_identified.clone())
        .unwrap_or_default();
    let gaps = if gaps.is_empty() {
        "(Initial investigation — gaps unknown)".to_string()
    } else {
        gaps.iter()
            .map(|g| format!("- {g}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"<subject_profile>
Name: {name}
Current Role: {role}
Current Organization: {org}
Summary: {summary}
</subject_profile>

<investigation_status>
Current Phase: {phase}
Iteration: {iteration} / {max_iterations}
Total Entities Discovered: {num_entities}
Total Connections Mapped: {num_connections}
Risk Flags: {num_flags}
Overall Confidence: {confidence:.2}
</investigation_status>

<known_entities>
{entities_summary}
</known_entities>

<recent_findings>
{recent_findings}
</recent_findings>

<search_history>
Queries already executed (DO NOT repeat these):
{search_history}
</search_history>

<open_hypotheses>
{hypotheses}
</open_hypotheses>

<identified_gaps>
{gaps}
</identified_gaps>"#,
        name = state.subject.full_name,
        role = state.subject.current_role.as_deref().unwrap_or("Unknown"),
        org = state
            .subject
            .current_organization
            .as_deref()
            .unwrap_or("Unknown"),
        summary = if state.subject.summary.is_empty() {
            "No summary yet"
        } else {
            &state.subject.summary
        },
        phase = state.current_phase.as_str(),
        iteration = state.iteration,
        max_iterations = state.max_iterations,
        num_entities = state.entities.len(),
        num_connections = state.connections.len(),
        num_flags = state.risk_flags.len(),
        confidence = state.overall_confidence,
    )
}

// ═══════════════════════════════════════════════════════════
// Fact extractor
// ═══════════════════════════════════════════════════════════

pub const FACT_EXTRACTOR_SYSTEM: &str = r#"You are a precise fact extraction specialist. Your job is to extract structured entities and factual claims from raw web content.

<rules>
1. Extract ONLY facts that are explicitly stated in the source text. NEVER infer or fabricate.
2. Each fact must be tied to the specific source URL it came from.
3. Assign a confidence score (0.0-1.0) based on source reliability.
4. For each person, extract: full name, title/role, organization, dates if available.
5. For each organization, extract: name, type, jurisdiction, status, key people.
6. Detect ALIASES — different names or spellings referring to the same entity.
</rules>

Entity types: person, organization, location, event, document, financial_instrument.
Relationship types: WORKS_AT, BOARD_MEMBER_OF, FOUNDED, INVESTED_IN, SUBSIDIARY_OF, RELATED_TO, KNOWS, FAMILY_OF, SUED_BY, REGULATED_BY, MENTIONED_IN, PARTNER_OF, ADVISOR_TO, DONOR_TO, PREVIOUSLY_AT.

Respond with a single JSON object containing: "entities" (array of name, entity_type, attributes, confidence, source_url), "connections" (source, target, relationship, description, confidence), "key_facts" (claim, source_url, confidence), "potential_issues" (array).

CRITICAL: Output raw JSON only. Do NOT wrap the response in markdown code blocks (no ```json or ```)."#;

pub fn fact_extractor_user(
    subject_name: &str,
    query: &str,
    content: &str,
    known_entities: &str,
) -> String {
    format!(
        r#"Extract structured entities and facts from the following web content about {subject_name}.

<search_query>{query}</search_query>

<source_content>
{content}
</source_content>

<already_known_entities>
{known_entities}
</already_known_entities>

Focus on NEW information not already captured. Respond with raw JSON only (no markdown code blocks: do not use ```json or ```)."#
    )
}

// ═══════════════════════════════════════════════════════════
// Risk debate (adversarial)
// ═══════════════════════════════════════════════════════════

pub const RISK_PROPONENT_SYSTEM: &str = "You are a skeptical investigator. Argue why the investigation findings are concerning. Be concise (2-4 short paragraphs). Focus on red flags, inconsistencies, and reasons to treat the findings as serious. Output plain text only, no JSON.";

pub const RISK_SKEPTIC_SYSTEM: &str = "You are a defense analyst. Argue why the investigation findings are explainable or benign. Be concise (2-4 short paragraphs). Focus on alternative explanations, context, and reasons these may be false positives. Output plain text only, no JSON.";

pub fn risk_debate_user(state: &InvestigationState, stance: &str) -> String {
    let entities = json_sample(&state.entities, 30);
    let connections = json_sample(&state.connections, 30);
    let existing_flags = json_sample(&state.risk_flags, usize::MAX);
    format!(
        r#"Subject: {name}. Given the entities, connections, and any existing risk flags below, argue why these findings are {stance}.

<entities>{entities}</entities>
<connections>{connections}</connections>
<existing_flags>{existing_flags}</existing_flags>

Respond with a short argument (plain text)."#,
        name = state.subject.full_name,
    )
}

// ═══════════════════════════════════════════════════════════
// Risk judge
// ═══════════════════════════════════════════════════════════

pub const RISK_ANALYZER_SYSTEM: &str = r#"You are a compliance and risk assessment specialist. Analyze a subject's profile and flag potential risks, inconsistencies, and concerns.

<risk_categories>
regulatory, litigation, financial, reputational, association, inconsistency, sanctions, political_exposure
</risk_categories>

<severity_levels>
critical, high, medium, low, info
</severity_levels>

When the investigation has run adversarial searches (e.g. SEC, lawsuit, fraud, bankruptcy, consent decree, fiduciary breach), treat those search intents as strong context: if entities, connections, or the proponent argument align with such topics, you MUST flag them with the appropriate category (regulatory, litigation, etc.) and severity. Do not dismiss serious allegations (SEC enforcement, fraud, client losses) as low risk without clear mitigating evidence. Only flag risks supported by evidence or by the proponent's reasoning. Cite evidence (URLs) when available. Never fabricate. If the profile is genuinely clean after considering all context, say so.

Respond with JSON: "risk_flags" (array of category, severity, title, description, evidence, entity_ids, confidence, mitigating_factors), "overall_risk_assessment", "summary"."#;

pub fn risk_analyzer_user(
    state: &InvestigationState,
    recent_adversarial_searches: &str,
    proponent_argument: &str,
    skeptic_argument: &str,
) -> String {
    let subject_profile =
        serde_json::to_string_pretty(&state.subject).unwrap_or_else(|_| "{}".to_string());
    let entities = json_sample(&state.entities, 30);
    let connections = json_sample(&state.connections, 30);
    let existing_flags = json_sample(&state.risk_flags, usize::MAX);
    format!(
        r#"Analyze the following investigation findings for risk patterns.

<subject_profile>
{subject_profile}
</subject_profile>

<discovered_entities>
{entities}
</discovered_entities>

<discovered_connections>
{connections}
</discovered_connections>

<existing_risk_flags>
{existing_flags}
</existing_risk_flags>

<recent_adversarial_searches>
The investigation ran these adversarial searches (queries and outcomes). Use them as context for what was investigated; align risk flags with findings that support these topics.
{recent_adversarial_searches}
</recent_adversarial_searches>

<proponent_argument>
{proponent_argument}
</proponent_argument>

<skeptic_argument>
{skeptic_argument}
</skeptic_argument>

Consider both adversarial views and the search context above, then produce your own assessment. Identify NEW risks not already flagged. When searches targeted SEC, litigation, fraud, or client harm, flag matching risks with appropriate severity. Respond with JSON only."#
    )
}

// ═══════════════════════════════════════════════════════════
// Connection mapper
// ═══════════════════════════════════════════════════════════

pub const CONNECTION_MAPPER_SYSTEM: &str = r#"You are a network analysis specialist. Map relationships between people, organizations, and events. Only map connections supported by evidence. Look for indirect A→B→C links.

Relationship types: WORKS_AT, BOARD_MEMBER_OF, FOUNDED, INVESTED_IN, SUBSIDIARY_OF, RELATED_TO, KNOWS, FAMILY_OF, SUED_BY, REGULATED_BY, MENTIONED_IN, PARTNER_OF, ADVISOR_TO, DONOR_TO, PREVIOUSLY_AT

Respond with JSON: "connections" (source, target, relationship, description, confidence, source_urls), "connection_insights", "suggested_investigations"."#;

pub fn connection_mapper_user(state: &InvestigationState) -> String {
    let entities = json_sample(&state.entities, 30);
    let tail = state.search_history.len().saturating_sub(5);
    let findings: String = state.search_history[tail..]
        .iter()
        .map(|r| {
            r.raw_snippets
                .first()
                .cloned()
                .unwrap_or_else(|| format!("Query: {}", r.query))
        })
        .collect::<Vec<_>>()
        .join("\n");
    let findings = truncate(&findings, 4000);
    let existing = json_sample(&state.connections, 20);
    format!(
        r#"Map relationships for investigation of {name}.

<entities>
{entities}
</entities>

<raw_findings>
{findings}
</raw_findings>

<existing_connections>
{existing}
</existing_connections>

Identify NEW connections. Respond with JSON only."#,
        name = state.subject.full_name,
    )
}

// ═══════════════════════════════════════════════════════════
// Source verifier
// ═══════════════════════════════════════════════════════════

pub const SOURCE_VERIFIER_SYSTEM: &str = r#"You are a fact-checking specialist. Assess reliability of claims and assign confidence scores. Base: gov/filings 0.9, major news 0.8, company 0.75, LinkedIn 0.6, blogs 0.4. Adjust: +0.1 per corroborating source, -0.15 per contradiction. Final confidence = min(score, 0.99).

Respond with JSON: "verified_claims" (claim, confidence, sources, notes), "contradictions", "unverified_claims", "overall_confidence"."#;

pub fn source_verifier_user(subject_name: &str, claims: &[String], sources: &[String]) -> String {
    let claims = claims
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let sources = sources
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Verify claims from our investigation of {subject_name}.

<claims_to_verify>
{claims}
</claims_to_verify>

<all_sources>
{sources}
</all_sources>

Assess each claim. Respond with JSON only."#
    )
}

// ═══════════════════════════════════════════════════════════
// Temporal analyzer
// ═══════════════════════════════════════════════════════════

pub const TEMPORAL_ANALYZER_SYSTEM: &str = r#"You are a chronological analysis specialist. Your job is to extract temporal windows from entities and connections, build a chronological timeline, and detect contradictions.

<rules>
1. Extract date ranges for employment, registrations, filings, and events.
2. Build a chronological timeline of the subject's history.
3. Detect contradictions: overlapping employment at competing firms, dissolved entities still claimed as active, expired licenses, timeline gaps.
4. For each contradiction, assign a severity (critical, high, medium, low, info) based on impact.
5. Use chain-of-thought reasoning before outputting your final JSON.
</rules>

Respond with a JSON object containing:
- "temporal_facts": array of {id, claim, entity_id, date_range: [start, end], as_of_date, source_urls, confidence, category}
- "contradictions": array of {id, fact_a_id, fact_b_id, description, severity, confidence}

Output raw JSON only. Do NOT wrap in markdown code blocks."#;

pub fn temporal_analyzer_user(state: &InvestigationState) -> String {
    let entities = json_sample(&state.entities, 40);
    let connections = json_sample(&state.connections, 30);
    let existing = if state.temporal_facts.is_empty() {
        "(None)".to_string()
    } else {
        json_sample(&state.temporal_facts, usize::MAX)
    };
    format!(
        r#"Analyze the timeline for investigation of {name}.

<entities>
{entities}
</entities>

<connections>
{connections}
</connections>

<existing_temporal_facts>
{existing}
</existing_temporal_facts>

Extract temporal facts and detect any contradictions. Respond with raw JSON only."#,
        name = state.subject.full_name,
    )
}

// ═══════════════════════════════════════════════════════════
// Entity resolver
// ═══════════════════════════════════════════════════════════

pub const ENTITY_RESOLVER_SYSTEM: &str = r#"You are an entity resolution specialist. Your job is to identify duplicate entities that refer to the same real-world person, organization, or thing, and recommend merges.

<rules>
1. Consider name similarity, shared attributes, shared connections, and context.
2. Only recommend merges when you are confident (>0.8) they are the same entity.
3. Preserve the most complete set of attributes from both entities.
4. Be conservative — false merges are worse than missed merges.
</rules>

Respond with a JSON object containing:
- "merge_pairs": array of {entity_a_id, entity_b_id, confidence, reasoning}

Output raw JSON only. Do NOT wrap in markdown code blocks."#;

pub fn entity_resolver_user(
    subject_name: &str,
    candidate_pairs: &serde_json::Value,
    all_entities: &serde_json::Value,
) -> String {
    format!(
        r#"Review these entities for potential duplicates in the investigation of {subject_name}.

<candidate_pairs>
{pairs}
</candidate_pairs>

<all_entities>
{entities}
</all_entities>

Identify which pairs should be merged. Respond with raw JSON only."#,
        pairs = serde_json::to_string_pretty(candidate_pairs).unwrap_or_default(),
        entities = serde_json::to_string_pretty(all_entities).unwrap_or_default(),
    )
}

// ═══════════════════════════════════════════════════════════
// Report generator
// ═══════════════════════════════════════════════════════════

pub const REPORT_GENERATOR_SYSTEM: &str = r#"You are a senior executive intelligence analyst specializing in high-stakes due diligence and corporate investigations. Your task is to synthesize all investigation findings into a professional, comprehensive Due Diligence Report.

The report MUST use the following structure and professional tone:

# [Title: Due Diligence Report: Subject Name]
**Generated:** [Current Date] | **Investigation ID:** [ID] | **Iterations:** [Iteration Count]

## Executive Summary
Provide a high-level synthesis of findings. Be direct about the overall risk posture.
- Use a **CRITICAL/HIGH/MEDIUM RISK RATING** header.
- Summarize the most severe red flags.
- Include a 2-column table with metrics: Facts Extracted, Entities Discovered, Risk Flags, Search Iterations, Overall Confidence.

## Subject Profile
A detailed table or bulleted list of the primary subject:
- Full Legal Name, CRD/ID numbers (if found), Current Role, Location.
- Key Professional History and Associations.
- Known Aliases and Family members (if discovered).

## Organizational Connections
Categorize and describe the network of entities discovered:
- **Financial Entities**: Banks, investment firms, holdings.
- **Business Entities**: Operating companies, LLCs, properties.
- **Regulatory/Legal Bodies**: Agencies or courts involved.
Describe the nature and confidence of these connections.

## Risk Assessment
Segment risks by severity:
- **Critical (5/5)**: Legal actions, fraud, criminal history, active enforcement.
- **High (4/5)**: Conflicts of interest, suspicious financial patterns, severe negative media.
- **Elevated (3/5)**: Minor litigation, corporate shell networks, inconsistency.
For each critical risk, provide: [Title], [Severity], [Description], and [Evidence URL citations].

## Key Findings
Highlight non-obvious patterns, such as "Multi-Generational Fraud Patterns", "Cross-Domain Regulatory Failures", "Entity Proliferation", or "Age/Time Anomalies".

## Investigation Timeline
A chronological table of key events discovered, with dates and sources.

## Confidence Assessment
- Overall Confidence percentage.
- Breakdown of sources by type (SEC, FINRA, Court, Media, etc.) and their reliability.
- Mention "Sources identified but not retrievable" if relevant.

## Recommendations
Provide clear, actionable advice (e.g., "Do not engage", "Monitor case resolution", "Enhanced asset tracing").

---
**STYLE RULES**:
- Use Markdown headers, tables, and bold text for professional formatting.
- Be precise and objective; avoid vague language.
- Cite specific source URLs for every major claim using [Source](url) format.
- If temporal contradictions exist, call them out as "Integrity Alerts"."#;

pub fn report_generator_user(state: &InvestigationState) -> String {
    let timeline = if state.temporal_facts.is_empty() {
        "(No temporal facts available)".to_string()
    } else {
        state
            .temporal_facts
            .iter()
            .map(|tf| {
                let start = tf.date_range.0.as_deref().unwrap_or("?");
                let end = tf.date_range.1.as_deref().unwrap_or("present");
                format!(
                    "- [{}] {} ({start} to {end}) [conf: {:.2}]",
                    tf.category, tf.claim, tf.confidence
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let contradictions = if state.temporal_contradictions.is_empty() {
        "(No contradictions detected)".to_string()
    } else {
        state
            .temporal_contradictions
            .iter()
            .map(|tc| {
                format!(
                    "- [{}] {} (conf: {:.2})",
                    tc.severity.as_str(),
                    tc.description,
                    tc.confidence
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let debate = format_debate(&state.risk_debate_transcript);

    let graph_insights = if state.graph_insights.is_empty() {
        "(No graph insights available)".to_string()
    } else {
        state
            .graph_insights
            .iter()
            .map(|insight| {
                let mut block = format!("## {}\n", insight.description);
                for r in insight.results.iter().take(15) {
                    block.push_str(&format!("- {r}\n"));
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Generate a due diligence report for {name}.

<subject_profile>
{profile}
</subject_profile>

<entities>
{entities}
</entities>

<connections>
{connections}
</connections>

<risk_flags>
{flags}
</risk_flags>

<confidence_scores>
{scores}
</confidence_scores>

<investigation_metadata>
Searches: {searches}  Iterations: {iterations}  Cost: ${cost:.4}
</investigation_metadata>

<sources_identified_but_not_retrievable>
{inaccessible}
</sources_identified_but_not_retrievable>

Reflect uncertainty in confidence where key sources could not be fetched. Cite inaccessible sources in the report if they were relevant to the investigation.

<timeline>
{timeline}
</timeline>

<temporal_contradictions>
{contradictions}
</temporal_contradictions>

<risk_debate_transcript>
{debate}
</risk_debate_transcript>

<graph_insights>
{graph_insights}
</graph_insights>

Include a TIMELINE section summarizing the chronological history. If temporal contradictions exist, call them out explicitly in the Risk Assessment section. Include a summary of the risk debate arguments if available."#,
        name = state.subject.full_name,
        profile = serde_json::to_string_pretty(&state.subject).unwrap_or_default(),
        entities = json_sample(&state.entities, 40),
        connections = json_sample(&state.connections, 30),
        flags = json_sample(&state.risk_flags, usize::MAX),
        scores = serde_json::to_string_pretty(&state.confidence_scores).unwrap_or_default(),
        searches = state.search_history.len(),
        iterations = state.iteration,
        cost = state.estimated_cost_usd,
        inaccessible = json_sample(&state.inaccessible_urls, usize::MAX),
    )
}

fn format_debate(transcript: &[DebateEntry]) -> String {
    if transcript.is_empty() {
        return "(No debate transcript available)".to_string();
    }
    transcript
        .iter()
        .map(|entry| {
            let role = match entry.role {
                crate::models::DebateRole::Proponent => "proponent",
                crate::models::DebateRole::Skeptic => "skeptic",
                crate::models::DebateRole::Judge => "judge",
            };
            format!("[{role}]: {}", truncate(&entry.argument, 500))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Pretty-print the first `limit` items of a serializable slice.
fn json_sample<T: serde::Serialize>(items: &[T], limit: usize) -> String {
    let take = items.len().min(limit);
    serde_json::to_string_pretty(&items[..take]).unwrap_or_else(|_| "[]".to_string())
}

/// Truncate on a char boundary with no partial UTF-8.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) => text[..idx].to_string(),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    #[test]
    fn test_director_prompt_lists_history_and_forbids_repeats() {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.search_history.push(SearchRecord {
            query: "jane doe acme".into(),
            provider: "tavily".into(),
            phase: Phase::Baseline,
            iteration: 1,
            timestamp: chrono::Utc::now(),
            num_results: 4,
            result_urls: vec![],
            raw_snippets: vec!["snippet one".into()],
            was_useful: true,
        });
        let prompt = research_director_user(&state);
        assert!(prompt.contains("DO NOT repeat"));
        assert!(prompt.contains("jane doe acme"));
        assert!(prompt.contains("Jane Doe"));
    }

    #[test]
    fn test_fact_extractor_prompt_no_fences() {
        let prompt = fact_extractor_user("X", "q", "content", "(None)");
        assert!(prompt.contains("<source_content>"));
        assert!(prompt.contains("raw JSON only"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let s = "héllo wörld";
        assert_eq!(truncate(s, 4), "héll");
        assert_eq!(truncate(s, 100), s);
    }

    #[test]
    fn test_report_prompt_includes_debate_and_timeline() {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.risk_debate_transcript.push(DebateEntry {
            role: DebateRole::Proponent,
            argument: "concerning pattern".into(),
            timestamp: chrono::Utc::now(),
        });
        state.temporal_facts.push(TemporalFact {
            id: "t1".into(),
            claim: "CEO at Acme".into(),
            entity_id: String::new(),
            date_range: (Some("2010".into()), None),
            as_of_date: None,
            source_urls: vec![],
            confidence: 0.8,
            category: "employment".into(),
        });
        let prompt = report_generator_user(&state);
        assert!(prompt.contains("[proponent]: concerning pattern"));
        assert!(prompt.contains("(2010 to present)"));
    }
}
