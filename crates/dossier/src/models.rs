// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Core data models for the investigation engine.
//!
//! These types define the state that flows through the state machine. Every
//! piece of information the engine discovers, every hypothesis it forms, and
//! every risk it flags is represented here.
//!
//! Design principles:
//!   - Every fact carries provenance (source URLs, confidence)
//!   - Entities are typed and deduplicated (case-folded exact + optional fuzzy)
//!   - Diminishing returns tracked per iteration for intelligent termination
//!   - The whole state is serde-serializable so checkpointing and progress
//!     emission fall out for free

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Short opaque id: first 8 hex chars of a v4 UUID, like the original graph ids.
pub fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Normalize a name for fuzzy matching: case-fold, collapse whitespace,
/// strip punctuation that varies between spellings (JP Morgan / J.P.-Morgan).
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '-' | '&' | '\''))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity of two names in [0, 1] after normalization.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_name(a), normalize_name(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

// ============================================================================
// Closed vocabularies
// ============================================================================

/// Types of entities the engine can discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Person,
    Organization,
    Location,
    Event,
    Document,
    FinancialInstrument,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Event => "event",
            EntityType::Document => "document",
            EntityType::FinancialInstrument => "financial_instrument",
        }
    }

    /// Parse a wire string; unknown values fall back to Person, matching the
    /// extractor's tolerance for sloppy model output.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "organization" | "org" | "company" => EntityType::Organization,
            "location" => EntityType::Location,
            "event" => EntityType::Event,
            "document" => EntityType::Document,
            "financial_instrument" => EntityType::FinancialInstrument,
            _ => EntityType::Person,
        }
    }
}

/// Types of relationships between entities (the graph edge vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    WorksAt,
    BoardMemberOf,
    Founded,
    InvestedIn,
    SubsidiaryOf,
    #[default]
    RelatedTo,
    Knows,
    FamilyOf,
    SuedBy,
    RegulatedBy,
    MentionedIn,
    PartnerOf,
    AdvisorTo,
    DonorTo,
    PreviouslyAt,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 15] = [
        RelationshipType::WorksAt,
        RelationshipType::BoardMemberOf,
        RelationshipType::Founded,
        RelationshipType::InvestedIn,
        RelationshipType::SubsidiaryOf,
        RelationshipType::RelatedTo,
        RelationshipType::Knows,
        RelationshipType::FamilyOf,
        RelationshipType::SuedBy,
        RelationshipType::RegulatedBy,
        RelationshipType::MentionedIn,
        RelationshipType::PartnerOf,
        RelationshipType::AdvisorTo,
        RelationshipType::DonorTo,
        RelationshipType::PreviouslyAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::WorksAt => "WORKS_AT",
            RelationshipType::BoardMemberOf => "BOARD_MEMBER_OF",
            RelationshipType::Founded => "FOUNDED",
            RelationshipType::InvestedIn => "INVESTED_IN",
            RelationshipType::SubsidiaryOf => "SUBSIDIARY_OF",
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::Knows => "KNOWS",
            RelationshipType::FamilyOf => "FAMILY_OF",
            RelationshipType::SuedBy => "SUED_BY",
            RelationshipType::RegulatedBy => "REGULATED_BY",
            RelationshipType::MentionedIn => "MENTIONED_IN",
            RelationshipType::PartnerOf => "PARTNER_OF",
            RelationshipType::AdvisorTo => "ADVISOR_TO",
            RelationshipType::DonorTo => "DONOR_TO",
            RelationshipType::PreviouslyAt => "PREVIOUSLY_AT",
        }
    }

    /// Parse a wire string; unknown values fall back to RELATED_TO.
    pub fn parse_lenient(s: &str) -> Self {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == upper)
            .unwrap_or(RelationshipType::RelatedTo)
    }
}

/// Risk flag severity. Variant order gives `Info < Low < Medium < High <
/// Critical`, so ordinal comparisons read naturally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl RiskSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSeverity::Critical => "critical",
            RiskSeverity::High => "high",
            RiskSeverity::Medium => "medium",
            RiskSeverity::Low => "low",
            RiskSeverity::Info => "info",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => RiskSeverity::Critical,
            "high" => RiskSeverity::High,
            "low" => RiskSeverity::Low,
            "info" => RiskSeverity::Info,
            _ => RiskSeverity::Medium,
        }
    }
}

/// Categories of risk patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Regulatory,
    Litigation,
    Financial,
    #[default]
    Reputational,
    Association,
    Inconsistency,
    Sanctions,
    PoliticalExposure,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Regulatory => "regulatory",
            RiskCategory::Litigation => "litigation",
            RiskCategory::Financial => "financial",
            RiskCategory::Reputational => "reputational",
            RiskCategory::Association => "association",
            RiskCategory::Inconsistency => "inconsistency",
            RiskCategory::Sanctions => "sanctions",
            RiskCategory::PoliticalExposure => "political_exposure",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "regulatory" => RiskCategory::Regulatory,
            "litigation" => RiskCategory::Litigation,
            "financial" => RiskCategory::Financial,
            "association" => RiskCategory::Association,
            "inconsistency" => RiskCategory::Inconsistency,
            "sanctions" => RiskCategory::Sanctions,
            "political_exposure" => RiskCategory::PoliticalExposure,
            _ => RiskCategory::Reputational,
        }
    }
}

/// Phases of the consecutive search strategy. Ordered; the director may
/// advance but never regress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Baseline,
    Breadth,
    Depth,
    Adversarial,
    Triangulation,
    Synthesis,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Breadth => "breadth",
            Phase::Depth => "depth",
            Phase::Adversarial => "adversarial",
            Phase::Triangulation => "triangulation",
            Phase::Synthesis => "synthesis",
        }
    }

    pub fn parse_lenient(s: &str, fallback: Phase) -> Phase {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Phase::Baseline,
            "breadth" => Phase::Breadth,
            "depth" => Phase::Depth,
            "adversarial" => Phase::Adversarial,
            "triangulation" => Phase::Triangulation,
            "synthesis" => Phase::Synthesis,
            _ => fallback,
        }
    }
}

/// Actions the research director can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    #[default]
    SearchWeb,
    ExtractFacts,
    AnalyzeRisks,
    MapConnections,
    VerifySources,
    UpdateGraph,
    GenerateReport,
    Terminate,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::SearchWeb => "search_web",
            AgentAction::ExtractFacts => "extract_facts",
            AgentAction::AnalyzeRisks => "analyze_risks",
            AgentAction::MapConnections => "map_connections",
            AgentAction::VerifySources => "verify_sources",
            AgentAction::UpdateGraph => "update_graph",
            AgentAction::GenerateReport => "generate_report",
            AgentAction::Terminate => "terminate",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "extract_facts" => AgentAction::ExtractFacts,
            "analyze_risks" => AgentAction::AnalyzeRisks,
            "map_connections" => AgentAction::MapConnections,
            "verify_sources" => AgentAction::VerifySources,
            "update_graph" => AgentAction::UpdateGraph,
            "generate_report" => AgentAction::GenerateReport,
            "terminate" => AgentAction::Terminate,
            _ => AgentAction::SearchWeb,
        }
    }
}

// ============================================================================
// Core data models
// ============================================================================

/// Multi-factor confidence scoring for an entity or claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub source_authority: f64,
    pub corroboration_count: u32,
    pub recency_score: f64,
    pub internal_consistency: f64,
    pub extraction_clarity: f64,
}

impl Default for ConfidenceScore {
    fn default() -> Self {
        Self {
            source_authority: 0.5,
            corroboration_count: 0,
            recency_score: 0.5,
            internal_consistency: 0.5,
            extraction_clarity: 0.5,
        }
    }
}

impl ConfidenceScore {
    /// Weighted composite score in [0, 1]. Corroboration saturates at 5 sources.
    pub fn weighted_score(&self) -> f64 {
        let corroboration = (f64::from(self.corroboration_count) / 5.0).min(1.0);
        let score = 0.30 * self.source_authority
            + 0.25 * corroboration
            + 0.15 * self.recency_score
            + 0.15 * self.internal_consistency
            + 0.15 * self.extraction_clarity;
        score.clamp(0.0, 1.0)
    }
}

/// A reference to an information source with authority scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub domain: String,
    pub accessed_at: DateTime<Utc>,
    /// web, filing, court_record, social_media, news
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_half")]
    pub authority_score: f64,
}

fn default_source_type() -> String {
    "web".to_string()
}

fn default_half() -> f64 {
    0.5
}

impl SourceReference {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let domain = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            url,
            title: String::new(),
            domain,
            accessed_at: Utc::now(),
            source_type: default_source_type(),
            authority_score: 0.5,
        }
    }
}

/// A discovered entity (person, org, location, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default = "default_half")]
    pub confidence: f64,
    #[serde(default)]
    pub first_seen_iteration: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence_detail: Option<ConfidenceScore>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: short_id(),
            name: name.into(),
            entity_type,
            aliases: Vec::new(),
            attributes: HashMap::new(),
            source_urls: Vec::new(),
            confidence: 0.5,
            first_seen_iteration: 0,
            description: String::new(),
            confidence_detail: None,
        }
    }
}

/// A directed, typed relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default = "default_half")]
    pub confidence: f64,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Connection {
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: short_id(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relationship_type,
            description: String::new(),
            source_urls: Vec::new(),
            confidence: 0.5,
            start_date: None,
            end_date: None,
        }
    }
}

/// A flagged risk or concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlag {
    pub id: String,
    pub category: RiskCategory,
    pub severity: RiskSeverity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Evidence source URLs.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Affected entity ids.
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default = "default_half")]
    pub confidence: f64,
    #[serde(default)]
    pub mitigating_factors: Vec<String>,
}

impl RiskFlag {
    pub fn new(category: RiskCategory, severity: RiskSeverity, title: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            category,
            severity,
            title: title.into(),
            description: String::new(),
            evidence: Vec::new(),
            entity_ids: Vec::new(),
            confidence: 0.5,
            mitigating_factors: Vec::new(),
        }
    }
}

/// A fact anchored to a specific time period. Either endpoint may be open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFact {
    pub id: String,
    pub claim: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub date_range: (Option<String>, Option<String>),
    #[serde(default)]
    pub as_of_date: Option<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default = "default_half")]
    pub confidence: f64,
    /// employment, registration, filing, event
    #[serde(default = "default_temporal_category")]
    pub category: String,
}

fn default_temporal_category() -> String {
    "event".to_string()
}

/// A detected contradiction between two temporal facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalContradiction {
    pub id: String,
    pub fact_a_id: String,
    pub fact_b_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: RiskSeverity,
    #[serde(default = "default_half")]
    pub confidence: f64,
}

/// Status of an investigation hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisStatus {
    #[default]
    Open,
    Confirmed,
    Refuted,
    Inconclusive,
}

/// An active investigation thread the director is pursuing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: HypothesisStatus,
    /// 1-10, higher = more important.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub related_entity_ids: Vec<String>,
    #[serde(default)]
    pub search_queries_tried: Vec<String>,
    #[serde(default)]
    pub evidence_for: Vec<String>,
    #[serde(default)]
    pub evidence_against: Vec<String>,
}

fn default_priority() -> u8 {
    5
}

impl Hypothesis {
    pub fn new(description: impl Into<String>, priority: u8) -> Self {
        Self {
            id: short_id(),
            description: description.into(),
            status: HypothesisStatus::Open,
            priority,
            related_entity_ids: Vec::new(),
            search_queries_tried: Vec::new(),
            evidence_for: Vec::new(),
            evidence_against: Vec::new(),
        }
    }
}

/// Record of a single search operation and its results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    /// tavily, brave, tavily+brave
    pub provider: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub num_results: usize,
    #[serde(default)]
    pub result_urls: Vec<String>,
    #[serde(default)]
    pub raw_snippets: Vec<String>,
    #[serde(default = "default_true")]
    pub was_useful: bool,
}

fn default_true() -> bool {
    true
}

/// The accumulated profile of the investigation subject.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubjectProfile {
    pub full_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub current_role: Option<String>,
    #[serde(default)]
    pub current_organization: Option<String>,
    #[serde(default)]
    pub known_associations: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Output of the research director's planning step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectorDecision {
    pub reasoning: String,
    pub next_action: AgentAction,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub target_entity_ids: Vec<String>,
    #[serde(default)]
    pub current_phase: Phase,
    /// How complete is the investigation, 0-1.
    #[serde(default)]
    pub confidence_in_completeness: f64,
    #[serde(default)]
    pub gaps_identified: Vec<String>,
}

/// One raw content item collected by web research, awaiting extraction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingContent {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub query: String,
}

impl PendingContent {
    /// Content that extraction batches are sized by: raw content when
    /// present, else the snippet.
    pub fn text(&self) -> &str {
        match &self.raw_content {
            Some(raw) if !raw.is_empty() => raw,
            _ => &self.snippet,
        }
    }
}

/// A URL the fetcher tried but could not retrieve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InaccessibleUrl {
    pub url: String,
    pub reason: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub phase: Phase,
}

/// Role in the adversarial risk debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    Proponent,
    Skeptic,
    Judge,
}

/// One entry in the risk debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateEntry {
    pub role: DebateRole,
    pub argument: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of one discovery query over the identity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphInsight {
    pub query_name: String,
    pub description: String,
    pub insight_type: String,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    #[serde(default)]
    pub result_count: usize,
}

/// A detected PII occurrence in entity fields or the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiAnnotation {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub field_name: String,
    pub pii_type: String,
    pub original_value: String,
    pub redacted_value: String,
}

// ============================================================================
// Investigation state (the central aggregate)
// ============================================================================

/// The central state object that flows through the state machine.
///
/// This is the single source of truth for the entire investigation. Every
/// node reads a snapshot and returns an updated one; the engine owns the
/// authoritative copy between node executions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InvestigationState {
    // ── Subject ──
    pub subject: SubjectProfile,

    // ── Accumulated knowledge ──
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,

    // ── Search management ──
    #[serde(default)]
    pub search_history: Vec<SearchRecord>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,

    // ── Raw content buffer ──
    #[serde(default)]
    pub pending_content: Vec<PendingContent>,

    // ── Director state ──
    #[serde(default)]
    pub current_phase: Phase,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub last_decision: Option<DirectorDecision>,
    /// Phases in first-observed order, for run metadata.
    #[serde(default)]
    pub phases_executed: Vec<Phase>,

    // ── Diminishing returns ──
    #[serde(default)]
    pub entities_added_per_iteration: Vec<u32>,
    #[serde(default)]
    pub facts_added_per_iteration: Vec<u32>,

    // ── Confidence tracking ──
    #[serde(default)]
    pub confidence_scores: HashMap<String, f64>,
    #[serde(default)]
    pub overall_confidence: f64,

    // ── Cost tracking ──
    #[serde(default)]
    pub total_llm_calls: u32,
    #[serde(default)]
    pub total_search_calls: u32,
    #[serde(default)]
    pub estimated_cost_usd: f64,

    // ── Control flow ──
    #[serde(default)]
    pub should_terminate: bool,
    #[serde(default)]
    pub error_log: Vec<String>,

    // ── Sources identified but not retrievable ──
    #[serde(default)]
    pub inaccessible_urls: Vec<InaccessibleUrl>,

    // ── Temporal intelligence ──
    #[serde(default)]
    pub temporal_facts: Vec<TemporalFact>,
    #[serde(default)]
    pub temporal_contradictions: Vec<TemporalContradiction>,

    // ── Risk debate transcript ──
    #[serde(default)]
    pub risk_debate_transcript: Vec<DebateEntry>,

    // ── Graph insights (from discovery queries) ──
    #[serde(default)]
    pub graph_insights: Vec<GraphInsight>,

    // ── PII annotations ──
    #[serde(default)]
    pub pii_annotations: Vec<PiiAnnotation>,

    // ── Final output ──
    #[serde(default)]
    pub final_report: String,
    #[serde(default)]
    pub redacted_report: String,
}

fn default_max_iterations() -> u32 {
    8
}

impl InvestigationState {
    pub fn new(subject: SubjectProfile, max_iterations: u32) -> Self {
        Self {
            subject,
            max_iterations,
            ..Default::default()
        }
    }

    /// Look up an entity by id.
    pub fn entity_by_id(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == entity_id)
    }

    /// Exact lookup by name or alias (case-insensitive, trimmed).
    pub fn find_entity_by_name(&self, name: &str) -> Option<&Entity> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.entities.iter().find(|e| {
            e.name.trim().to_lowercase() == needle
                || e.aliases.iter().any(|a| a.trim().to_lowercase() == needle)
        })
    }

    /// Best-matching entity by fuzzy name similarity (JPMorgan vs JP Morgan).
    pub fn find_entity_by_name_fuzzy(&self, name: &str, threshold: f64) -> Option<&Entity> {
        let mut best: Option<(&Entity, f64)> = None;
        for entity in &self.entities {
            let mut score = name_similarity(name, &entity.name);
            for alias in &entity.aliases {
                score = score.max(name_similarity(name, alias));
            }
            if score >= threshold && best.map_or(true, |(_, b)| score > b) {
                best = Some((entity, score));
            }
        }
        best.map(|(e, _)| e)
    }

    /// Add an entity with deduplication. Exact match on name/alias first; if
    /// `fuzzy_threshold` is set, a normalized-similarity match also collapses.
    ///
    /// On collapse: confidence takes the max, sources/aliases/attributes are
    /// union-merged, and the survivor's description is filled only if empty.
    /// Returns the surviving entity id and whether a new entity was added.
    pub fn add_entity(&mut self, entity: Entity, fuzzy_threshold: Option<f64>) -> (String, bool) {
        // Dedup requires the same entity type: a location named "Paris" must
        // not absorb a person named "Paris".
        let needle = entity.name.trim().to_lowercase();
        let existing_id = self
            .entities
            .iter()
            .find(|e| {
                e.entity_type == entity.entity_type
                    && (e.name.trim().to_lowercase() == needle
                        || e.aliases.iter().any(|a| a.trim().to_lowercase() == needle))
            })
            .map(|e| e.id.clone())
            .or_else(|| {
                fuzzy_threshold.and_then(|t| {
                    self.find_entity_by_name_fuzzy(&entity.name, t)
                        .filter(|e| e.entity_type == entity.entity_type)
                        .map(|e| e.id.clone())
                })
            });

        if let Some(id) = existing_id {
            // Index lookup cannot fail: the id came from self.entities above.
            if let Some(existing) = self.entities.iter_mut().find(|e| e.id == id) {
                existing.confidence = existing.confidence.max(entity.confidence);
                for url in entity.source_urls {
                    if !existing.source_urls.contains(&url) {
                        existing.source_urls.push(url);
                    }
                }
                for alias in entity.aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
                existing.attributes.extend(entity.attributes);
                if existing.description.is_empty() && !entity.description.is_empty() {
                    existing.description = entity.description;
                }
            }
            return (id, false);
        }

        let id = entity.id.clone();
        self.entities.push(entity);
        (id, true)
    }

    /// Add a connection with (source, target, type) deduplication. Re-adds
    /// merge confidence (max) and sources (union). Returns true when new.
    pub fn add_connection(&mut self, connection: Connection) -> bool {
        if let Some(existing) = self.connections.iter_mut().find(|c| {
            c.source_entity_id == connection.source_entity_id
                && c.target_entity_id == connection.target_entity_id
                && c.relationship_type == connection.relationship_type
        }) {
            existing.confidence = existing.confidence.max(connection.confidence);
            for url in connection.source_urls {
                if !existing.source_urls.contains(&url) {
                    existing.source_urls.push(url);
                }
            }
            return false;
        }
        self.connections.push(connection);
        true
    }

    /// All queries already executed (case-folded), to forbid repetition.
    pub fn queries_used(&self) -> HashSet<String> {
        self.search_history
            .iter()
            .map(|r| r.query.trim().to_lowercase())
            .collect()
    }

    /// Hypotheses still under investigation.
    pub fn open_hypotheses(&self) -> Vec<&Hypothesis> {
        self.hypotheses
            .iter()
            .filter(|h| h.status == HypothesisStatus::Open)
            .collect()
    }

    /// Record how many entities/facts this iteration added, for the
    /// diminishing-returns check. Window capped at the last 10 iterations.
    pub fn record_iteration_yield(&mut self, new_entities: u32, new_facts: u32) {
        self.entities_added_per_iteration.push(new_entities);
        self.facts_added_per_iteration.push(new_facts);
        let len = self.entities_added_per_iteration.len();
        if len > 10 {
            self.entities_added_per_iteration.drain(..len - 10);
        }
        let len = self.facts_added_per_iteration.len();
        if len > 10 {
            self.facts_added_per_iteration.drain(..len - 10);
        }
    }

    /// Record a phase transition in first-observed order.
    pub fn record_phase(&mut self, phase: Phase) {
        if !self.phases_executed.contains(&phase) {
            self.phases_executed.push(phase);
        }
    }
}

/// Subject slug used for output file stems, checkpoint thread ids, and the
/// graph investigation id.
pub fn subject_slug(name: &str) -> String {
    let mut slug = String::new();
    for word in name.trim().to_lowercase().split_whitespace() {
        if !slug.is_empty() {
            slug.push('_');
        }
        slug.extend(word.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_'));
    }
    slug
}
