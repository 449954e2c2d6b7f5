// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Centralized configuration.
//!
//! All settings load from environment variables with sensible defaults, plus
//! optional YAML overlays under `config/` for source-authority scoring,
//! per-domain fetch policies, task-to-tier model routing, and risk category
//! descriptions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_string(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).as_deref().map(str::to_lowercase).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

/// LLM provider API keys and model identifiers. Proxy mode takes precedence
/// when a proxy key is configured with a non-local base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub proxy_api_key: String,
    pub proxy_api_base: String,

    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub google_api_key: String,

    pub claude_model: String,
    pub openai_model: String,
    pub gemini_model: String,

    // Fast-tier models (cheaper, for routine extraction / debate agents)
    pub claude_fast_model: String,
    pub openai_fast_model: String,
    pub gemini_fast_model: String,

    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            proxy_api_key: String::new(),
            proxy_api_base: String::new(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            google_api_key: String::new(),
            claude_model: "claude-opus-4-5".to_string(),
            openai_model: "gpt-4.1".to_string(),
            gemini_model: "gemini-2.5-pro".to_string(),
            claude_fast_model: "claude-sonnet-4-6".to_string(),
            openai_fast_model: "gpt-4.1-mini".to_string(),
            gemini_fast_model: "gemini-2.5-flash".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            proxy_api_key: env_or("LLM_PROXY_API_KEY", ""),
            proxy_api_base: env_or("LLM_PROXY_API_BASE", ""),
            anthropic_api_key: env_or("ANTHROPIC_API_KEY", ""),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            google_api_key: env_or("GOOGLE_API_KEY", ""),
            claude_model: env_or("CLAUDE_MODEL", &d.claude_model),
            openai_model: env_or("OPENAI_MODEL", &d.openai_model),
            gemini_model: env_or("GEMINI_MODEL", &d.gemini_model),
            claude_fast_model: env_or("CLAUDE_FAST_MODEL", &d.claude_fast_model),
            openai_fast_model: env_or("OPENAI_FAST_MODEL", &d.openai_fast_model),
            gemini_fast_model: env_or("GEMINI_FAST_MODEL", &d.gemini_fast_model),
            temperature: env_parse("LLM_TEMPERATURE", d.temperature),
            max_tokens: env_parse("LLM_MAX_TOKENS", d.max_tokens),
        }
    }

    /// Proxy mode requires both a key and a non-local base URL. Deployed
    /// environments cannot reach localhost, so local bases are rejected.
    pub fn proxy_enabled(&self) -> bool {
        if self.proxy_api_key.trim().is_empty() {
            return false;
        }
        !is_local_url(&self.proxy_api_base)
    }
}

/// True when the URL is empty, unparseable, or points at a loopback host.
pub fn is_local_url(url_str: &str) -> bool {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return true;
    }
    match url::Url::parse(trimmed) {
        Ok(u) => matches!(
            u.host_str().map(str::to_lowercase).as_deref(),
            None | Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]")
        ),
        Err(_) => true,
    }
}

/// Search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub tavily_api_key: String,
    pub brave_api_key: String,
    pub max_results_per_query: u32,
    /// Seconds.
    pub request_timeout: u64,
    /// Browser fetch tier timeout in milliseconds.
    pub browser_timeout_ms: u64,
    /// Email for SEC EDGAR User-Agent compliance.
    pub sec_contact_email: String,
    /// Enable the structured-browser tier for regulatory domains.
    pub use_structured_fetch: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: String::new(),
            brave_api_key: String::new(),
            max_results_per_query: 10,
            request_timeout: 30,
            browser_timeout_ms: 30_000,
            sec_contact_email: "research@example.com".to_string(),
            use_structured_fetch: false,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            tavily_api_key: env_or("TAVILY_API_KEY", ""),
            brave_api_key: env_or("BRAVE_SEARCH_API_KEY", ""),
            max_results_per_query: env_parse("MAX_SEARCH_RESULTS_PER_QUERY", d.max_results_per_query),
            request_timeout: env_parse("SEARCH_REQUEST_TIMEOUT", d.request_timeout),
            browser_timeout_ms: env_parse("BROWSER_FETCH_TIMEOUT", d.browser_timeout_ms),
            sec_contact_email: env_or("SEC_CONTACT_EMAIL", &d.sec_contact_email),
            use_structured_fetch: env_bool("USE_STRUCTURED_FETCH", d.use_structured_fetch),
        }
    }
}

/// Identity graph connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

impl GraphConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            uri: env_or("NEO4J_URI", &d.uri),
            username: env_or("NEO4J_USERNAME", &d.username),
            password: env_or("NEO4J_PASSWORD", ""),
            database: env_or("NEO4J_DATABASE", &d.database),
        }
    }
}

/// Agent behavior tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub confidence_threshold: f64,
    /// Cost budget per investigation (USD); 0 = no limit.
    pub cost_budget_usd: f64,
    /// Fuzzy entity deduplication threshold (0.0-1.0); 0 = exact only.
    pub entity_fuzzy_threshold: f64,
    /// Diminishing returns: terminate when the last N iterations each added
    /// fewer than `diminishing_returns_min_entities` new entities.
    pub diminishing_returns_lookback: u32,
    pub diminishing_returns_min_entities: u32,
    pub enable_graph_db: bool,
    pub enable_adversarial_search: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            confidence_threshold: 0.6,
            cost_budget_usd: 5.0,
            entity_fuzzy_threshold: 0.85,
            diminishing_returns_lookback: 2,
            diminishing_returns_min_entities: 2,
            enable_graph_db: true,
            enable_adversarial_search: true,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_iterations: env_parse("MAX_SEARCH_ITERATIONS", d.max_iterations),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", d.confidence_threshold),
            cost_budget_usd: env_parse("COST_BUDGET_USD", d.cost_budget_usd),
            entity_fuzzy_threshold: env_parse("ENTITY_FUZZY_THRESHOLD", d.entity_fuzzy_threshold),
            diminishing_returns_lookback: env_parse(
                "DIMINISHING_RETURNS_LOOKBACK",
                d.diminishing_returns_lookback,
            ),
            diminishing_returns_min_entities: env_parse(
                "DIMINISHING_RETURNS_MIN_ENTITIES",
                d.diminishing_returns_min_entities,
            ),
            enable_graph_db: env_bool("ENABLE_GRAPH_DB", d.enable_graph_db),
            enable_adversarial_search: env_bool("ENABLE_ADVERSARIAL_SEARCH", d.enable_adversarial_search),
        }
    }
}

/// Metrics and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub tracing_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_port: 8000,
            tracing_enabled: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            log_level: env_or("LOG_LEVEL", &d.log_level),
            metrics_enabled: env_bool("METRICS_ENABLED", d.metrics_enabled),
            metrics_port: env_parse("METRICS_PORT", d.metrics_port),
            tracing_enabled: env_bool("TRACING_ENABLED", d.tracing_enabled),
        }
    }
}

// ============================================================================
// YAML overlays
// ============================================================================

/// Source-authority heuristics for confidence scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceAuthority {
    pub high_authority: Vec<String>,
    pub medium_authority: Vec<String>,
    pub overrides: HashMap<String, f64>,
    pub gov_edu_authority: f64,
    pub default_authority: f64,
}

impl Default for SourceAuthority {
    fn default() -> Self {
        Self {
            high_authority: [
                "sec.gov", "courts.gov", "edgar", "bloomberg.com", "reuters.com", "wsj.com",
                "ft.com", "linkedin.com",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            medium_authority: [
                "crunchbase.com", "pitchbook.com", "businesswire.com", "prnewswire.com",
                "wikipedia.org", "nytimes.com",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            overrides: HashMap::new(),
            gov_edu_authority: 0.85,
            default_authority: 0.4,
        }
    }
}

impl SourceAuthority {
    /// Heuristic authority score for a domain. Overrides win, then the high
    /// and medium lists, then gov/edu, then the default.
    pub fn score_for(&self, domain: &str) -> f64 {
        let domain = domain.to_lowercase();
        for (pattern, score) in &self.overrides {
            if domain.contains(&pattern.to_lowercase()) {
                return *score;
            }
        }
        if self.high_authority.iter().any(|d| domain.contains(d)) {
            return 0.9;
        }
        if self.medium_authority.iter().any(|d| domain.contains(d)) {
            return 0.7;
        }
        if domain.contains(".gov") || domain.contains(".edu") {
            return self.gov_edu_authority;
        }
        self.default_authority
    }
}

/// Rate limit policy for one domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    pub requests_per_second: f64,
    pub concurrent_limit: u32,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            concurrent_limit: 5,
        }
    }
}

/// Per-domain fetch policies with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicies {
    pub defaults: DomainPolicy,
    pub domains: HashMap<String, DomainPolicy>,
}

impl DomainPolicies {
    /// Policy for a domain; exact match first, then with `www.` stripped.
    pub fn policy_for(&self, domain: &str) -> DomainPolicy {
        let domain = domain.to_lowercase();
        if let Some(p) = self.domains.get(&domain) {
            return *p;
        }
        if let Some(bare) = domain.strip_prefix("www.") {
            if let Some(p) = self.domains.get(bare) {
                return *p;
            }
        }
        self.defaults
    }
}

/// Task-to-tier model routing overlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRouting {
    pub tasks: HashMap<String, TaskRoute>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRoute {
    pub tier: String,
}

/// Risk category descriptions surfaced in the judge prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCategories {
    pub categories: HashMap<String, String>,
}

/// Root settings container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub graph: GraphConfig,
    pub agent: AgentConfig,
    pub observability: ObservabilityConfig,
    pub source_authority: SourceAuthority,
    pub domain_policies: DomainPolicies,
    pub model_routing: ModelRouting,
    pub risk_categories: RiskCategories,
}

impl Settings {
    /// Environment-only settings with built-in YAML defaults.
    pub fn from_env() -> Self {
        Self {
            llm: LlmConfig::from_env(),
            search: SearchConfig::from_env(),
            graph: GraphConfig::from_env(),
            agent: AgentConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
            ..Default::default()
        }
    }

    /// Environment settings plus YAML overlays from `config_dir`. Missing or
    /// unreadable files keep the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> Self {
        let mut settings = Self::from_env();
        let dir = config_dir.as_ref();
        if let Some(sa) = load_yaml(dir.join("source_authority.yaml")) {
            settings.source_authority = sa;
        }
        if let Some(dp) = load_yaml(dir.join("domain_policies.yaml")) {
            settings.domain_policies = dp;
        }
        if let Some(mr) = load_yaml(dir.join("models.yaml")) {
            settings.model_routing = mr;
        }
        if let Some(rc) = load_yaml(dir.join("risk_categories.yaml")) {
            settings.risk_categories = rc;
        }
        settings
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: std::path::PathBuf) -> Option<T> {
    let text = std::fs::read_to_string(&path).ok()?;
    match serde_yml::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config_yaml_parse_failed");
            None
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_authority_tiers() {
        let sa = SourceAuthority::default();
        assert!((sa.score_for("www.sec.gov") - 0.9).abs() < f64::EPSILON);
        assert!((sa.score_for("en.wikipedia.org") - 0.7).abs() < f64::EPSILON);
        assert!((sa.score_for("finance.example.gov") - 0.85).abs() < f64::EPSILON);
        assert!((sa.score_for("randomblog.net") - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_source_authority_overrides_win() {
        let mut sa = SourceAuthority::default();
        sa.overrides.insert("sec.gov".to_string(), 0.99);
        assert!((sa.score_for("www.sec.gov") - 0.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_domain_policy_lookup_strips_www() {
        let mut dp = DomainPolicies::default();
        dp.domains.insert(
            "sec.gov".to_string(),
            DomainPolicy {
                requests_per_second: 0.5,
                concurrent_limit: 1,
            },
        );
        assert!((dp.policy_for("www.sec.gov").requests_per_second - 0.5).abs() < f64::EPSILON);
        assert!((dp.policy_for("unknown.org").requests_per_second - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_local_url() {
        assert!(is_local_url(""));
        assert!(is_local_url("http://localhost:4000/v1"));
        assert!(is_local_url("http://127.0.0.1:4000"));
        assert!(is_local_url("not a url"));
        assert!(!is_local_url("https://llm-proxy.internal.example.com/v1"));
    }

    #[test]
    fn test_proxy_enabled_requires_nonlocal_base() {
        let mut cfg = LlmConfig {
            proxy_api_key: "sk-proxy".to_string(),
            proxy_api_base: "http://localhost:4000".to_string(),
            ..Default::default()
        };
        assert!(!cfg.proxy_enabled());
        cfg.proxy_api_base = "https://proxy.example.com/v1".to_string();
        assert!(cfg.proxy_enabled());
        cfg.proxy_api_key = String::new();
        assert!(!cfg.proxy_enabled());
    }

    #[test]
    fn test_yaml_overlay_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("domain_policies.yaml"),
            "defaults:\n  requests_per_second: 1.0\n  concurrent_limit: 2\ndomains:\n  sec.gov:\n    requests_per_second: 0.25\n    concurrent_limit: 1\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path());
        assert!((settings.domain_policies.defaults.requests_per_second - 1.0).abs() < f64::EPSILON);
        assert!(
            (settings.domain_policies.policy_for("sec.gov").requests_per_second - 0.25).abs()
                < f64::EPSILON
        );
    }
}
