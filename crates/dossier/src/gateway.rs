// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Unified LLM gateway with tier routing, budget enforcement, retry
//! classification, and provider failover.
//!
//! One gateway per investigation. Agent code declares a task; the gateway
//! resolves task → tier → provider, enforces the cost budget before every
//! call, retries transient failures with exponential backoff, and switches
//! to the tier's designated fallback provider when the primary keeps failing.

use crate::config::ModelRouting;
use crate::error::{Error, Result};
use crate::language_models::{CallOptions, ChatModel, Message};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Openai,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Openai => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

/// Cost tier: DEEP for complex reasoning, FAST for routine tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Deep,
    Fast,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Deep => "deep",
            ModelTier::Fast => "fast",
        }
    }
}

/// Per-role task identifiers for fine-grained routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    ResearchDirector,
    FactExtraction,
    RiskDebate,
    RiskJudge,
    ReportSynthesis,
    EntityResolution,
    TemporalAnalysis,
    SourceVerification,
    ConnectionMapping,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::ResearchDirector => "research_director",
            ModelTask::FactExtraction => "fact_extraction",
            ModelTask::RiskDebate => "risk_debate",
            ModelTask::RiskJudge => "risk_judge",
            ModelTask::ReportSynthesis => "report_synthesis",
            ModelTask::EntityResolution => "entity_resolution",
            ModelTask::TemporalAnalysis => "temporal_analysis",
            ModelTask::SourceVerification => "source_verification",
            ModelTask::ConnectionMapping => "connection_mapping",
        }
    }

    /// Default tier when the routing overlay does not name this task.
    pub fn default_tier(&self) -> ModelTier {
        match self {
            ModelTask::ResearchDirector
            | ModelTask::RiskJudge
            | ModelTask::ReportSynthesis
            | ModelTask::TemporalAnalysis
            | ModelTask::ConnectionMapping => ModelTier::Deep,
            _ => ModelTier::Fast,
        }
    }
}

/// Provider preference per tier, as data. Fallback selection is "next
/// configured provider after the primary in this order".
const DEEP_ORDER: [Provider; 3] = [Provider::Claude, Provider::Openai, Provider::Gemini];
const FAST_ORDER: [Provider; 3] = [Provider::Openai, Provider::Gemini, Provider::Claude];

/// Approximate cost per 1K tokens (input, output), USD.
fn cost_per_1k(provider: Provider) -> (f64, f64) {
    match provider {
        Provider::Claude => (0.003, 0.015),
        Provider::Openai => (0.002, 0.008),
        Provider::Gemini => (0.00125, 0.005),
    }
}

/// Model-name substrings that identify reasoning/thinking models. These burn
/// tokens internally, so they get a larger output budget and must not be
/// asked for a JSON-object response format.
const REASONING_MODEL_PATTERNS: [&str; 7] =
    ["o1", "o3", "o4", "gemini-2.5", "deepseek-r", "qwen-qwq", "qwq"];

const REASONING_MODEL_MAX_TOKENS: u32 = 16_000;

/// Phrases indicating the model hit its output token limit.
const LENGTH_LIMIT_PHRASES: [&str; 5] = [
    "length limit was reached",
    "finish_reason: length",
    "max_tokens",
    "context_length_exceeded",
    "maximum context length",
];

pub fn is_reasoning_model(model_name: &str) -> bool {
    let name = model_name.to_lowercase();
    REASONING_MODEL_PATTERNS.iter().any(|p| name.contains(p))
}

fn is_length_limit_error(err: &Error) -> bool {
    let msg = err.to_string().to_lowercase();
    LENGTH_LIMIT_PHRASES.iter().any(|p| msg.contains(p))
}

/// Estimate call cost from character counts (chars/4 ≈ tokens).
fn estimate_cost(provider: Provider, input_chars: usize, output_chars: usize) -> f64 {
    let (input_rate, output_rate) = cost_per_1k(provider);
    let input_tokens = input_chars as f64 / 4.0;
    let output_tokens = output_chars as f64 / 4.0;
    (input_tokens / 1000.0) * input_rate + (output_tokens / 1000.0) * output_rate
}

/// Assumed output size for the pre-call budget check (chars ≈ 2K tokens).
const BUDGET_CHECK_OUTPUT_CHARS: usize = 8000;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_MIN_BACKOFF: Duration = Duration::from_secs(2);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-call parameters agents pass to the gateway.
#[derive(Debug, Clone, Default)]
pub struct GenerateParams {
    pub temperature: Option<f32>,
    /// Request a JSON-object response format (disabled for reasoning models).
    pub json_mode: bool,
}

/// Unified LLM gateway. See module docs.
pub struct LlmGateway {
    deep_models: HashMap<Provider, Arc<dyn ChatModel>>,
    fast_models: HashMap<Provider, Arc<dyn ChatModel>>,
    routing: HashMap<String, ModelTier>,
    budget_usd: f64,
    total_cost: Mutex<f64>,
}

/// Builder for [`LlmGateway`].
#[derive(Default)]
pub struct LlmGatewayBuilder {
    deep_models: HashMap<Provider, Arc<dyn ChatModel>>,
    fast_models: HashMap<Provider, Arc<dyn ChatModel>>,
    routing: HashMap<String, ModelTier>,
    budget_usd: f64,
}

impl LlmGatewayBuilder {
    #[must_use]
    pub fn deep_model(mut self, provider: Provider, model: Arc<dyn ChatModel>) -> Self {
        self.deep_models.insert(provider, model);
        self
    }

    #[must_use]
    pub fn fast_model(mut self, provider: Provider, model: Arc<dyn ChatModel>) -> Self {
        self.fast_models.insert(provider, model);
        self
    }

    /// Cost budget in USD; 0 disables enforcement.
    #[must_use]
    pub fn budget_usd(mut self, budget: f64) -> Self {
        self.budget_usd = budget;
        self
    }

    /// Apply a task→tier routing overlay.
    #[must_use]
    pub fn routing(mut self, routing: &ModelRouting) -> Self {
        for (task, route) in &routing.tasks {
            let tier = match route.tier.as_str() {
                "deep" => ModelTier::Deep,
                "fast" => ModelTier::Fast,
                _ => continue,
            };
            self.routing.insert(task.clone(), tier);
        }
        self
    }

    pub fn build(self) -> LlmGateway {
        LlmGateway {
            deep_models: self.deep_models,
            fast_models: self.fast_models,
            routing: self.routing,
            budget_usd: self.budget_usd,
            total_cost: Mutex::new(0.0),
        }
    }
}

impl LlmGateway {
    pub fn builder() -> LlmGatewayBuilder {
        LlmGatewayBuilder::default()
    }

    /// Total estimated cost across all calls so far.
    pub fn total_cost(&self) -> f64 {
        *self.total_cost.lock()
    }

    /// Restore cumulative cost (checkpoint resume) so budget enforcement
    /// carries across process restarts.
    pub fn restore_cost(&self, usd: f64) {
        *self.total_cost.lock() = usd;
    }

    fn models_for(&self, tier: ModelTier) -> &HashMap<Provider, Arc<dyn ChatModel>> {
        match tier {
            ModelTier::Deep => &self.deep_models,
            ModelTier::Fast => &self.fast_models,
        }
    }

    fn preference_order(tier: ModelTier) -> &'static [Provider; 3] {
        match tier {
            ModelTier::Deep => &DEEP_ORDER,
            ModelTier::Fast => &FAST_ORDER,
        }
    }

    /// Best available provider for the tier, by preference order. A tier with
    /// no dedicated model falls back to the other tier's registry.
    pub fn resolve_tier(&self, tier: ModelTier) -> Result<Provider> {
        let models = self.models_for(tier);
        for provider in Self::preference_order(tier) {
            if models.contains_key(provider) {
                return Ok(*provider);
            }
        }
        let other = self.models_for(match tier {
            ModelTier::Deep => ModelTier::Fast,
            ModelTier::Fast => ModelTier::Deep,
        });
        for provider in Self::preference_order(tier) {
            if other.contains_key(provider) {
                return Ok(*provider);
            }
        }
        Err(Error::api(format!(
            "No LLM models available for tier '{}'. Configure at least one provider key.",
            tier.as_str()
        )))
    }

    /// The designated fallback: next configured provider after the primary in
    /// the tier's preference order.
    pub fn fallback_provider(&self, tier: ModelTier, primary: Provider) -> Option<Provider> {
        let models = self.models_for(tier);
        let order = Self::preference_order(tier);
        let mut found_primary = false;
        for provider in order {
            if *provider == primary {
                found_primary = true;
                continue;
            }
            if found_primary && models.contains_key(provider) {
                return Some(*provider);
            }
        }
        None
    }

    fn model(&self, tier: ModelTier, provider: Provider) -> Result<Arc<dyn ChatModel>> {
        self.models_for(tier)
            .get(&provider)
            .or_else(|| {
                // Tier registry miss: use the other tier's model for the provider.
                self.models_for(match tier {
                    ModelTier::Deep => ModelTier::Fast,
                    ModelTier::Fast => ModelTier::Deep,
                })
                .get(&provider)
            })
            .cloned()
            .ok_or_else(|| {
                Error::api(format!("No model configured for provider '{}'", provider.as_str()))
            })
    }

    /// Model name serving a tier right now (for logs and reasoning checks).
    pub fn tier_model_name(&self, tier: ModelTier) -> String {
        self.resolve_tier(tier)
            .and_then(|p| self.model(tier, p))
            .map(|m| m.model_name().to_string())
            .unwrap_or_default()
    }

    /// Whether the tier's current model is a reasoning model.
    pub fn tier_is_reasoning(&self, tier: ModelTier) -> bool {
        is_reasoning_model(&self.tier_model_name(tier))
    }

    /// Tier for a task: routing overlay first, then the built-in defaults.
    pub fn tier_for_task(&self, task: ModelTask) -> ModelTier {
        self.routing
            .get(task.as_str())
            .copied()
            .unwrap_or_else(|| task.default_tier())
    }

    fn check_budget(&self, provider: Provider, input_chars: usize) -> Result<()> {
        if self.budget_usd <= 0.0 {
            return Ok(());
        }
        let next_cost = estimate_cost(provider, input_chars, BUDGET_CHECK_OUTPUT_CHARS);
        let total = *self.total_cost.lock();
        if total + next_cost > self.budget_usd {
            return Err(Error::budget_exhausted(format!(
                "Cost budget ${:.2} exceeded (current ${:.4}, next ~${:.4})",
                self.budget_usd, total, next_cost
            )));
        }
        Ok(())
    }

    fn track_cost(&self, provider: Provider, input_chars: usize, output_chars: usize) {
        let cost = estimate_cost(provider, input_chars, output_chars);
        *self.total_cost.lock() += cost;
        metrics::counter!("dossier_llm_calls_total", "provider" => provider.as_str()).increment(1);
    }

    /// Generate for a task role. Resolves the tier and delegates.
    pub async fn generate_for_task(
        &self,
        task: ModelTask,
        system_prompt: &str,
        user_prompt: &str,
        params: GenerateParams,
    ) -> Result<String> {
        let tier = self.tier_for_task(task);
        self.generate_for_tier(tier, system_prompt, user_prompt, params, task.as_str())
            .await
    }

    /// Generate using the tier's primary provider; on a transient failure
    /// after retries, switch to the designated fallback provider once.
    pub async fn generate_for_tier(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        params: GenerateParams,
        task: &str,
    ) -> Result<String> {
        let primary = self.resolve_tier(tier)?;
        let input_chars = system_prompt.len() + user_prompt.len();
        self.check_budget(primary, input_chars)?;

        let primary_err = match self
            .generate_for_provider(primary, tier, system_prompt, user_prompt, &params, task)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        let Some(fallback) = self.fallback_provider(tier, primary) else {
            return Err(primary_err);
        };

        let err_str = primary_err.to_string();
        let err_code = if err_str.contains("429") {
            "429"
        } else if err_str.to_lowercase().contains("timeout") {
            "timeout"
        } else {
            "transient"
        };
        let primary_model = self
            .model(tier, primary)
            .map(|m| m.model_name().to_string())
            .unwrap_or_default();
        let fallback_model = self
            .model(tier, fallback)
            .map(|m| m.model_name().to_string())
            .unwrap_or_default();
        tracing::warn!(
            tier = tier.as_str(),
            primary_provider = primary.as_str(),
            primary_model = %primary_model,
            fallback_provider = fallback.as_str(),
            fallback_model = %fallback_model,
            error_code = err_code,
            error = %&err_str[..err_str.len().min(120)],
            task,
            "llm_fallback_triggered"
        );
        metrics::counter!(
            "dossier_llm_fallback_total",
            "primary" => primary.as_str(),
            "fallback" => fallback.as_str()
        )
        .increment(1);

        self.check_budget(fallback, input_chars)?;
        self.generate_for_provider(fallback, tier, system_prompt, user_prompt, &params, task)
            .await
    }

    async fn generate_for_provider(
        &self,
        provider: Provider,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerateParams,
        task: &str,
    ) -> Result<String> {
        let model = self.model(tier, provider)?;
        let reasoning = is_reasoning_model(model.model_name());

        let mut options = CallOptions {
            temperature: params.temperature,
            max_tokens: None,
            json_mode: params.json_mode && !reasoning,
        };
        if reasoning {
            options.max_tokens = Some(REASONING_MODEL_MAX_TOKENS);
        }

        let messages = [
            Message::system(system_prompt),
            Message::human(user_prompt),
        ];
        let input_chars = system_prompt.len() + user_prompt.len();

        let mut attempt = 1u32;
        loop {
            match model.generate(&messages, &options).await {
                Ok(content) => {
                    self.track_cost(provider, input_chars, content.len());
                    return Ok(content);
                }
                Err(e) if options.json_mode && is_length_limit_error(&e) => {
                    // A JSON-constrained response hit the token cap. Retry once
                    // unconstrained so the caller's repair layer can operate.
                    tracing::warn!(
                        tier = tier.as_str(),
                        provider = provider.as_str(),
                        task,
                        error = %e,
                        "json_mode_length_limit_fallback"
                    );
                    options.json_mode = false;
                    continue;
                }
                Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS => {
                    let backoff = RETRY_MIN_BACKOFF
                        .saturating_mul(1 << (attempt - 1))
                        .min(RETRY_MAX_BACKOFF);
                    tracing::warn!(
                        attempt,
                        provider = provider.as_str(),
                        task,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "llm_retry"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate a structured response by embedding a schema description in
    /// the prompt and parsing the reply.
    pub async fn generate_structured<T: serde::de::DeserializeOwned>(
        &self,
        tier: ModelTier,
        system_prompt: &str,
        user_prompt: &str,
        schema_hint: &str,
        task: &str,
    ) -> Result<T> {
        let schema_system = format!(
            "{system_prompt}\n\nYou MUST respond with valid JSON matching this schema:\n{schema_hint}\n\nRespond with ONLY the JSON object, no other text."
        );
        let raw = self
            .generate_for_tier(
                tier,
                &schema_system,
                user_prompt,
                GenerateParams {
                    json_mode: true,
                    ..Default::default()
                },
                task,
            )
            .await?;
        let value = crate::json_repair::parse_lenient(&raw)
            .ok_or_else(|| Error::Validation("structured output was not parseable JSON".into()))?;
        Ok(serde_json::from_value(value)?)
    }
}
