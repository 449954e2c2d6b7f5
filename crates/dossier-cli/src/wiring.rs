// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Wires configuration into concrete providers and the engine.
//!
//! Proxy mode substitutes a single OpenAI-compatible endpoint for all three
//! logical providers, routing by model name. Local proxy base URLs are
//! rejected (deployed environments cannot reach a laptop's localhost).

use anyhow::Context;
use dossier::config::Settings;
use dossier::gateway::{LlmGateway, Provider};
use dossier::graph_store::IdentityGraphStore;
use dossier::language_models::ChatModel;
use dossier::tools::{SearchOrchestrator, SearchProvider};
use dossier::InvestigationEngine;
use dossier_anthropic::ChatAnthropic;
use dossier_brave::BraveSearch;
use dossier_gemini::ChatGemini;
use dossier_neo4j::Neo4jStore;
use dossier_openai::ChatOpenAI;
use dossier_tavily::TavilySearch;
use std::sync::Arc;

pub fn build_engine(
    output_dir: &str,
    budget_override: Option<f64>,
    debug: bool,
    redact_pii: bool,
) -> anyhow::Result<InvestigationEngine> {
    let settings = Settings::load("config");
    let budget = budget_override.unwrap_or(settings.agent.cost_budget_usd);

    let gateway = Arc::new(build_gateway(&settings, budget)?);
    let orchestrator = build_orchestrator(&settings)?;
    let graph_store: Option<Arc<dyn IdentityGraphStore>> = settings
        .agent
        .enable_graph_db
        .then(|| {
            Arc::new(Neo4jStore::new(settings.graph.clone())) as Arc<dyn IdentityGraphStore>
        });

    Ok(
        InvestigationEngine::new(settings, gateway, orchestrator, graph_store, output_dir)
            .with_debug(debug)
            .with_redaction(redact_pii),
    )
}

fn build_gateway(settings: &Settings, budget: f64) -> anyhow::Result<LlmGateway> {
    let llm = &settings.llm;
    let mut builder = LlmGateway::builder()
        .budget_usd(budget)
        .routing(&settings.model_routing);

    if llm.proxy_enabled() {
        tracing::info!(base = %llm.proxy_api_base, "llm_proxy_mode");
        let proxy = |model: &str, tag: &str| -> Arc<dyn ChatModel> {
            Arc::new(
                ChatOpenAI::new(llm.proxy_api_key.clone(), model)
                    .with_api_base(llm.proxy_api_base.clone())
                    .with_provider_tag(tag)
                    .with_temperature(llm.temperature)
                    .with_max_tokens(llm.max_tokens),
            )
        };
        builder = builder
            .deep_model(Provider::Claude, proxy(&llm.claude_model, "claude"))
            .fast_model(Provider::Claude, proxy(&llm.claude_fast_model, "claude"))
            .deep_model(Provider::Openai, proxy(&llm.openai_model, "openai"))
            .fast_model(Provider::Openai, proxy(&llm.openai_fast_model, "openai"))
            .deep_model(Provider::Gemini, proxy(&llm.gemini_model, "gemini"))
            .fast_model(Provider::Gemini, proxy(&llm.gemini_fast_model, "gemini"));
        return Ok(builder.build());
    }

    if !llm.proxy_api_key.trim().is_empty() {
        tracing::warn!(
            base = %llm.proxy_api_base,
            "proxy key set but base URL is local or unset; using direct provider keys"
        );
    }

    let mut any = false;
    if !llm.anthropic_api_key.is_empty() {
        any = true;
        builder = builder
            .deep_model(
                Provider::Claude,
                Arc::new(
                    ChatAnthropic::new(llm.anthropic_api_key.clone(), llm.claude_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_tokens(llm.max_tokens),
                ),
            )
            .fast_model(
                Provider::Claude,
                Arc::new(
                    ChatAnthropic::new(llm.anthropic_api_key.clone(), llm.claude_fast_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_tokens(llm.max_tokens),
                ),
            );
    }
    if !llm.openai_api_key.is_empty() {
        any = true;
        builder = builder
            .deep_model(
                Provider::Openai,
                Arc::new(
                    ChatOpenAI::new(llm.openai_api_key.clone(), llm.openai_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_tokens(llm.max_tokens),
                ),
            )
            .fast_model(
                Provider::Openai,
                Arc::new(
                    ChatOpenAI::new(llm.openai_api_key.clone(), llm.openai_fast_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_tokens(llm.max_tokens),
                ),
            );
    }
    if !llm.google_api_key.is_empty() {
        any = true;
        builder = builder
            .deep_model(
                Provider::Gemini,
                Arc::new(
                    ChatGemini::new(llm.google_api_key.clone(), llm.gemini_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_output_tokens(llm.max_tokens),
                ),
            )
            .fast_model(
                Provider::Gemini,
                Arc::new(
                    ChatGemini::new(llm.google_api_key.clone(), llm.gemini_fast_model.clone())
                        .with_temperature(llm.temperature)
                        .with_max_output_tokens(llm.max_tokens),
                ),
            );
    }
    if !any {
        anyhow::bail!(
            "No LLM provider configured. Set ANTHROPIC_API_KEY, OPENAI_API_KEY, \
             GOOGLE_API_KEY, or an LLM_PROXY_API_KEY with a non-local LLM_PROXY_API_BASE."
        );
    }
    Ok(builder.build())
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<Arc<SearchOrchestrator>> {
    let search = &settings.search;
    let tavily: Arc<dyn SearchProvider> = Arc::new(TavilySearch::new(search.tavily_api_key.clone()));
    let brave: Option<Arc<dyn SearchProvider>> = (!search.brave_api_key.is_empty())
        .then(|| Arc::new(BraveSearch::new(search.brave_api_key.clone())) as Arc<dyn SearchProvider>);

    // The fetcher reuses a lightweight Tavily handle for relocated-content
    // searches during dead-domain recovery.
    let relocation: Arc<dyn SearchProvider> = Arc::new(
        TavilySearch::new(search.tavily_api_key.clone())
            .with_search_depth("basic")
            .with_raw_content(false),
    );
    let fetcher = dossier_webfetch::build_fetcher(
        search,
        settings.domain_policies.clone(),
        Some(relocation),
    )
    .context("failed to build tiered fetcher")?;

    Ok(Arc::new(SearchOrchestrator::new(
        tavily,
        brave,
        fetcher,
        search.max_results_per_query,
    )))
}
