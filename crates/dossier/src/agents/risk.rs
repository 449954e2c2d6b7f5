// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Risk analysis: adversarial debate plus judge, in one node visit.
//!
//! Proponent and skeptic argue in parallel on the fast tier; the judge rules
//! on the deep tier with the debate, the findings, and the last twenty
//! adversarial search records as context. The transcript keeps strict causal
//! order: proponent, skeptic, judge.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::json_repair;
use crate::models::{
    DebateEntry, DebateRole, InvestigationState, Phase, RiskCategory, RiskFlag, RiskSeverity,
};
use crate::prompts;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Argues that discovered findings represent real, critical risks.
struct Proponent {
    gateway: Arc<LlmGateway>,
}

/// Argues that findings are explainable, benign, or false positives.
struct Skeptic {
    gateway: Arc<LlmGateway>,
}

impl Proponent {
    async fn argue(&self, state: &InvestigationState) -> String {
        debate_argument(&self.gateway, state, "concerning", prompts::RISK_PROPONENT_SYSTEM).await
    }
}

impl Skeptic {
    async fn argue(&self, state: &InvestigationState) -> String {
        debate_argument(
            &self.gateway,
            state,
            "explainable or benign",
            prompts::RISK_SKEPTIC_SYSTEM,
        )
        .await
    }
}

async fn debate_argument(
    gateway: &LlmGateway,
    state: &InvestigationState,
    stance: &str,
    system: &str,
) -> String {
    if state.entities.len() < 2 {
        return String::new();
    }
    let user = prompts::risk_debate_user(state, stance);
    match gateway
        .generate_for_task(ModelTask::RiskDebate, system, &user, GenerateParams::default())
        .await
    {
        Ok(argument) => argument,
        Err(e) => {
            tracing::warn!(stance, error = %e, "risk_debate_error");
            String::new()
        }
    }
}

/// The three-agent risk analysis node.
pub struct RiskAnalysis {
    gateway: Arc<LlmGateway>,
}

impl RiskAnalysis {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn format_recent_adversarial(state: &InvestigationState) -> String {
        let adversarial: Vec<_> = state
            .search_history
            .iter()
            .filter(|r| r.phase == Phase::Adversarial)
            .collect();
        let tail = adversarial.len().saturating_sub(20);
        let recent = &adversarial[tail..];
        if recent.is_empty() {
            return "(No adversarial searches recorded yet.)".to_string();
        }
        recent
            .iter()
            .map(|r| {
                format!(
                    "Query: {}\nOutcome: {} results. Useful: {}",
                    r.query,
                    r.num_results,
                    if r.was_useful { "yes" } else { "no" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn merge_flags(state: &mut InvestigationState, data: &Value) -> usize {
        let before = state.risk_flags.len();
        let empty = Vec::new();
        for rf in data
            .get("risk_flags")
            .and_then(Value::as_array)
            .unwrap_or(&empty)
        {
            let title = rf.get("title").and_then(Value::as_str).unwrap_or("").to_string();
            if title.is_empty()
                || state
                    .risk_flags
                    .iter()
                    .any(|existing| existing.title.to_lowercase() == title.to_lowercase())
            {
                continue;
            }
            let category = rf
                .get("category")
                .and_then(Value::as_str)
                .map(RiskCategory::parse_lenient)
                .unwrap_or_default();
            let severity = rf
                .get("severity")
                .and_then(Value::as_str)
                .map(RiskSeverity::parse_lenient)
                .unwrap_or_default();
            let str_vec = |key: &str| -> Vec<String> {
                rf.get(key)
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            let mut flag = RiskFlag::new(category, severity, title);
            flag.description = rf
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            flag.evidence = str_vec("evidence");
            flag.entity_ids = str_vec("entity_ids");
            flag.confidence = rf.get("confidence").and_then(Value::as_f64).unwrap_or(0.5);
            flag.mitigating_factors = str_vec("mitigating_factors");
            state.risk_flags.push(flag);
        }
        state.risk_flags.len() - before
    }

    /// Narrative part of the judge output for the transcript: the summary
    /// field when present, else the text around any JSON block.
    fn judge_narrative(data: &Value, raw: &str) -> String {
        for key in ["summary", "overall_risk_assessment"] {
            if let Some(text) = data.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return text.to_string();
                }
            }
        }
        let cleaned = raw.trim();
        let cleaned = match cleaned.split_once("```") {
            Some((before, _)) if !before.trim().is_empty() => before.trim(),
            _ => cleaned,
        };
        if cleaned.is_empty() || (cleaned.starts_with('{') && cleaned.ends_with('}')) {
            return "Narrative assessment included in structured flags.".to_string();
        }
        prompts::truncate(cleaned, 1000)
    }
}

#[async_trait]
impl Node<InvestigationState> for RiskAnalysis {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        if state.entities.len() < 2 {
            tracing::info!(reason = "insufficient entities", "risk_analysis_skipped");
            return Ok(state);
        }

        let proponent = Proponent {
            gateway: self.gateway.clone(),
        };
        let skeptic = Skeptic {
            gateway: self.gateway.clone(),
        };
        let (proponent_arg, skeptic_arg) =
            futures::join!(proponent.argue(&state), skeptic.argue(&state));
        if !proponent_arg.is_empty() {
            state.total_llm_calls += 1;
        }
        if !skeptic_arg.is_empty() {
            state.total_llm_calls += 1;
        }
        // The judge always sees both sides, even when a debater came up empty.
        let proponent_arg = if proponent_arg.is_empty() {
            "(No proponent argument available.)".to_string()
        } else {
            proponent_arg
        };
        let skeptic_arg = if skeptic_arg.is_empty() {
            "(No skeptic argument available.)".to_string()
        } else {
            skeptic_arg
        };

        let ts = Utc::now();
        state.risk_debate_transcript.push(DebateEntry {
            role: DebateRole::Proponent,
            argument: proponent_arg.clone(),
            timestamp: ts,
        });
        state.risk_debate_transcript.push(DebateEntry {
            role: DebateRole::Skeptic,
            argument: skeptic_arg.clone(),
            timestamp: ts,
        });

        let recent = Self::format_recent_adversarial(&state);
        let user = prompts::risk_analyzer_user(&state, &recent, &proponent_arg, &skeptic_arg);
        match self
            .gateway
            .generate_for_task(
                ModelTask::RiskJudge,
                prompts::RISK_ANALYZER_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(raw) => {
                state.total_llm_calls += 1;
                let data = json_repair::parse_lenient(&raw)
                    .unwrap_or_else(|| serde_json::json!({"risk_flags": []}));
                let narrative = Self::judge_narrative(&data, &raw);
                let added = Self::merge_flags(&mut state, &data);
                state.risk_debate_transcript.push(DebateEntry {
                    role: DebateRole::Judge,
                    argument: narrative,
                    timestamp: ts,
                });
                tracing::info!(
                    total_flags = state.risk_flags.len(),
                    flags_added = added,
                    "risk_analysis_done"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "risk_analysis_error");
                state.error_log.push(format!("Risk analysis: {e}"));
            }
        }
        Ok(state)
    }

    fn name(&self) -> String {
        "risk_analysis".to_string()
    }
}
