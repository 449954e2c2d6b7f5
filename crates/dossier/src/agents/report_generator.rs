// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Report generator: produces the final due diligence report.
//!
//! The model writes the analytical narrative; the template renderer wraps it
//! in the required report structure. If the renderer produces nothing the
//! narrative stands alone, and if the model call fails a deterministic
//! fallback report is built from the state. Always terminates the
//! investigation.

use crate::error::Result;
use crate::gateway::{GenerateParams, LlmGateway, ModelTask};
use crate::graph::Node;
use crate::models::InvestigationState;
use crate::pii::PiiRedactor;
use crate::prompts;
use crate::report::TemplateRenderer;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReportGenerator {
    gateway: Arc<LlmGateway>,
    renderer: TemplateRenderer,
    /// Redact even when no PII annotation demands it.
    force_redaction: bool,
}

impl ReportGenerator {
    pub fn new(gateway: Arc<LlmGateway>, force_redaction: bool) -> Self {
        Self {
            gateway,
            renderer: TemplateRenderer::new(),
            force_redaction,
        }
    }

    fn fallback_report(state: &InvestigationState) -> String {
        let mut lines = vec![
            format!("# Due Diligence Report: {}", state.subject.full_name),
            "\n## Subject Profile".to_string(),
            format!("- Name: {}", state.subject.full_name),
            format!(
                "- Role: {}",
                state.subject.current_role.as_deref().unwrap_or("Unknown")
            ),
            format!(
                "- Organization: {}",
                state
                    .subject
                    .current_organization
                    .as_deref()
                    .unwrap_or("Unknown")
            ),
            format!("\n## Entities Discovered: {}", state.entities.len()),
        ];
        for e in state.entities.iter().take(20) {
            lines.push(format!(
                "  - [{}] {} (conf: {:.2})",
                e.entity_type.as_str(),
                e.name,
                e.confidence
            ));
        }
        lines.push(format!("\n## Risk Flags: {}", state.risk_flags.len()));
        for rf in &state.risk_flags {
            lines.push(format!("  - [{}] {}", rf.severity.as_str(), rf.title));
        }
        lines.push("\n## Investigation Stats".to_string());
        lines.push(format!("  - Iterations: {}", state.iteration));
        lines.push(format!("  - Searches: {}", state.search_history.len()));
        lines.push(format!("  - LLM Calls: {}", state.total_llm_calls));
        if !state.inaccessible_urls.is_empty() {
            lines.push("\n## Sources identified but not retrievable".to_string());
            for entry in &state.inaccessible_urls {
                lines.push(format!("  - {} ({})", entry.url, entry.reason));
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Node<InvestigationState> for ReportGenerator {
    async fn execute(&self, mut state: InvestigationState) -> Result<InvestigationState> {
        let user = prompts::report_generator_user(&state);
        match self
            .gateway
            .generate_for_task(
                ModelTask::ReportSynthesis,
                prompts::REPORT_GENERATOR_SYSTEM,
                &user,
                GenerateParams::default(),
            )
            .await
        {
            Ok(narrative) => {
                state.total_llm_calls += 1;
                let rendered = self.renderer.render_report(&state, &narrative);
                if rendered.trim().is_empty() {
                    tracing::info!(length = narrative.len(), "report_generated_raw");
                    state.final_report = narrative;
                } else {
                    tracing::info!(length = rendered.len(), "report_templated");
                    state.final_report = rendered;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "report_generation_error");
                state.final_report = Self::fallback_report(&state);
            }
        }

        let redactor = PiiRedactor::new();
        let annotations = redactor.scan_text(&state.final_report);
        if !annotations.is_empty() || self.force_redaction {
            state.redacted_report = redactor.redact_report(&state.final_report, &annotations);
            state.pii_annotations = annotations;
            tracing::info!(
                annotations_found = state.pii_annotations.len(),
                "pii_scan_done"
            );
        }

        state.should_terminate = true;
        Ok(state)
    }

    fn name(&self) -> String {
        "report_generation".to_string()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::MockChatModel;
    use crate::gateway::Provider;
    use crate::models::{Entity, EntityType, RiskCategory, RiskFlag, RiskSeverity};

    fn generator(script: Vec<Result<String>>, force: bool) -> ReportGenerator {
        ReportGenerator::new(
            Arc::new(
                LlmGateway::builder()
                    .deep_model(Provider::Claude, Arc::new(MockChatModel::new("m", script)))
                    .build(),
            ),
            force,
        )
    }

    fn sample_state() -> InvestigationState {
        let mut state = InvestigationState::default();
        state.subject.full_name = "Jane Doe".into();
        state.add_entity(Entity::new("Jane Doe", EntityType::Person), None);
        state.add_entity(Entity::new("Acme", EntityType::Organization), None);
        state
    }

    #[tokio::test]
    async fn test_successful_narrative_is_templated_and_terminates() {
        let node = generator(vec![Ok("Deep analytical narrative.".into())], false);
        let out = node.execute(sample_state()).await.unwrap();
        assert!(out.should_terminate);
        assert!(out.final_report.contains("# Due Diligence Report: Jane Doe"));
        assert!(out.final_report.contains("Deep analytical narrative."));
        assert!(out.final_report.contains("## Recommendations"));
    }

    #[tokio::test]
    async fn test_llm_failure_produces_fallback_report() {
        let node = generator(
            vec![Err(crate::error::Error::authentication("401 invalid api key"))],
            false,
        );
        let mut state = sample_state();
        state.risk_flags.push(RiskFlag::new(
            RiskCategory::Litigation,
            RiskSeverity::High,
            "Pending suit",
        ));
        let out = node.execute(state).await.unwrap();
        assert!(out.should_terminate);
        assert!(out.final_report.contains("# Due Diligence Report: Jane Doe"));
        assert!(out.final_report.contains("## Entities Discovered: 2"));
        assert!(out.final_report.contains("[high] Pending suit"));
    }

    #[tokio::test]
    async fn test_pii_in_report_triggers_redaction() {
        let node = generator(
            vec![Ok("Contact subject at jane.doe@example.com for details.".into())],
            false,
        );
        let out = node.execute(sample_state()).await.unwrap();
        assert!(!out.pii_annotations.is_empty());
        assert!(out.redacted_report.contains("[EMAIL REDACTED]"));
        assert!(!out.redacted_report.contains("jane.doe@example.com"));
    }

    #[tokio::test]
    async fn test_forced_redaction_without_pii() {
        let node = generator(vec![Ok("Clean narrative.".into())], true);
        let out = node.execute(sample_state()).await.unwrap();
        assert!(!out.redacted_report.is_empty());
    }

    #[tokio::test]
    async fn test_no_redaction_when_clean_and_not_forced() {
        let node = generator(vec![Ok("Clean narrative.".into())], false);
        let out = node.execute(sample_state()).await.unwrap();
        assert!(out.redacted_report.is_empty());
    }
}
