// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The investigation engine.
//!
//! Wires the agents into the state machine, runs investigations under the
//! recursion safeguard, checkpoints after every node, emits progress events,
//! and writes the output files. The state is exclusively owned here; nodes
//! receive snapshots and return replacements.

use crate::agents::{
    ConnectionMapper, EntityResolver, FactExtractor, ReportGenerator, ResearchDirector,
    RiskAnalysis, SourceVerifier, TemporalAnalyzer, WebResearcher,
};
use crate::checkpoint::{Checkpointer, FileCheckpointer};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::events::{event, ProgressEvent, ProgressSink};
use crate::gateway::LlmGateway;
use crate::graph::{Node, StateGraph, END};
use crate::graph_store::IdentityGraphStore;
use crate::metadata::{RunMetadata, TerminationReason};
use crate::models::{
    subject_slug, AgentAction, InvestigationState, SubjectProfile,
};
use crate::tools::SearchOrchestrator;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Entity count above which synthesis runs entity resolution.
const ENTITY_RESOLUTION_THRESHOLD: usize = 15;

/// Outcome of one investigation run.
pub struct InvestigationOutcome {
    pub state: InvestigationState,
    pub metadata: RunMetadata,
}

pub struct InvestigationEngine {
    settings: Settings,
    gateway: Arc<LlmGateway>,
    orchestrator: Arc<SearchOrchestrator>,
    graph_store: Option<Arc<dyn IdentityGraphStore>>,
    output_dir: PathBuf,
    debug: bool,
    redact_pii: bool,
}

impl InvestigationEngine {
    pub fn new(
        settings: Settings,
        gateway: Arc<LlmGateway>,
        orchestrator: Arc<SearchOrchestrator>,
        graph_store: Option<Arc<dyn IdentityGraphStore>>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            gateway,
            orchestrator,
            graph_store,
            output_dir: output_dir.into(),
            debug: false,
            redact_pii: false,
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact_pii = redact;
        self
    }

    fn build_graph(
        &self,
        sink: Arc<ProgressSink>,
    ) -> Result<crate::graph::CompiledGraph<InvestigationState>> {
        let mut graph: StateGraph<InvestigationState> = StateGraph::new();

        let director = Arc::new(ResearchDirector::new(
            self.gateway.clone(),
            self.settings.agent.clone(),
        ));
        let web_researcher = Arc::new(WebResearcher::new(self.orchestrator.clone(), sink.clone()));
        let fact_extractor = Arc::new(FactExtractor::new(
            self.gateway.clone(),
            self.settings.source_authority.clone(),
            self.settings.agent.entity_fuzzy_threshold,
        ));
        let risk_analysis = Arc::new(RiskAnalysis::new(self.gateway.clone()));
        let connection_mapper = Arc::new(ConnectionMapper::new(self.gateway.clone()));
        let source_verifier = Arc::new(SourceVerifier::new(self.gateway.clone()));
        let entity_resolver = Arc::new(EntityResolver::new(self.gateway.clone()));
        let temporal_analyzer = Arc::new(TemporalAnalyzer::new(self.gateway.clone()));
        let report_generator = Arc::new(ReportGenerator::new(self.gateway.clone(), self.redact_pii));

        let debug_dir = self
            .debug
            .then(|| self.output_dir.clone());

        // Director node, with optional per-iteration debug snapshots.
        {
            let director = director.clone();
            let sink = sink.clone();
            graph.add_node_from_fn("director", move |state| {
                let director = director.clone();
                let sink = sink.clone();
                let debug_dir = debug_dir.clone();
                Box::pin(async move {
                    let state = director.execute(state).await?;
                    sink.emit(node_event("director", &state));
                    if let Some(dir) = debug_dir {
                        write_debug_snapshot(&dir, &state);
                    }
                    Ok(state)
                })
            });
        }

        graph.add_node_from_fn("web_research", emitting(web_researcher, sink.clone()));
        {
            let agent = fact_extractor;
            let sink = sink.clone();
            graph.add_node_from_fn("fact_extraction", move |state| {
                let agent = agent.clone();
                let sink = sink.clone();
                Box::pin(async move {
                    let state = agent.execute(state).await?;
                    sink.emit(node_event("fact_extraction", &state));
                    sink.emit(
                        ProgressEvent::new(event::ENTITIES_UPDATE)
                            .with("entities", state.entities.len())
                            .with("connections", state.connections.len()),
                    );
                    Ok(state)
                })
            });
        }
        {
            let agent = risk_analysis;
            let sink = sink.clone();
            graph.add_node_from_fn("risk_analysis", move |state| {
                let agent = agent.clone();
                let sink = sink.clone();
                Box::pin(async move {
                    let state = agent.execute(state).await?;
                    sink.emit(node_event("risk_analysis", &state));
                    sink.emit(
                        ProgressEvent::new(event::RISKS_UPDATE)
                            .with("risk_flags", state.risk_flags.len()),
                    );
                    Ok(state)
                })
            });
        }
        graph.add_node_from_fn("connection_mapping", emitting(connection_mapper, sink.clone()));
        graph.add_node_from_fn(
            "source_verification",
            emitting(source_verifier, sink.clone()),
        );

        // Synthesis pipeline. Entity resolution only runs on large states.
        {
            let agent = entity_resolver;
            let sink = sink.clone();
            graph.add_node_from_fn("entity_resolution", move |state: InvestigationState| {
                let agent = agent.clone();
                let sink = sink.clone();
                Box::pin(async move {
                    let state = if state.entities.len() > ENTITY_RESOLUTION_THRESHOLD {
                        agent.execute(state).await?
                    } else {
                        tracing::info!(
                            reason = "entity_count_below_threshold",
                            count = state.entities.len(),
                            "entity_resolution_skipped"
                        );
                        state
                    };
                    sink.emit(node_event("entity_resolution", &state));
                    Ok(state)
                })
            });
        }
        graph.add_node_from_fn("temporal_analysis", emitting(temporal_analyzer, sink.clone()));

        // Graph persistence and reasoning share the store handle; the driver
        // opens at the start of synthesis and closes at the end.
        {
            let store = self.graph_store.clone();
            let enabled = self.settings.agent.enable_graph_db;
            let sink = sink.clone();
            graph.add_node_from_fn("graph_persist", move |mut state: InvestigationState| {
                let store = store.clone();
                let sink = sink.clone();
                Box::pin(async move {
                    if let (true, Some(store)) = (enabled, store) {
                        match persist_graph(&*store, &state).await {
                            Ok((nodes, relationships)) => {
                                tracing::info!(nodes, relationships, "graph_db_updated");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "graph_db_error");
                                state.error_log.push(format!("Graph store: {e}"));
                            }
                        }
                    }
                    sink.emit(node_event("graph_persist", &state));
                    Ok(state)
                })
            });
        }
        {
            let store = self.graph_store.clone();
            let enabled = self.settings.agent.enable_graph_db;
            let sink = sink.clone();
            graph.add_node_from_fn("graph_reasoning", move |mut state: InvestigationState| {
                let store = store.clone();
                let sink = sink.clone();
                Box::pin(async move {
                    if let (true, Some(store)) = (enabled, store) {
                        if store.is_connected() {
                            match store.discover(&state.subject.full_name).await {
                                Ok(insights) => {
                                    tracing::info!(
                                        insights = insights.len(),
                                        "graph_reasoning_complete"
                                    );
                                    state.graph_insights.extend(insights);
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "graph_reasoning_query_failed");
                                }
                            }
                        }
                        store.close().await;
                    }
                    sink.emit(node_event("graph_reasoning", &state));
                    Ok(state)
                })
            });
        }
        graph.add_node_from_fn("report_generation", emitting(report_generator, sink.clone()));

        graph.set_entry_point("director");
        let routes: HashMap<String, String> = [
            ("web_research", "web_research"),
            ("risk_analysis", "risk_analysis"),
            ("connection_mapping", "connection_mapping"),
            ("source_verification", "source_verification"),
            ("synthesis", "entity_resolution"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        graph.add_conditional_edges("director", route_from_director, routes);

        graph.add_edge("web_research", "fact_extraction");
        graph.add_edge("fact_extraction", "director");
        graph.add_edge("risk_analysis", "director");
        graph.add_edge("connection_mapping", "director");
        graph.add_edge("source_verification", "director");
        graph.add_edge("entity_resolution", "temporal_analysis");
        graph.add_edge("temporal_analysis", "graph_persist");
        graph.add_edge("graph_persist", "graph_reasoning");
        graph.add_edge("graph_reasoning", "report_generation");
        graph.add_edge("report_generation", END);

        graph.compile()
    }

    /// Run a full investigation and write all output files.
    pub async fn investigate(
        &self,
        subject_name: &str,
        current_role: Option<String>,
        current_org: Option<String>,
        max_iterations: Option<u32>,
    ) -> Result<InvestigationOutcome> {
        let max_iter = max_iterations.unwrap_or(self.settings.agent.max_iterations);
        let slug = subject_slug(subject_name);
        std::fs::create_dir_all(&self.output_dir)?;

        let sink = Arc::new(ProgressSink::new(Some(
            self.output_dir.join(format!("{slug}_progress.jsonl")),
        )));
        let checkpointer: Arc<dyn Checkpointer<InvestigationState>> =
            Arc::new(FileCheckpointer::new(self.output_dir.join("checkpoints")));

        let initial_state = InvestigationState::new(
            SubjectProfile {
                full_name: subject_name.to_string(),
                current_role,
                current_organization: current_org,
                ..Default::default()
            },
            max_iter,
        );

        tracing::info!(subject = subject_name, max_iterations = max_iter, "investigation_started");
        let started_at = Utc::now();

        let observer_sink = sink.clone();
        let app = self
            .build_graph(sink.clone())?
            .with_recursion_limit(max_iter as usize * 10 + 20)
            .with_checkpointer(checkpointer.clone(), slug.clone())
            .with_observer(move |t| {
                if t.started {
                    observer_sink.emit(ProgressEvent::new(event::NODE_START).node(t.node.clone()));
                }
            });

        let mut final_state = match app.invoke(initial_state.clone()).await {
            Ok(result) => result.final_state,
            Err(e) => {
                tracing::error!(error = %e, "investigation_error");
                // Recover the last checkpoint before falling back to the
                // initial state.
                let mut recovered = match checkpointer.latest(&slug).await {
                    Ok(Some(checkpoint)) => {
                        tracing::info!(
                            entities = checkpoint.state.entities.len(),
                            node = %checkpoint.node,
                            "recovered_from_checkpoint"
                        );
                        checkpoint.state
                    }
                    _ => initial_state,
                };
                recovered.error_log.push(format!("Investigation failed: {e}"));
                if recovered.final_report.is_empty() {
                    recovered.final_report =
                        format!("Investigation terminated due to error: {e}");
                }
                recovered
            }
        };

        final_state.estimated_cost_usd = self.gateway.total_cost();
        let metadata = build_metadata(&slug, subject_name, &final_state, started_at);

        tracing::info!(
            subject = subject_name,
            duration_seconds = metadata.duration_seconds,
            entities = metadata.entities_found,
            connections = metadata.connections_found,
            risk_flags = metadata.risk_flags_count,
            iterations = metadata.iterations,
            llm_calls = final_state.total_llm_calls,
            search_calls = final_state.total_search_calls,
            estimated_cost = final_state.estimated_cost_usd,
            "investigation_complete"
        );

        self.write_outputs(&slug, &final_state, &metadata)?;
        sink.emit(ProgressEvent::new(event::COMPLETE).progress(1.0));

        Ok(InvestigationOutcome {
            state: final_state,
            metadata,
        })
    }

    /// Resume a crashed run from its latest checkpoint. Restores cumulative
    /// cost so budget enforcement carries across restarts, then re-enters the
    /// machine at the director.
    pub async fn resume(&self, thread_id: &str) -> Result<InvestigationOutcome> {
        let checkpointer: FileCheckpointer =
            FileCheckpointer::new(self.output_dir.join("checkpoints"));
        let checkpoint = Checkpointer::<InvestigationState>::latest(&checkpointer, thread_id)
            .await?
            .ok_or_else(|| {
                Error::Checkpoint(format!("no checkpoint found for thread '{thread_id}'"))
            })?;
        let state = checkpoint.state;
        self.gateway.restore_cost(state.estimated_cost_usd);
        tracing::info!(
            thread_id,
            iteration = state.iteration,
            entities = state.entities.len(),
            "investigation_resumed"
        );
        self.investigate_from_state(state).await
    }

    async fn investigate_from_state(
        &self,
        state: InvestigationState,
    ) -> Result<InvestigationOutcome> {
        let subject = state.subject.clone();
        // Restart keeps the accumulated state but re-plans from the director.
        let outcome = self
            .investigate_inner(state, &subject.full_name)
            .await?;
        Ok(outcome)
    }

    async fn investigate_inner(
        &self,
        state: InvestigationState,
        subject_name: &str,
    ) -> Result<InvestigationOutcome> {
        let slug = subject_slug(subject_name);
        std::fs::create_dir_all(&self.output_dir)?;
        let sink = Arc::new(ProgressSink::new(Some(
            self.output_dir.join(format!("{slug}_progress.jsonl")),
        )));
        let checkpointer: Arc<dyn Checkpointer<InvestigationState>> =
            Arc::new(FileCheckpointer::new(self.output_dir.join("checkpoints")));
        let started_at = Utc::now();
        let max_iter = state.max_iterations;

        let app = self
            .build_graph(sink.clone())?
            .with_recursion_limit(max_iter as usize * 10 + 20)
            .with_checkpointer(checkpointer, slug.clone());

        let mut final_state = app.invoke(state).await?.final_state;
        final_state.estimated_cost_usd = self.gateway.total_cost();
        let metadata = build_metadata(&slug, subject_name, &final_state, started_at);
        self.write_outputs(&slug, &final_state, &metadata)?;
        sink.emit(ProgressEvent::new(event::COMPLETE).progress(1.0));
        Ok(InvestigationOutcome {
            state: final_state,
            metadata,
        })
    }

    fn write_outputs(
        &self,
        slug: &str,
        state: &InvestigationState,
        metadata: &RunMetadata,
    ) -> Result<()> {
        let path = |suffix: &str| self.output_dir.join(format!("{slug}{suffix}"));

        std::fs::write(path("_state.json"), serde_json::to_vec_pretty(state)?)?;
        std::fs::write(path("_report.md"), &state.final_report)?;
        if !state.redacted_report.is_empty() {
            std::fs::write(path("_report_redacted.md"), &state.redacted_report)?;
        }
        std::fs::write(
            path("_entities.json"),
            serde_json::to_vec_pretty(&state.entities)?,
        )?;
        std::fs::write(
            path("_metadata.json"),
            serde_json::to_vec_pretty(metadata)?,
        )?;
        tracing::info!(slug, dir = %self.output_dir.display(), "outputs_written");
        Ok(())
    }
}

fn build_metadata(
    slug: &str,
    subject_name: &str,
    state: &InvestigationState,
    started_at: chrono::DateTime<Utc>,
) -> RunMetadata {
    let completed_at = Utc::now();
    let termination_reason = if !state.error_log.is_empty() {
        TerminationReason::Error
    } else if state.should_terminate {
        TerminationReason::TerminatedByDirector
    } else {
        TerminationReason::Completed
    };
    RunMetadata {
        run_id: slug.to_string(),
        subject: subject_name.to_string(),
        started_at: Some(started_at),
        completed_at: Some(completed_at),
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        total_cost_usd: state.estimated_cost_usd,
        iterations: state.iteration,
        phases_executed: state.phases_executed.clone(),
        entities_found: state.entities.len(),
        connections_found: state.connections.len(),
        risk_flags_count: state.risk_flags.len(),
        sources_accessed: state.search_history.len(),
        sources_failed: state.inaccessible_urls.len(),
        termination_reason,
        error_count: state.error_log.len(),
    }
}

/// Router for the director's conditional edge.
fn route_from_director(state: &InvestigationState) -> String {
    let Some(decision) = &state.last_decision else {
        return "web_research".to_string();
    };
    match decision.next_action {
        AgentAction::SearchWeb | AgentAction::ExtractFacts | AgentAction::UpdateGraph => {
            "web_research".to_string()
        }
        AgentAction::AnalyzeRisks => "risk_analysis".to_string(),
        AgentAction::MapConnections => "connection_mapping".to_string(),
        AgentAction::VerifySources => "source_verification".to_string(),
        AgentAction::GenerateReport | AgentAction::Terminate => "synthesis".to_string(),
    }
}

fn node_event(node: &str, state: &InvestigationState) -> ProgressEvent {
    let progress = if node == "report_generation" {
        1.0
    } else {
        (f64::from(state.iteration) / f64::from(state.max_iterations.max(1))).min(0.9)
    };
    ProgressEvent::new(event::NODE)
        .node(node)
        .phase(state.current_phase.as_str())
        .iteration(state.iteration)
        .progress(progress)
}

/// Wrap an agent node in a closure that emits a `node` event after it runs.
fn emitting<N: Node<InvestigationState> + 'static>(
    agent: Arc<N>,
    sink: Arc<ProgressSink>,
) -> impl Fn(
    InvestigationState,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<InvestigationState>> + Send>,
> {
    move |state| {
        let agent = agent.clone();
        let sink = sink.clone();
        Box::pin(async move {
            let name = agent.name();
            let state = agent.execute(state).await?;
            sink.emit(node_event(&name, &state));
            Ok(state)
        })
    }
}

async fn persist_graph(
    store: &dyn IdentityGraphStore,
    state: &InvestigationState,
) -> Result<(usize, usize)> {
    store.connect().await?;
    store.clear().await?;
    let counts = store.persist(state).await?;
    Ok((counts.nodes, counts.relationships))
}

fn write_debug_snapshot(output_dir: &std::path::Path, state: &InvestigationState) {
    let slug = subject_slug(&state.subject.full_name);
    let dir = output_dir.join(&slug);
    let write = || -> Result<()> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("iteration_{}.json", state.iteration));
        std::fs::write(&path, serde_json::to_vec_pretty(state)?)?;
        Ok(())
    };
    if let Err(e) = write() {
        tracing::debug!(error = %e, "debug_snapshot_write_failed");
    }
}
