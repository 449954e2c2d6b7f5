// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Dossier
//!
//! An autonomous due-diligence investigation engine: a supervisor/worker
//! state machine that searches the open web, extracts a typed
//! entity/connection graph, debates risk adversarially, persists an identity
//! graph, and synthesizes a written report with provenance and confidence
//! scores, all under an iteration cap and a cost budget.
//!
//! This crate is the core: the state model, the state-machine runtime, the
//! LLM gateway, the agent workers, and the engine that ties them together.
//! Provider and storage integrations live in their own crates
//! (`dossier-anthropic`, `dossier-openai`, `dossier-gemini`,
//! `dossier-tavily`, `dossier-brave`, `dossier-webfetch`, `dossier-neo4j`)
//! and plug in through the trait seams defined here.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────┐
//!     ┌─────→│  director  │─────────────┐ generate_report / terminate
//!     │      └────────────┘             ▼
//!     │       │        │        entity_resolution → temporal_analysis
//!     │  search_web  analyze_risks │
//!     │       ▼        ▼           ▼
//!     │  web_research  risk_analysis   graph_persist → graph_reasoning
//!     │       ▼                 │           │
//!     │  fact_extraction        │           ▼
//!     └───────┴─────────────────┘     report_generation → END
//! ```
//!
//! Every node receives the [`models::InvestigationState`], performs one
//! bounded unit of work, and returns an updated state. The engine checkpoints
//! after every node and emits progress events for streaming frontends.

pub mod agents;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod graph;
pub mod graph_store;
pub mod json_repair;
pub mod language_models;
pub mod metadata;
pub mod models;
pub mod pii;
pub mod prompts;
pub mod report;
pub mod tools;

pub use engine::{InvestigationEngine, InvestigationOutcome};
pub use error::{Error, Result};
pub use gateway::{LlmGateway, ModelTask, ModelTier, Provider};
pub use graph::{CompiledGraph, GraphState, Node, StateGraph, END};
pub use models::InvestigationState;

/// Default HTTP request timeout for integration crates.
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default HTTP connect timeout for integration crates.
pub const DEFAULT_HTTP_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
