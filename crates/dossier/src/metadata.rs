// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Structured run metadata for investigation telemetry and audit trails.

use crate::models::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    #[default]
    Completed,
    TerminatedByDirector,
    Error,
}

/// Key metrics and metadata for a single investigation run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMetadata {
    pub run_id: String,
    pub subject: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub total_cost_usd: f64,
    pub iterations: u32,
    pub phases_executed: Vec<Phase>,
    pub entities_found: usize,
    pub connections_found: usize,
    pub risk_flags_count: usize,
    pub sources_accessed: usize,
    pub sources_failed: usize,
    pub termination_reason: TerminationReason,
    pub error_count: usize,
}
