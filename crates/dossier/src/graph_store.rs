// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Identity-graph persistence seam.
//!
//! `dossier-neo4j` implements this trait; the synthesis pipeline drives it
//! through a handle owned by the engine. The driver is opened at the start of
//! synthesis (persist node) and closed at the end (reasoning node).

use crate::error::Result;
use crate::models::{GraphInsight, InvestigationState};
use async_trait::async_trait;

/// Counts reported by a persistence pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// A graph database holding the identity graph for one investigation.
#[async_trait]
pub trait IdentityGraphStore: Send + Sync {
    /// Open the driver. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Close the driver.
    async fn close(&self);

    /// Whether a usable connection exists.
    fn is_connected(&self) -> bool;

    /// Wipe the existing graph (single-tenant store).
    async fn clear(&self) -> Result<()>;

    /// Ensure uniqueness constraints and indexes, then upsert all entities,
    /// connections, and risk flags from the state.
    async fn persist(&self, state: &InvestigationState) -> Result<PersistCounts>;

    /// Run the discovery queries against the populated graph.
    async fn discover(&self, subject_name: &str) -> Result<Vec<GraphInsight>>;
}
