// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Checkpointing for graph state persistence.
//!
//! A checkpoint is taken after every node execution, keyed by a thread id
//! (the subject slug), so a crashed investigation can resume from its last
//! completed node. Checkpoints are stored as JSON: the state is already
//! serde-JSON for the output files, and resume debugging wants readable
//! artifacts.

use crate::error::{Error, Result};
use crate::graph::GraphState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A snapshot of graph state after one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub thread_id: String,
    /// The node that just completed.
    pub node: String,
    pub state: S,
    pub created_at: DateTime<Utc>,
}

impl<S> Checkpoint<S> {
    pub fn new(thread_id: impl Into<String>, node: impl Into<String>, state: S) -> Self {
        Self {
            thread_id: thread_id.into(),
            node: node.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for checkpoints.
#[async_trait]
pub trait Checkpointer<S: GraphState>: Send + Sync {
    /// Persist a checkpoint, replacing any previous one for the thread.
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()>;

    /// Load the most recent checkpoint for a thread, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>>;
}

/// In-memory checkpointer for tests and single-process runs.
pub struct MemoryCheckpointer<S> {
    store: Mutex<HashMap<String, Checkpoint<S>>>,
}

impl<S> Default for MemoryCheckpointer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MemoryCheckpointer<S> {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S: GraphState> Checkpointer<S> for MemoryCheckpointer<S> {
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()> {
        self.store
            .lock()
            .insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
        Ok(self.store.lock().get(thread_id).cloned())
    }
}

/// File-backed checkpointer. One JSON file per thread id, written through a
/// temporary file and renamed so readers never see a partial checkpoint.
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        // Thread ids are subject slugs (lowercase alphanumeric + underscore),
        // but sanitize anyway so a hostile id cannot escape the directory.
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}_checkpoint.json"))
    }
}

#[async_trait]
impl<S: GraphState> Checkpointer<S> for FileCheckpointer {
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()> {
        let path = self.path_for(&checkpoint.thread_id);
        let dir = self.dir.clone();
        let payload = serde_json::to_vec_pretty(&checkpoint)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, &payload)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Checkpoint(format!("checkpoint write task failed: {e}")))?
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
        let path = self.path_for(thread_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_slice(&data)
            .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint {}: {e}", path.display())))?;
        Ok(Some(checkpoint))
    }
}
