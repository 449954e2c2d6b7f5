// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Progress event emission.
//!
//! The engine appends newline-delimited JSON events to
//! `<slug>_progress.jsonl` so frontends can stream investigation progress.
//! Ordering is monotonic via a sequence counter; the write path swallows I/O
//! errors (progress is best-effort and must never sink a run).

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Well-known progress event names.
pub mod event {
    pub const NODE_START: &str = "node_start";
    pub const NODE: &str = "node";
    pub const SEARCH: &str = "search";
    pub const LOG: &str = "log";
    pub const ENTITIES_UPDATE: &str = "entities_update";
    pub const RISKS_UPDATE: &str = "risks_update";
    pub const COMPLETE: &str = "complete";
}

/// One progress event on the stream.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Coarse completion estimate in [0, 1].
    pub progress: f64,
    pub ts: String,
    pub seq: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            node: None,
            label: None,
            phase: None,
            iteration: None,
            progress: 0.0,
            ts: String::new(),
            seq: 0,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    #[must_use]
    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.extra
            .insert(key.to_string(), json!(value));
        self
    }
}

/// Appends progress events to a JSONL file.
pub struct ProgressSink {
    path: Option<PathBuf>,
    seq: AtomicU64,
    file_lock: Mutex<()>,
}

impl ProgressSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            seq: AtomicU64::new(0),
            file_lock: Mutex::new(()),
        }
    }

    /// A sink that drops everything (tests, resume probes).
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Append one event; stamps sequence number and timestamp.
    pub fn emit(&self, mut event: ProgressEvent) {
        event.seq = self.seq.fetch_add(1, Ordering::SeqCst);
        event.ts = Utc::now().to_rfc3339();
        let Some(path) = &self.path else { return };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let _guard = self.file_lock.lock();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::debug!(path = %path.display(), error = %e, "progress_write_failed");
        }
    }
}
