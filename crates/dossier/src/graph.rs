// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! State-machine runtime for the investigation graph.
//!
//! A small StateGraph executor: named nodes over a shared serializable state,
//! static and conditional edges, a recursion safeguard, per-node
//! checkpointing, and an observer callback for progress emission. Nodes
//! receive the state by value and return an updated state, so there is no
//! shared mutation and checkpointing is a serialization away.

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Terminal pseudo-node name.
pub const END: &str = "__end__";

/// State types that can flow through the graph.
pub trait GraphState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> GraphState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A unit of work in the graph. Implementations capture their own
/// dependencies (gateway handles, fetchers) at construction.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Perform one bounded unit of work and return the updated state.
    async fn execute(&self, state: S) -> Result<S>;

    /// Node name used in routing, checkpoints, and progress events.
    fn name(&self) -> String;
}

type NodeFn<S> = dyn Fn(S) -> Pin<Box<dyn Future<Output = Result<S>> + Send>> + Send + Sync;

struct FnNode<S> {
    name: String,
    f: Box<NodeFn<S>>,
}

#[async_trait]
impl<S: GraphState> Node<S> for FnNode<S> {
    async fn execute(&self, state: S) -> Result<S> {
        (self.f)(state).await
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

type RouterFn<S> = dyn Fn(&S) -> String + Send + Sync;

struct ConditionalEdge<S> {
    router: Box<RouterFn<S>>,
    routes: HashMap<String, String>,
}

/// What happened at a node transition, for progress observers.
#[derive(Debug, Clone)]
pub struct Transition {
    pub seq: u64,
    pub node: String,
    pub started: bool,
}

type ObserverFn = dyn Fn(&Transition) + Send + Sync;

/// Builder for the investigation state machine.
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, String>,
    conditional_edges: HashMap<String, ConditionalEdge<S>>,
    entry_point: Option<String>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            conditional_edges: HashMap::new(),
            entry_point: None,
        }
    }

    /// Register a node.
    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) {
        self.nodes.insert(name.into(), Arc::new(node));
    }

    /// Register an async closure as a node.
    pub fn add_node_from_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(S) -> Pin<Box<dyn Future<Output = Result<S>> + Send>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.nodes.insert(
            name.clone(),
            Arc::new(FnNode {
                name,
                f: Box::new(f),
            }),
        );
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) {
        self.entry_point = Some(name.into());
    }

    /// Static edge: after `from`, run `to` (or [`END`]).
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.insert(from.into(), to.into());
    }

    /// Conditional edge: after `from`, call `router` on the state and follow
    /// the route it names. Route values may be node names or [`END`].
    pub fn add_conditional_edges<F>(
        &mut self,
        from: impl Into<String>,
        router: F,
        routes: HashMap<String, String>,
    ) where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.conditional_edges.insert(
            from.into(),
            ConditionalEdge {
                router: Box::new(router),
                routes,
            },
        );
    }

    /// Validate the graph and produce an executable form.
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let entry = self
            .entry_point
            .clone()
            .ok_or_else(|| Error::Graph("no entry point set".to_string()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(Error::Graph(format!("entry point '{entry}' is not a node")));
        }
        for (from, to) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(Error::Graph(format!("edge from unknown node '{from}'")));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(Error::Graph(format!("edge to unknown node '{to}'")));
            }
        }
        for (from, cond) in &self.conditional_edges {
            if !self.nodes.contains_key(from) {
                return Err(Error::Graph(format!(
                    "conditional edge from unknown node '{from}'"
                )));
            }
            for to in cond.routes.values() {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(Error::Graph(format!(
                        "conditional route to unknown node '{to}'"
                    )));
                }
            }
        }
        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            conditional_edges: self.conditional_edges,
            entry_point: entry,
            recursion_limit: 100,
            checkpointer: None,
            thread_id: String::new(),
            observer: None,
        })
    }
}

/// Result of a graph run.
#[derive(Debug)]
pub struct GraphResult<S> {
    pub final_state: S,
    /// Total node executions performed.
    pub steps: usize,
}

/// Executable state machine.
pub struct CompiledGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, String>,
    conditional_edges: HashMap<String, ConditionalEdge<S>>,
    entry_point: String,
    recursion_limit: usize,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    thread_id: String,
    observer: Option<Arc<ObserverFn>>,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Cap total node executions. Exceeding the cap is an error.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Save a checkpoint after every node execution, keyed by `thread_id`.
    #[must_use]
    pub fn with_checkpointer(
        mut self,
        checkpointer: Arc<dyn Checkpointer<S>>,
        thread_id: impl Into<String>,
    ) -> Self {
        self.checkpointer = Some(checkpointer);
        self.thread_id = thread_id.into();
        self
    }

    /// Observe every node transition (start and completion) with monotonic
    /// sequence numbers.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn next_node(&self, current: &str, state: &S) -> Result<Option<String>> {
        if let Some(cond) = self.conditional_edges.get(current) {
            let key = (cond.router)(state);
            let target = cond.routes.get(&key).ok_or_else(|| {
                Error::Graph(format!("router returned unknown route '{key}' from '{current}'"))
            })?;
            return Ok(if target == END { None } else { Some(target.clone()) });
        }
        if let Some(target) = self.edges.get(current) {
            return Ok(if target == END { None } else { Some(target.clone()) });
        }
        Err(Error::Graph(format!("node '{current}' has no outgoing edge")))
    }

    /// Execute from the entry point until [`END`].
    pub async fn invoke(&self, state: S) -> Result<GraphResult<S>> {
        self.invoke_from(self.entry_point.clone(), state).await
    }

    /// Execute starting at an arbitrary node (checkpoint resume).
    pub async fn invoke_from(&self, start: String, mut state: S) -> Result<GraphResult<S>> {
        let mut current = start;
        let mut steps = 0usize;
        let mut seq = 0u64;

        loop {
            if steps >= self.recursion_limit {
                return Err(Error::RecursionLimit {
                    limit: self.recursion_limit,
                });
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| Error::Graph(format!("unknown node '{current}'")))?
                .clone();

            if let Some(observer) = &self.observer {
                observer(&Transition {
                    seq,
                    node: current.clone(),
                    started: true,
                });
                seq += 1;
            }

            tracing::debug!(node = %current, step = steps, "node_start");
            state = node.execute(state).await.map_err(|e| {
                Error::node_execution(current.clone(), e)
            })?;
            steps += 1;

            if let Some(observer) = &self.observer {
                observer(&Transition {
                    seq,
                    node: current.clone(),
                    started: false,
                });
                seq += 1;
            }

            if let Some(checkpointer) = &self.checkpointer {
                let checkpoint = Checkpoint::new(&self.thread_id, &current, state.clone());
                if let Err(e) = checkpointer.save(checkpoint).await {
                    tracing::warn!(node = %current, error = %e, "checkpoint_save_failed");
                }
            }

            match self.next_node(&current, &state)? {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(GraphResult {
            final_state: state,
            steps,
        })
    }
}
