//! Error taxonomy for the routing engine.
//!
//! Realtime-thread errors (`EngineError`) are kept cheap to construct: no
//! heap allocation on the hot path beyond what the variant's fixed fields
//! require. Build-time errors (`BuildError`) happen off the audio thread and
//! may carry owned diagnostic data freely.

use thiserror::Error;

use crate::graph_node::NodeId;

/// Errors raised while processing a single cycle, or while configuring the
/// engine before the first cycle runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The graph contains a cycle; the offending node ids are the ones
    /// `GraphBuilder` found still unvisited after topological peeling.
    #[error("graph contains a cycle through nodes {nodes:?}")]
    GraphCyclic { nodes: Vec<NodeId> },

    /// A cycle observed a graph swap race: the generation read at kickoff
    /// no longer matches the generation read at completion.
    #[error("graph was swapped mid-cycle (generation {before} -> {after})")]
    GraphSwapped { before: u64, after: u64 },

    /// A worker did not finish its share of the cycle within budget.
    #[error("xrun: cycle took {elapsed_us}us, budget was {budget_us}us")]
    Xrun { elapsed_us: u64, budget_us: u64 },

    /// A plugin node panicked or returned an error while processing.
    #[error("plugin fault at node {node:?}: {reason}")]
    PluginFault { node: NodeId, reason: String },

    /// The audio backend delivered fewer frames than it declared.
    #[error("buffer underrun: backend declared {declared} frames, delivered {delivered}")]
    BufferUnderrun { declared: usize, delivered: usize },

    #[error("audio backend lost: {0}")]
    BackendLost(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    /// True for errors that should not stop the transport, only be reported.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Xrun { .. } | EngineError::PluginFault { .. } | EngineError::GraphSwapped { .. }
        )
    }
}

/// Errors raised while (re)building a graph. Happens on non-realtime
/// threads, so these may carry owned `String`/`Vec` diagnostics freely.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("graph contains a cycle through nodes {0:?}")]
    Cyclic(Vec<NodeId>),

    #[error("port {0:?} not found")]
    PortNotFound(crate::port::PortId),

    #[error("cannot connect {from:?} -> {to:?}: port kind mismatch ({from_kind:?} != {to_kind:?})")]
    KindMismatch {
        from: crate::port::PortId,
        to: crate::port::PortId,
        from_kind: crate::port::PortKind,
        to_kind: crate::port::PortKind,
    },

    #[error("node {0:?} not found")]
    NodeNotFound(NodeId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<BuildError> for EngineError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::Cyclic(nodes) => EngineError::GraphCyclic { nodes },
            other => EngineError::Config(other.to_string()),
        }
    }
}

/// Errors surfaced at the plugin-host boundary. Converted to
/// `EngineError::PluginFault` by the node that owns the plugin instance, per
/// the propagation rule that plugin failures never unwind through the
/// scheduler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("failed to load plugin: {0}")]
    LoadFailed(String),
    #[error("plugin initialization failed: {0}")]
    InitFailed(String),
    #[error("processing error: {0}")]
    ProcessError(String),
    #[error("parameter error: {0}")]
    ParameterError(String),
    #[error("preset error: {0}")]
    PresetError(String),
    #[error("plugin format {0:?} not supported on this platform")]
    UnsupportedFormat(crate::plugin_host::types::PluginFormat),
}

impl PluginError {
    pub fn into_engine_error(self, node: NodeId) -> EngineError {
        EngineError::PluginFault {
            node,
            reason: self.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type BuildResult<T> = Result<T, BuildError>;
pub type PluginResult<T> = Result<T, PluginError>;
