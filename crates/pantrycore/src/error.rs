use serde::Serialize;
use thiserror::Error;

/// Top-level error for anything that makes a flow definition unusable.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown node kind '{kind}' on node {node_id}")]
    UnknownNodeKind { node_id: String, kind: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Structural errors mean the flow definition itself is broken and
    /// should be reported back to the author.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FlowError::Graph(_) | FlowError::Validation(_) | FlowError::UnknownNodeKind { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {edge_id} references missing node {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Cycle detected at node {0}")]
    Cycle(String),

    #[error("Branch arity violation on node {node_id}: {reason}")]
    BranchArity { node_id: String, reason: String },

    #[error("Trigger node {0} has incoming edges")]
    TriggerHasIncoming(String),

    #[error("Node {node_id} is reachable from more than one trigger ({first}, {second})")]
    SharedByTriggers {
        node_id: String,
        first: String,
        second: String,
    },

    #[error("Node {node_id} allows at most {max} outgoing edge(s), found {found}")]
    OutDegree {
        node_id: String,
        max: usize,
        found: usize,
    },
}

/// A node config that does not satisfy its kind's field specs.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("node {node_id}: field '{field}' {reason}")]
pub struct ValidationError {
    pub node_id: String,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        node_id: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VaultError {
    #[error("Vault key is not configured")]
    MissingKey,

    #[error("Vault key is invalid: {0}")]
    InvalidKey(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Adapter call failed: {0}")]
    Failed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Credential unavailable: {0}")]
    MissingCredential(String),
}

#[derive(Error, Debug, Clone)]
#[error("Store error: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure while evaluating a single (flow, item) pair during a tick.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("flow {flow_id} / item {item_id}: {message}")]
pub struct SchedulerTickError {
    pub flow_id: String,
    pub item_id: String,
    pub message: String,
}
