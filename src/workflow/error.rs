//! Workflow graph-interpretation errors (§4.6).

use uuid::Uuid;

use crate::error::Reason;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("node not found in graph {graph}: {node}")]
    NodeNotFound { graph: String, node: String },

    #[error("no transition out of node {0} had a satisfied guard")]
    NoSatisfiedTransition(String),

    #[error("task node {node} failed: {error}")]
    TaskFailed { node: String, error: String },

    #[error("guard expression error: {0}")]
    Guard(#[from] super::guard::GuardError),

    #[error("workflow instance {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),

    #[error("concurrency conflict on instance {id}: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { id: Uuid, expected: u64, actual: u64 },
}

impl WorkflowError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::InstanceNotFound(_) | Self::NodeNotFound { .. } => Reason::NotFound,
            Self::NoSatisfiedTransition(_) | Self::Guard(_) => Reason::GuardError,
            Self::TaskFailed { .. } => Reason::Internal,
            Self::AlreadyTerminal(_) => Reason::AlreadyTerminal,
            Self::ConcurrencyConflict { .. } => Reason::ConcurrencyConflict,
        }
    }
}
