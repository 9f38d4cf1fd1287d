//! Crate-wide error taxonomy
//!
//! Every component error enum converts into [`DispatchError`] via `#[from]`,
//! and every [`DispatchError`] variant carries a [`Reason`] tag drawn from the
//! taxonomy components use in audit events and metric labels.

use thiserror::Error;

use crate::router::RouteError;
use crate::runtime::ExecutorError;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;
use crate::topology::TopologyError;
use crate::worker::WorkerPoolError;
use crate::workflow::WorkflowError;

/// Stable, low-cardinality classification of a failure.
///
/// `Reason` is the value attached to audit events and the `reason` metric
/// label (§4.7); it intentionally does not carry free-form detail (that
/// lives in the `Display` text of the owning error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    /// Declaration referenced an unknown entity, or validation failed.
    NotFound,
    /// A declared entity with that name already exists at a different version.
    AlreadyExists,
    /// A value violated a structural invariant (e.g. malformed topic pattern).
    InvalidDeclaration,
    /// Optimistic-concurrency conflict on an append.
    ConcurrencyConflict,
    /// No queue/worker satisfies a route or placement request.
    Unroutable,
    /// Delivery attempts were exhausted.
    MaxAttempts,
    /// A bounded queue or history buffer was full.
    MaxLength,
    /// The visibility or TTL deadline passed before success.
    Expired,
    /// Rejected by the consumer (explicit nack with `requeue: false`).
    Rejected,
    /// The worker holding the lease stopped heartbeating.
    WorkerLost,
    /// A rate limit denied the request.
    RateLimited,
    /// A dependency gate is not yet satisfied.
    DependencyBlocked,
    /// A guard expression failed to evaluate.
    GuardError,
    /// Caller attempted an operation against a terminal instance.
    AlreadyTerminal,
    /// Generic internal/store failure.
    Internal,
}

/// Top-level error type returned by [`crate::DispatchEngine`] operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("routing error: {0}")]
    Route(#[from] RouteError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("worker pool error: {0}")]
    Worker(#[from] WorkerPoolError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("execution runtime error: {0}")]
    Runtime(#[from] ExecutorError),
}

impl DispatchError {
    /// The stable [`Reason`] this error should be reported under.
    pub fn reason(&self) -> Reason {
        match self {
            Self::Topology(e) => e.reason(),
            Self::Route(e) => e.reason(),
            Self::Scheduler(e) => e.reason(),
            Self::Worker(e) => e.reason(),
            Self::Workflow(e) => e.reason(),
            Self::Store(_) => Reason::Internal,
            Self::Runtime(e) => e.reason(),
        }
    }
}
