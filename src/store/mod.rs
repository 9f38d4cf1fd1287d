//! Persistence trait and in-memory implementation for dynamic dispatch
//! state: queued envelopes, worker registry/heartbeats, job run history,
//! and workflow instance state.
//!
//! Grounded in `persistence/store.rs`'s trait-per-operation-group shape
//! (`#[async_trait]`, a single crate-wide `StoreError`), generalized from a
//! workflow-event-sourcing trait to the six-component dispatch model.
//! Topology declarations themselves stay out of this trait — they live in
//! [`crate::topology::TopologyRegistry`], which is its own copy-on-write
//! snapshot store.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::Reason;
use crate::scheduler::RunOutcome;
use crate::worker::placement::WorkerCandidate;
use crate::workflow::WorkflowInstance;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("envelope not found: {0}")]
    EnvelopeNotFound(Uuid),
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),
    #[error("concurrency conflict on instance {id}: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { id: Uuid, expected: u64, actual: u64 },
    #[error("queue {queue} is at capacity ({max_length})")]
    QueueFull { queue: String, max_length: usize },
}

impl StoreError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::EnvelopeNotFound(_) | Self::QueueNotFound(_) | Self::WorkerNotFound(_) | Self::InstanceNotFound(_) => {
                Reason::NotFound
            }
            Self::ConcurrencyConflict { .. } => Reason::ConcurrencyConflict,
            Self::QueueFull { .. } => Reason::MaxLength,
        }
    }
}

/// Registration/heartbeat record for one worker node.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub capability_labels: Vec<String>,
    pub weight: u32,
    pub in_flight: usize,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
    /// Set by `drain-worker` (§6 Control API): still registered so its
    /// existing leases can be reclaimed normally, but `acquire_lease` refuses
    /// to hand it new work.
    pub draining: bool,
}

impl From<&WorkerRecord> for WorkerCandidate {
    fn from(r: &WorkerRecord) -> Self {
        WorkerCandidate {
            worker_id: r.worker_id.clone(),
            capability_labels: r.capability_labels.clone(),
            in_flight: r.in_flight,
            weight: r.weight,
        }
    }
}

/// Persistence seam for everything that changes at dispatch time, as opposed
/// to topology declarations (queues, exchanges, job/task/workflow defs)
/// which are held by [`crate::topology::TopologyRegistry`].
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Push an envelope onto a named queue, honoring `max_length` if set.
    async fn enqueue(&self, queue: &str, envelope: Envelope, max_length: Option<usize>) -> Result<(), StoreError>;

    /// Pop the next envelope a worker should run, per `ordering`, and record
    /// it as leased to `worker_id` until acked/retried/dead-lettered or
    /// reclaimed via [`Self::reclaim_leases_for_workers`]. `None` if the
    /// queue is empty or every remaining envelope is not yet due
    /// (`not_before` in the future).
    async fn dequeue_ready(
        &self,
        queue: &str,
        ordering: crate::topology::Ordering,
        now: chrono::DateTime<chrono::Utc>,
        worker_id: &str,
    ) -> Result<Option<Envelope>, StoreError>;

    /// Non-consuming look at the envelope [`Self::dequeue_ready`] would pop
    /// next, without leasing it. Lets a caller run placement (capability
    /// labels, strategy-select) against the envelope before committing to a
    /// particular worker.
    async fn peek_ready(
        &self,
        queue: &str,
        ordering: crate::topology::Ordering,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Envelope>, StoreError>;

    /// Mark an envelope as successfully processed.
    async fn ack(&self, queue: &str, envelope_id: Uuid) -> Result<(), StoreError>;

    /// Return an envelope to the queue for retry, with its `attempt`/`state`
    /// already updated by the caller via [`Envelope`]'s mutators.
    async fn retry(&self, queue: &str, envelope: Envelope) -> Result<(), StoreError>;

    /// Move an envelope to a queue's dead-letter target (or a synthetic
    /// per-queue DLQ if none is declared).
    async fn dead_letter(&self, queue: &str, envelope: Envelope, reason: crate::envelope::DeadLetterReason) -> Result<(), StoreError>;

    async fn list_dead_letters(&self, queue: &str) -> Result<Vec<Envelope>, StoreError>;

    /// Remove and return every envelope on `queue` whose `expires_at` has
    /// passed, regardless of its current state. The caller dead-letters
    /// each one with [`crate::envelope::DeadLetterReason::Expired`].
    async fn reap_expired(&self, queue: &str, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Envelope>, StoreError>;

    async fn queue_depth(&self, queue: &str) -> Result<usize, StoreError>;

    async fn upsert_worker(&self, record: WorkerRecord) -> Result<(), StoreError>;

    async fn heartbeat_worker(&self, worker_id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<(), StoreError>;

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError>;

    async fn remove_stale_workers(&self, threshold: chrono::Duration, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<String>, StoreError>;

    /// Hand back every envelope currently leased to one of `worker_ids`, as
    /// `(queue, envelope)` pairs, so the caller can requeue or dead-letter
    /// them (§4.5's worker-loss path). Each lease is consumed by this call.
    async fn reclaim_leases_for_workers(&self, worker_ids: &[String]) -> Result<Vec<(String, Envelope)>, StoreError>;

    /// Find and remove one envelope by id, wherever it currently is (leased
    /// to a worker, or still sitting in a queue), returning its owning queue
    /// name alongside it. Used to revoke a task interrupted mid-flight by a
    /// boundary event, where the caller has only the id recorded on the
    /// workflow instance, not the envelope itself.
    async fn take_envelope(&self, envelope_id: Uuid) -> Result<Option<(String, Envelope)>, StoreError>;

    /// Non-consuming lookup of one envelope by id, wherever it currently is
    /// (leased, still queued, or already dead-lettered), for `describe-envelope`.
    async fn find_envelope(&self, envelope_id: Uuid) -> Result<Option<Envelope>, StoreError>;

    /// Stop handing new envelopes out of `queue` via `dequeue_ready`; already
    /// leased envelopes are unaffected.
    async fn pause_queue(&self, queue: &str) -> Result<(), StoreError>;

    async fn resume_queue(&self, queue: &str) -> Result<(), StoreError>;

    /// Record the terminal outcome of a job definition's most recent run,
    /// feeding [`crate::scheduler::DependencyGate`].
    async fn record_job_outcome(&self, job_def_name: &str, outcome: RunOutcome) -> Result<(), StoreError>;

    async fn latest_job_outcomes(&self) -> Result<std::collections::HashMap<String, RunOutcome>, StoreError>;

    async fn save_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError>;

    async fn load_instance(&self, id: Uuid) -> Result<WorkflowInstance, StoreError>;

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, StoreError>;
}
