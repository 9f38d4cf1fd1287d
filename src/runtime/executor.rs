//! Execution Runtime (§4.5): the entry point that turns a publish/submit
//! call into an enqueued envelope, plus the background sweeps (expiry,
//! stale-worker reclaim) that keep the pending→ready→running machine honest.
//!
//! Grounded in the teacher's `engine::executor::WorkflowExecutor`: the
//! closest 1:1 match in the corpus — a type that drives state transitions
//! through a store, with `#[instrument]`-decorated async methods and an
//! `ExecutorError` taxonomy extended to the full crate-wide [`Reason`] set.
//! The running→{success,retry,dead-letter} half of the machine already
//! lives in [`crate::worker::WorkerPool`]'s `apply_outcome`; this type
//! covers the submission and sweep sides instead of duplicating it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::envelope::{Attributes, DeadLetterReason, Envelope};
use crate::error::Reason;
use crate::router::{RouteError, Router};
use crate::store::{DispatchStore, StoreError};
use crate::topology::TopologyRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("route error: {0}")]
    Route(#[from] RouteError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("task definition not found: {0}")]
    UnknownTask(String),
    #[error("queue not declared: {0}")]
    UnknownQueue(String),
}

impl ExecutorError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::Route(e) => e.reason(),
            Self::Store(e) => e.reason(),
            Self::UnknownTask(_) | Self::UnknownQueue(_) => Reason::NotFound,
        }
    }
}

/// Tunables for the background expiry sweep.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub sweep_interval: std::time::Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { sweep_interval: std::time::Duration::from_secs(5) }
    }
}

/// Drives envelopes from submission into the queue they'll be dequeued
/// from, and reaps entries that expired before a worker claimed them.
pub struct ExecutionRuntime {
    topology: Arc<TopologyRegistry>,
    store: Arc<dyn DispatchStore>,
    config: ExecutorConfig,
}

impl ExecutionRuntime {
    pub fn new(topology: Arc<TopologyRegistry>, store: Arc<dyn DispatchStore>) -> Self {
        Self { topology, store, config: ExecutorConfig::default() }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Submit a task by name: resolve its route and retry policy, then
    /// enqueue a fresh envelope. Returns the new envelope's id.
    #[instrument(skip(self, payload))]
    pub async fn submit_task(
        &self,
        task_name: &str,
        payload: Vec<u8>,
        sequence: u64,
    ) -> Result<Uuid, ExecutorError> {
        let snapshot = self.topology.snapshot();
        let task_def = snapshot
            .task_defs
            .get(task_name)
            .ok_or_else(|| ExecutorError::UnknownTask(task_name.to_string()))?
            .clone();

        let route = Router::new(&self.topology).route_task(task_name)?;
        let queue_def = snapshot
            .queues
            .get(&route.queue)
            .ok_or_else(|| ExecutorError::UnknownQueue(route.queue.clone()))?
            .clone();

        let mut envelope = Envelope::new(task_name, payload, sequence)
            .with_priority(route.priority)
            .with_kind(crate::envelope::EnvelopeKind::Task)
            .with_required_capabilities(task_def.required_capability_labels.clone());
        envelope.retry_policy = task_def.default_retry_policy;
        let id = envelope.id;

        self.store.enqueue(&route.queue, envelope, queue_def.max_length).await?;
        Ok(id)
    }

    /// Publish an envelope to an exchange, fanning it out to every queue the
    /// exchange's bindings resolve to.
    #[instrument(skip(self, payload, headers))]
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        headers: Attributes,
        sequence: u64,
    ) -> Result<Vec<Uuid>, ExecutorError> {
        let queues = Router::new(&self.topology).route(exchange, routing_key, &headers)?;
        let snapshot = self.topology.snapshot();
        let mut ids = Vec::with_capacity(queues.len());
        for queue in queues {
            let max_length = snapshot.queues.get(&queue).and_then(|q| q.max_length);
            let envelope = Envelope::new(routing_key, payload.clone(), sequence).with_headers(headers.clone());
            ids.push(envelope.id);
            self.store.enqueue(&queue, envelope, max_length).await?;
        }
        Ok(ids)
    }

    /// Revoke a not-yet-completed envelope: dead-letter it via the queue's
    /// declared DLQ target, same path a max-attempts exhaustion would take.
    #[instrument(skip(self, envelope))]
    pub async fn revoke(&self, queue: &str, envelope: Envelope) -> Result<(), ExecutorError> {
        self.store.dead_letter(queue, envelope, DeadLetterReason::Rejected).await?;
        Ok(())
    }

    /// Revoke an in-flight envelope by id alone — used when a workflow
    /// instance cancels a task node it no longer holds the envelope for
    /// (e.g. an interrupting boundary timer firing while a sibling task is
    /// still running). No-op if the envelope already reached a terminal
    /// state and is gone from both the queue and the lease table.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, envelope_id: Uuid) -> Result<bool, ExecutorError> {
        match self.store.take_envelope(envelope_id).await? {
            Some((queue, envelope)) => {
                self.store.dead_letter(&queue, envelope, DeadLetterReason::Rejected).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sweep one queue for envelopes whose `expires_at` passed before a
    /// worker claimed them, dead-lettering each with `Expired`.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, queue: &str, now: DateTime<Utc>) -> Result<usize, ExecutorError> {
        let expired = self.store.reap_expired(queue, now).await?;
        let count = expired.len();
        for envelope in expired {
            self.store.dead_letter(queue, envelope, DeadLetterReason::Expired).await?;
        }
        Ok(count)
    }

    /// Run `sweep_expired` against every queue declared in the topology,
    /// on the configured interval, until `shutdown` fires. Intended to run
    /// as a background task alongside the worker pool's own loops.
    pub async fn run_sweep_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let queues: Vec<String> = self.topology.snapshot().queues.keys().cloned().collect();
                    let now = Utc::now();
                    for queue in queues {
                        if let Err(err) = self.sweep_expired(&queue, now).await {
                            tracing::warn!(queue = %queue, error = %err, "expiry sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::topology::{Ordering, QueueDef, RouteRule, TaskDefinition};

    fn setup() -> (Arc<TopologyRegistry>, Arc<dyn DispatchStore>) {
        let topology = Arc::new(TopologyRegistry::new());
        topology.declare_queue(QueueDef {
            name: "emails".into(),
            ordering: Ordering::Fifo,
            max_length: None,
            dead_letter_target: None,
        });
        topology.declare_task(TaskDefinition {
            name: "send_email".into(),
            default_retry_policy: Default::default(),
            required_capability_labels: vec![],
        });
        topology.declare_route(RouteRule {
            id: "r1".into(),
            task_name_pattern: "send_email".into(),
            queue: "emails".into(),
            priority: 0,
        });
        let store: Arc<dyn DispatchStore> = Arc::new(InMemoryStore::new());
        (topology, store)
    }

    #[tokio::test]
    async fn submit_task_enqueues_onto_routed_queue() {
        let (topology, store) = setup();
        let runtime = ExecutionRuntime::new(topology, store.clone());
        runtime.submit_task("send_email", vec![], 1).await.unwrap();
        assert_eq!(store.queue_depth("emails").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn submit_task_rejects_unknown_task() {
        let (topology, store) = setup();
        let runtime = ExecutionRuntime::new(topology, store);
        let err = runtime.submit_task("unknown", vec![], 1).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn sweep_expired_dead_letters_past_deadline_envelopes() {
        let (topology, store) = setup();
        let runtime = ExecutionRuntime::new(topology, store.clone());

        let mut envelope = Envelope::new("send_email", vec![], 1);
        envelope.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.enqueue("emails", envelope, None).await.unwrap();

        let reaped = runtime.sweep_expired("emails", Utc::now()).await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(store.queue_depth("emails").await.unwrap(), 0);
        assert_eq!(store.list_dead_letters("emails").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_task_dead_letters_a_still_queued_envelope() {
        let (topology, store) = setup();
        let runtime = ExecutionRuntime::new(topology, store.clone());
        let envelope = Envelope::new("send_email", vec![], 1);
        let id = envelope.id;
        store.enqueue("emails", envelope, None).await.unwrap();

        assert!(runtime.cancel_task(id).await.unwrap());
        assert_eq!(store.queue_depth("emails").await.unwrap(), 0);
        assert_eq!(store.list_dead_letters("emails").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_task_is_a_no_op_for_unknown_id() {
        let (topology, store) = setup();
        let runtime = ExecutionRuntime::new(topology, store);
        assert!(!runtime.cancel_task(Uuid::now_v7()).await.unwrap());
    }
}
