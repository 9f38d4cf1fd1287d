//! The [`DispatchEngine`] facade: wires the six components together and
//! exposes the External Interfaces (§6) as typed, `#[instrument]`-decorated
//! methods. Playbook matches the teacher's `WorkflowExecutor` + `WorkerPool`
//! pairing, scaled up to cover topology declarations, routing, scheduling,
//! and the workflow interpreter as well.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::envelope::{Attributes, Envelope};
use crate::error::{DispatchError, Reason};
use crate::observability::{AuditEvent, AuditFilter, AuditLog, MetricValue, MetricsRegistry};
use crate::router::Router;
use crate::runtime::ExecutionRuntime;
use crate::scheduler::{DependencyGate, RunOutcome, TimerRegistry};
use crate::store::{DispatchStore, InMemoryStore};
use crate::topology::{
    Binding, Exchange, JobDefinition, QueueDef, RouteRule, TaskDefinition, TopologyRegistry,
    WorkflowGraphDef,
};
use crate::worker::placement::{Placer, WorkerCandidate};
use crate::workflow::{GraphInterpreter, WorkflowAction, WorkflowEvent, WorkflowInstance};

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub depth: usize,
    pub dead_lettered: usize,
}

/// Aggregate engine: one [`TopologyRegistry`], one [`DispatchStore`], and
/// the scheduling/interpretation/observability state layered on top.
pub struct DispatchEngine {
    config: EngineConfig,
    topology: Arc<TopologyRegistry>,
    store: Arc<dyn DispatchStore>,
    runtime: Arc<ExecutionRuntime>,
    timers: TimerRegistry,
    interpreter: GraphInterpreter,
    metrics: MetricsRegistry,
    audit: AuditLog,
    sequence: AtomicU64,
    placer: Placer,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig) -> Self {
        let topology = Arc::new(TopologyRegistry::new());
        let store: Arc<dyn DispatchStore> = Arc::new(InMemoryStore::new());
        let runtime = Arc::new(ExecutionRuntime::new(topology.clone(), store.clone()));
        let audit_capacity = config.audit_log_capacity;
        let placer = Placer::new(config.default_placement_strategy);
        Self {
            config,
            topology,
            store,
            runtime,
            timers: TimerRegistry::new(),
            interpreter: GraphInterpreter::new(),
            metrics: MetricsRegistry::new(),
            audit: AuditLog::new(audit_capacity),
            sequence: AtomicU64::new(0),
            placer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    // ---- Consumer API (§6, called by workers) ----

    /// Register or re-register a worker and its declared capability labels.
    #[instrument(skip(self))]
    pub async fn register_worker(&self, record: crate::store::WorkerRecord) -> Result<(), DispatchError> {
        self.store.upsert_worker(record).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), DispatchError> {
        self.store.heartbeat_worker(worker_id, Utc::now()).await?;
        Ok(())
    }

    /// Lease the next ready envelope on `queue` for `worker_id`, if any.
    /// Refuses to hand out work to a worker that `drain_worker` has marked
    /// as draining — its existing leases still get reclaimed normally.
    ///
    /// Runs §4.4's placement policy before committing to a dequeue: peeks
    /// the head-eligible envelope, builds the candidate set from every
    /// registered non-draining worker, and only actually pops/leases it if
    /// the configured [`Placer`] picks `worker_id` among workers whose
    /// capability labels satisfy the envelope's `required_capabilities`.
    /// Any other outcome (no eligible envelope, or the placer prefers a
    /// different worker) is indistinguishable from an empty queue to the
    /// caller — it just sees nothing to lease on this poll.
    #[instrument(skip(self))]
    pub async fn acquire_lease(
        &self,
        worker_id: &str,
        queue: &str,
        ordering: crate::topology::Ordering,
    ) -> Result<Option<Envelope>, DispatchError> {
        let workers = self.store.list_workers().await?;
        let draining = workers.iter().any(|w| w.worker_id == worker_id && w.draining);
        if draining {
            return Ok(None);
        }

        let now = Utc::now();
        let envelope = match self.store.peek_ready(queue, ordering, now).await? {
            Some(envelope) => envelope,
            None => return Ok(None),
        };

        let candidates: Vec<WorkerCandidate> = workers.iter().filter(|w| !w.draining).map(WorkerCandidate::from).collect();
        let winner = match self.placer.place(&candidates, &envelope.required_capabilities) {
            Some(winner) => winner,
            None => return Ok(None),
        };
        if winner.worker_id != worker_id {
            return Ok(None);
        }

        Ok(self.store.dequeue_ready(queue, ordering, now, worker_id).await?)
    }

    /// Acknowledge successful processing of a leased envelope. `routing_key`
    /// doubles as a job definition name for job-triggered envelopes, so
    /// every ack also feeds the dependency gate (§4.3) the outcome of that
    /// run; envelopes that aren't job runs just record an outcome entry
    /// nothing ever queries.
    #[instrument(skip(self))]
    pub async fn ack(&self, queue: &str, envelope_id: Uuid, routing_key: &str) -> Result<(), DispatchError> {
        self.store.ack(queue, envelope_id).await?;
        self.store.record_job_outcome(routing_key, RunOutcome::Success).await?;
        self.metrics.incr_counter("envelopes_acked", vec![("queue".into(), queue.into())]);
        Ok(())
    }

    /// Report a failed envelope: if `requeue` and attempts remain, it goes
    /// back to `queue` after its declared backoff delay; otherwise it's
    /// dead-lettered with `max-attempts`. A `requeue=false` nack dead-letters
    /// immediately, same as an envelope exhausting its retry budget.
    #[instrument(skip(self, envelope))]
    pub async fn nack(&self, queue: &str, mut envelope: Envelope, requeue: bool) -> Result<(), DispatchError> {
        envelope.attempt += 1;
        if requeue && envelope.retry_policy.has_attempts_remaining(envelope.attempt) {
            let delay = envelope.retry_policy.delay_for_attempt(envelope.attempt);
            envelope.not_before = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
            envelope.state = crate::envelope::EnvelopeState::Retrying;
            self.store.retry(queue, envelope).await?;
        } else {
            self.metrics.incr_counter("envelopes_dead_lettered", vec![("queue".into(), queue.into())]);
            self.store.record_job_outcome(&envelope.routing_key, RunOutcome::Failure).await?;
            self.store.dead_letter(queue, envelope, crate::envelope::DeadLetterReason::MaxAttempts).await?;
        }
        Ok(())
    }

    /// Extend a worker's lease on its in-flight envelopes. Leases in this
    /// in-memory store are tracked per worker rather than per envelope (see
    /// DESIGN.md), so extending one is equivalent to a heartbeat: it resets
    /// the staleness clock the reclaim loop checks against.
    #[instrument(skip(self))]
    pub async fn extend_lease(&self, worker_id: &str) -> Result<(), DispatchError> {
        self.heartbeat(worker_id).await
    }

    /// Mark a worker as draining: it keeps its current leases (reclaimed
    /// normally on heartbeat loss or on ack/nack) but `acquire_lease` refuses
    /// it any further work.
    #[instrument(skip(self))]
    pub async fn drain_worker(&self, worker_id: &str) -> Result<(), DispatchError> {
        let mut record = self
            .store
            .list_workers()
            .await?
            .into_iter()
            .find(|w| w.worker_id == worker_id)
            .ok_or_else(|| DispatchError::Store(crate::store::StoreError::WorkerNotFound(worker_id.to_string())))?;
        record.draining = true;
        self.store.upsert_worker(record).await?;
        Ok(())
    }

    // ---- Control API: topology declarations (§4.1) ----

    pub fn declare_exchange(&self, exchange: Exchange) {
        self.topology.declare_exchange(exchange);
    }

    pub fn declare_queue(&self, queue: QueueDef) {
        self.topology.declare_queue(queue);
    }

    pub fn declare_binding(&self, binding: Binding) -> Result<(), DispatchError> {
        self.topology.declare_binding(binding)?;
        Ok(())
    }

    pub fn declare_task(&self, task: TaskDefinition) {
        self.topology.declare_task(task);
    }

    pub fn declare_job(&self, job: JobDefinition) {
        self.topology.declare_job(job);
    }

    pub fn declare_route(&self, route: RouteRule) {
        self.topology.declare_route(route);
    }

    pub fn declare_workflow(&self, graph: WorkflowGraphDef) -> Result<(), DispatchError> {
        self.topology.declare_workflow(graph)?;
        Ok(())
    }

    // ---- Producer API (§6) ----

    #[instrument(skip(self, payload, headers))]
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        headers: Attributes,
    ) -> Result<Vec<Uuid>, DispatchError> {
        let seq = self.next_sequence();
        let ids = self.runtime.publish(exchange, routing_key, payload, headers, seq).await?;
        if ids.is_empty() {
            self.metrics.incr_counter("envelopes_unroutable", vec![("exchange".into(), exchange.into())]);
            self.audit.record(
                AuditEvent::new("unroutable", format!("exchange {exchange} routing_key {routing_key}"))
                    .with_reason(Reason::Unroutable),
            );
        }
        Ok(ids)
    }

    #[instrument(skip(self, payload))]
    pub async fn submit_task(&self, task_name: &str, payload: Vec<u8>) -> Result<Uuid, DispatchError> {
        let seq = self.next_sequence();
        let id = self.runtime.submit_task(task_name, payload, seq).await?;
        self.metrics.incr_counter("tasks_submitted", vec![("task_def".into(), task_name.into())]);
        Ok(id)
    }

    /// Bypasses cron, honoring declared dependencies (§4.3).
    #[instrument(skip(self))]
    pub async fn trigger_job(&self, job_def_name: &str) -> Result<Uuid, DispatchError> {
        let snapshot = self.topology.snapshot();
        let job = snapshot
            .job_defs
            .get(job_def_name)
            .cloned()
            .ok_or_else(|| DispatchError::Store(crate::store::StoreError::QueueNotFound(job_def_name.to_string())))?;

        let outcomes = self.store.latest_job_outcomes().await?;
        let gate = DependencyGate::new(&outcomes);
        if !gate.is_satisfied(&job.dependencies) {
            let blocking = gate.blocking(&job.dependencies);
            self.audit.record(
                AuditEvent::new("job_blocked", format!("{job_def_name} blocked by {blocking:?}"))
                    .with_reason(Reason::DependencyBlocked),
            );
            return Err(DispatchError::Scheduler(crate::scheduler::SchedulerError::DependenciesBlocked(blocking)));
        }

        let seq = self.next_sequence();
        let envelope = Envelope::new(job_def_name, vec![], seq);
        let id = envelope.id;
        let max_length = snapshot.queues.get(&job.queue).and_then(|q| q.max_length);
        self.store.enqueue(&job.queue, envelope, max_length).await?;
        self.metrics.incr_counter("jobs_triggered", vec![("job_def".into(), job_def_name.into())]);
        Ok(id)
    }

    #[instrument(skip(self, variables))]
    pub async fn start_workflow(
        &self,
        workflow_name: &str,
        variables: serde_json::Value,
    ) -> Result<Uuid, DispatchError> {
        let snapshot = self.topology.snapshot();
        let graph = snapshot
            .workflow_graphs
            .get(workflow_name)
            .cloned()
            .ok_or_else(|| DispatchError::Topology(crate::topology::TopologyError::WorkflowNotFound(workflow_name.to_string())))?;

        let instance_id = Uuid::now_v7();
        let mut instance = WorkflowInstance::new(instance_id, workflow_name, graph.version, variables);
        let task_queues = self.task_queue_map();
        let actions = self.interpreter.start(&graph, &mut instance, &task_queues)?;
        self.apply_actions(&mut instance, actions).await?;
        self.store.save_instance(instance).await?;
        self.audit.record(AuditEvent::new("workflow_started", instance_id.to_string()).with_workflow(workflow_name));
        Ok(instance_id)
    }

    // ---- Control API: workflow/envelope lifecycle ----

    #[instrument(skip(self))]
    pub async fn cancel_workflow_instance(&self, instance_id: Uuid, reason: String) -> Result<(), DispatchError> {
        let mut instance = self.store.load_instance(instance_id).await?;
        let actions = self.interpreter.cancel(&mut instance, reason);
        self.apply_actions(&mut instance, actions).await?;
        self.store.save_instance(instance).await?;
        Ok(())
    }

    #[instrument(skip(self, output))]
    pub async fn complete_human_task(
        &self,
        instance_id: Uuid,
        node_id: &str,
        output: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let mut instance = self.store.load_instance(instance_id).await?;
        let snapshot = self.topology.snapshot();
        let graph = snapshot
            .workflow_graphs
            .get(&instance.graph_name)
            .cloned()
            .ok_or_else(|| DispatchError::Topology(crate::topology::TopologyError::WorkflowNotFound(instance.graph_name.clone())))?;
        let task_queues = self.task_queue_map();
        let actions = self.interpreter.on_human_task_completed(&graph, &mut instance, node_id, output, &task_queues)?;
        self.apply_actions(&mut instance, actions).await?;
        self.store.save_instance(instance).await?;
        Ok(())
    }

    /// Dead-letter an envelope already in the caller's possession (e.g. a
    /// claimed-but-not-yet-acked lease). The in-memory store indexes
    /// envelopes by queue position, not id, so revocation of a still-queued
    /// envelope requires the caller to supply it directly; see DESIGN.md.
    #[instrument(skip(self, envelope))]
    pub async fn revoke_envelope(&self, queue: &str, envelope: Envelope) -> Result<(), DispatchError> {
        self.runtime.revoke(queue, envelope).await?;
        self.metrics.incr_counter("envelopes_revoked", vec![("queue".into(), queue.into())]);
        Ok(())
    }

    /// Reap expired envelopes on one queue, dead-lettering each.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, queue: &str) -> Result<usize, DispatchError> {
        let count = self.runtime.sweep_expired(queue, Utc::now()).await?;
        if count > 0 {
            self.metrics.add_counter("envelopes_expired", vec![("queue".into(), queue.into())], count as u64);
        }
        Ok(count)
    }

    /// Stop `acquire_lease` from handing out new work from `queue`.
    /// Already-leased envelopes are unaffected.
    #[instrument(skip(self))]
    pub async fn pause_queue(&self, queue: &str) -> Result<(), DispatchError> {
        self.store.pause_queue(queue).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume_queue(&self, queue: &str) -> Result<(), DispatchError> {
        self.store.resume_queue(queue).await?;
        Ok(())
    }

    /// Fire every workflow timer whose deadline has passed, advancing each
    /// owning instance.
    #[instrument(skip(self))]
    pub async fn drain_due_timers(&self) -> Result<usize, DispatchError> {
        let due = self.timers.drain_due(Utc::now());
        let count = due.len();
        for firing in due {
            let mut instance = self.store.load_instance(firing.instance_id).await?;
            let snapshot = self.topology.snapshot();
            let graph = match snapshot.workflow_graphs.get(&instance.graph_name).cloned() {
                Some(g) => g,
                None => continue,
            };
            let task_queues = self.task_queue_map();
            let actions = self.interpreter.on_timer_fired(&graph, &mut instance, &firing.node_id, &task_queues)?;
            self.apply_actions(&mut instance, actions).await?;
            self.store.save_instance(instance).await?;
        }
        Ok(count)
    }

    // ---- Introspection API (§6) ----

    pub fn list_queues(&self) -> Vec<String> {
        self.topology.snapshot().queues.keys().cloned().collect()
    }

    #[instrument(skip(self))]
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats, DispatchError> {
        let depth = self.store.queue_depth(queue).await?;
        let dead_lettered = self.store.list_dead_letters(queue).await?.len();
        Ok(QueueStats { depth, dead_lettered })
    }

    #[instrument(skip(self))]
    pub async fn get_workflow_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, DispatchError> {
        Ok(self.store.load_instance(instance_id).await?)
    }

    /// Look up one envelope by id wherever it currently is (queued, leased,
    /// or dead-lettered), without disturbing it.
    #[instrument(skip(self))]
    pub async fn describe_envelope(&self, envelope_id: Uuid) -> Result<Option<Envelope>, DispatchError> {
        Ok(self.store.find_envelope(envelope_id).await?)
    }

    pub fn query_audit(&self, filter: &AuditFilter, limit: usize) -> Vec<AuditEvent> {
        self.audit.query(filter, limit)
    }

    pub fn get_metric(&self, name: &str, labels: crate::observability::Labels) -> Option<MetricValue> {
        self.metrics.get_metric(name, labels)
    }

    // ---- internals ----

    /// Map each declared task name to the queue its route rule resolves to,
    /// falling back to the task name itself (the interpreter's own default)
    /// when no route matches, so workflow task nodes still schedule somewhere.
    fn task_queue_map(&self) -> HashMap<String, String> {
        let snapshot = self.topology.snapshot();
        let router = Router::new(&self.topology);
        snapshot
            .task_defs
            .keys()
            .map(|name| {
                let queue = router.route_task(name).map(|r| r.queue).unwrap_or_else(|_| name.clone());
                (name.clone(), queue)
            })
            .collect()
    }

    async fn apply_actions(&self, instance: &mut WorkflowInstance, actions: Vec<WorkflowAction>) -> Result<(), DispatchError> {
        for action in actions {
            self.apply_action(instance, action).await?;
        }
        Ok(())
    }

    async fn apply_action(&self, instance: &mut WorkflowInstance, action: WorkflowAction) -> Result<(), DispatchError> {
        match action {
            WorkflowAction::ScheduleTask { node_id, task_name, queue, input, options } => {
                let seq = self.next_sequence();
                let payload = serde_json::to_vec(&input).unwrap_or_default();
                let mut envelope = Envelope::new(task_name.clone(), payload, seq).with_priority(options.priority);
                envelope.retry_policy = options.retry_policy;
                envelope.expires_at = Some(Utc::now() + chrono::Duration::from_std(options.start_to_close_timeout).unwrap_or_default());
                let envelope_id = envelope.id;
                let max_length = self.topology.snapshot().queues.get(&queue).and_then(|q| q.max_length);
                self.store.enqueue(&queue, envelope, max_length).await?;
                instance.append(WorkflowEvent::TaskScheduled { node_id, envelope_id, task_name });
            }
            WorkflowAction::StartTimer { node_id, duration, interrupting } => {
                let fire_at = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
                self.timers.schedule(fire_at, instance.id, node_id, interrupting);
            }
            WorkflowAction::CancelTask { node_id, envelope_id } => {
                self.runtime.cancel_task(envelope_id).await?;
                self.audit.record(
                    AuditEvent::new("task_cancelled", format!("node {node_id} envelope {envelope_id}"))
                        .with_workflow(instance.graph_name.clone()),
                );
            }
            WorkflowAction::CompleteInstance { .. } => {
                self.audit.record(AuditEvent::new("workflow_completed", instance.id.to_string()).with_workflow(instance.graph_name.clone()));
                self.metrics.incr_counter("workflow_instances_completed", vec![("workflow".into(), instance.graph_name.clone())]);
            }
            WorkflowAction::FailInstance { error } => {
                self.audit.record(
                    AuditEvent::new("workflow_failed", error)
                        .with_workflow(instance.graph_name.clone())
                        .with_reason(Reason::Internal),
                );
                self.metrics.incr_counter("workflow_instances_failed", vec![("workflow".into(), instance.graph_name.clone())]);
            }
            WorkflowAction::CancelInstance { reason } => {
                self.audit.record(AuditEvent::new("workflow_cancelled", reason).with_workflow(instance.graph_name.clone()));
            }
            WorkflowAction::EvaluateGateway { .. } | WorkflowAction::None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ExchangeKind, Node, NodeKind, Ordering, Transition};
    use serde_json::json;

    fn worker_record(id: &str) -> crate::store::WorkerRecord {
        crate::store::WorkerRecord {
            worker_id: id.to_string(),
            capability_labels: vec![],
            weight: 1,
            in_flight: 0,
            last_heartbeat: Utc::now(),
            draining: false,
        }
    }

    fn setup_task(engine: &DispatchEngine) {
        engine.declare_queue(QueueDef {
            name: "emails".into(),
            ordering: Ordering::Fifo,
            max_length: None,
            dead_letter_target: None,
        });
        engine.declare_task(TaskDefinition {
            name: "send_email".into(),
            default_retry_policy: Default::default(),
            required_capability_labels: vec![],
        });
        engine.declare_route(RouteRule {
            id: "r1".into(),
            task_name_pattern: "send_email".into(),
            queue: "emails".into(),
            priority: 0,
        });
    }

    #[tokio::test]
    async fn submit_task_enqueues_and_reports_in_queue_stats() {
        let engine = DispatchEngine::new(EngineConfig::default());
        setup_task(&engine);
        engine.submit_task("send_email", b"{}".to_vec()).await.unwrap();
        let stats = engine.queue_stats("emails").await.unwrap();
        assert_eq!(stats.depth, 1);
    }

    #[tokio::test]
    async fn publish_records_unroutable_when_no_binding_matches() {
        let engine = DispatchEngine::new(EngineConfig::default());
        engine.declare_exchange(Exchange { name: "orders".into(), kind: ExchangeKind::Fanout });
        let ids = engine.publish("orders", "ignored", vec![], Attributes::new()).await.unwrap();
        assert!(ids.is_empty());
        let events = engine.query_audit(&AuditFilter { kind: Some("unroutable".into()), ..Default::default() }, 10);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn trigger_job_blocks_on_unmet_dependency() {
        let engine = DispatchEngine::new(EngineConfig::default());
        engine.declare_queue(QueueDef { name: "etl".into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
        engine.declare_job(JobDefinition {
            name: "rollup".into(),
            cron_expression: None,
            dependencies: vec![crate::topology::JobDependency {
                depends_on_job_def: "ingest".into(),
                dependency_type: crate::topology::DependencyType::Success,
            }],
            queue: "etl".into(),
            placement_strategy: None,
        });
        let err = engine.trigger_job("rollup").await.unwrap_err();
        assert!(matches!(err, DispatchError::Scheduler(crate::scheduler::SchedulerError::DependenciesBlocked(_))));
    }

    #[tokio::test]
    async fn paused_queue_blocks_lease_acquisition_until_resumed() {
        let engine = DispatchEngine::new(EngineConfig::default());
        setup_task(&engine);
        engine.register_worker(worker_record("w1")).await.unwrap();
        engine.submit_task("send_email", b"{}".to_vec()).await.unwrap();

        engine.pause_queue("emails").await.unwrap();
        assert!(engine.acquire_lease("w1", "emails", Ordering::Fifo).await.unwrap().is_none());

        engine.resume_queue("emails").await.unwrap();
        assert!(engine.acquire_lease("w1", "emails", Ordering::Fifo).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn draining_worker_keeps_current_lease_but_gets_no_new_work() {
        let engine = DispatchEngine::new(EngineConfig::default());
        setup_task(&engine);
        engine.register_worker(worker_record("w1")).await.unwrap();
        engine.submit_task("send_email", b"{}".to_vec()).await.unwrap();
        engine.submit_task("send_email", b"{}".to_vec()).await.unwrap();

        let first = engine.acquire_lease("w1", "emails", Ordering::Fifo).await.unwrap().unwrap();
        engine.drain_worker("w1").await.unwrap();
        assert!(engine.acquire_lease("w1", "emails", Ordering::Fifo).await.unwrap().is_none());
        engine.ack("emails", first.id, &first.routing_key).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_lease_only_hands_work_to_a_worker_with_the_required_capability() {
        let engine = DispatchEngine::new(EngineConfig::default());
        engine.declare_queue(QueueDef { name: "gpu-jobs".into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
        engine.declare_task(TaskDefinition {
            name: "render".into(),
            default_retry_policy: Default::default(),
            required_capability_labels: vec!["gpu".into()],
        });
        engine.declare_route(RouteRule { id: "r1".into(), task_name_pattern: "render".into(), queue: "gpu-jobs".into(), priority: 0 });

        engine.register_worker(worker_record("cpu-only")).await.unwrap();
        engine.register_worker(crate::store::WorkerRecord {
            capability_labels: vec!["gpu".into()],
            ..worker_record("gpu-worker")
        }).await.unwrap();

        let id = engine.submit_task("render", b"{}".to_vec()).await.unwrap();
        let envelope = engine.describe_envelope(id).await.unwrap().unwrap();
        assert_eq!(envelope.required_capabilities, vec!["gpu".to_string()]);

        // The worker missing the "gpu" label never gets the envelope, no
        // matter how many times it polls...
        assert!(engine.acquire_lease("cpu-only", "gpu-jobs", Ordering::Fifo).await.unwrap().is_none());
        // ...but the worker with it does.
        let leased = engine.acquire_lease("gpu-worker", "gpu-jobs", Ordering::Fifo).await.unwrap().unwrap();
        assert_eq!(leased.id, id);
    }

    #[tokio::test]
    async fn describe_envelope_finds_a_queued_envelope_without_removing_it() {
        let engine = DispatchEngine::new(EngineConfig::default());
        setup_task(&engine);
        let id = engine.submit_task("send_email", b"{}".to_vec()).await.unwrap();

        let found = engine.describe_envelope(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(engine.queue_stats("emails").await.unwrap().depth, 1);
        assert!(engine.describe_envelope(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_workflow_completes_linear_graph_after_task_finishes() {
        let engine = DispatchEngine::new(EngineConfig::default());
        setup_task(&engine);
        engine
            .declare_workflow(WorkflowGraphDef {
                name: "onboarding".into(),
                version: 1,
                start_node: "start".into(),
                nodes: vec![
                    Node { id: "start".into(), kind: NodeKind::Start },
                    Node { id: "task-1".into(), kind: NodeKind::Task { task_name: "send_email".into() } },
                    Node { id: "end".into(), kind: NodeKind::End },
                ],
                transitions: vec![
                    Transition { from: "start".into(), to: "task-1".into(), condition: None },
                    Transition { from: "task-1".into(), to: "end".into(), condition: None },
                ],
            })
            .unwrap();

        let instance_id = engine.start_workflow("onboarding", json!({})).await.unwrap();
        let instance = engine.get_workflow_instance(instance_id).await.unwrap();
        assert!(!instance.is_terminal());
        assert_eq!(engine.queue_stats("emails").await.unwrap().depth, 1);
    }
}
