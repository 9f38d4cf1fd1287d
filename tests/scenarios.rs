//! End-to-end scenario coverage exercising the dispatch engine's public
//! surface the way a real caller would: declare topology, drive envelopes
//! through the store, and walk a declared workflow graph.

use std::time::Duration;

use dispatch_engine::prelude::*;
use dispatch_engine::topology::{DependencyType, JobDependency, Node, Transition};
use serde_json::json;

fn topic_exchange_topology() -> TopologyRegistry {
    let topology = TopologyRegistry::new();
    topology.declare_exchange(Exchange { name: "ex_topic".into(), kind: ExchangeKind::Topic });
    for (name, binding_key) in [("qA", "a.*.z"), ("qB", "a.#"), ("qC", "#.z")] {
        topology.declare_queue(QueueDef { name: name.into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
        topology
            .declare_binding(Binding { exchange: "ex_topic".into(), queue: name.into(), binding_key: binding_key.into(), header_match: None })
            .unwrap();
    }
    topology
}

#[test]
fn s1_topic_fan_out_resolves_expected_destination_sets() {
    let topology = topic_exchange_topology();
    let router = Router::new(&topology);

    let mut dests = router.route("ex_topic", "a.b.z", &Attributes::new()).unwrap();
    dests.sort();
    assert_eq!(dests, vec!["qA".to_string(), "qB".to_string(), "qC".to_string()]);

    assert_eq!(router.route("ex_topic", "a.b.c", &Attributes::new()).unwrap(), vec!["qB".to_string()]);
    assert_eq!(router.route("ex_topic", "x.y.z", &Attributes::new()).unwrap(), vec!["qC".to_string()]);

    let err = router.route("ex_topic", "b.c", &Attributes::new()).unwrap_err();
    assert!(matches!(err, RouteError::Unroutable(_)));
}

#[tokio::test]
async fn s2_retry_follows_declared_exponential_backoff_then_dead_letters() {
    let policy = RetryPolicy::exponential()
        .with_max_attempts(3)
        .with_initial_interval(Duration::from_secs(1))
        .with_backoff_coefficient(2.0)
        .with_jitter(0.0);

    let store = InMemoryStore::new();
    let mut envelope = Envelope::new("send_email", vec![], 0);
    envelope.retry_policy = policy;
    store.enqueue("emails", envelope, None).await.unwrap();

    // Attempt 1: immediate delivery, no delay.
    let mut leased = store.dequeue_ready("emails", Ordering::Fifo, chrono::Utc::now(), "w1").await.unwrap().unwrap();
    assert_eq!(leased.attempt, 0);

    let mut observed_delays = Vec::new();
    loop {
        leased.attempt += 1;
        let due = leased.retry_policy.has_attempts_remaining(leased.attempt);
        let delay = leased.retry_policy.delay_for_attempt(leased.attempt);
        observed_delays.push(delay);
        if !due {
            store.dead_letter("emails", leased.clone(), DeadLetterReason::MaxAttempts).await.unwrap();
            break;
        }
        leased.state = EnvelopeState::Retrying;
        store.retry("emails", leased.clone()).await.unwrap();
        leased = store.dequeue_ready("emails", Ordering::Fifo, chrono::Utc::now(), "w1").await.unwrap().unwrap();
    }

    // attempt=1 -> 0s, attempt=2 -> 1s, attempt=3 -> exhausted (max_attempts=3)
    assert_eq!(observed_delays, vec![Duration::ZERO, Duration::from_secs(1)]);
    let dead_letters = store.list_dead_letters("emails").await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].dead_letter_reason, Some(DeadLetterReason::MaxAttempts));
    assert_eq!(dead_letters[0].attempt, 2);
}

#[tokio::test]
async fn s3_dependency_gate_blocks_then_releases_after_upstream_success() {
    let engine = DispatchEngine::new(EngineConfig::default());
    engine.declare_queue(QueueDef { name: "etl".into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
    engine.declare_job(JobDefinition {
        name: "ingest".into(),
        cron_expression: None,
        dependencies: vec![],
        queue: "etl".into(),
        placement_strategy: None,
    });
    engine.declare_job(JobDefinition {
        name: "rollup".into(),
        cron_expression: None,
        dependencies: vec![JobDependency { depends_on_job_def: "ingest".into(), dependency_type: DependencyType::Success }],
        queue: "etl".into(),
        placement_strategy: None,
    });

    let err = engine.trigger_job("rollup").await.unwrap_err();
    assert!(matches!(err, DispatchError::Scheduler(_)));
    assert_eq!(engine.queue_stats("etl").await.unwrap().depth, 0);

    engine
        .register_worker(dispatch_engine::store::WorkerRecord {
            worker_id: "w1".into(),
            capability_labels: vec![],
            weight: 1,
            in_flight: 0,
            last_heartbeat: chrono::Utc::now(),
            draining: false,
        })
        .await
        .unwrap();

    // J1 runs and succeeds, through the same Consumer API a real worker uses.
    engine.trigger_job("ingest").await.unwrap();
    let leased = engine.acquire_lease("w1", "etl", Ordering::Fifo).await.unwrap().unwrap();
    assert_eq!(leased.routing_key, "ingest");
    engine.ack("etl", leased.id, &leased.routing_key).await.unwrap();

    // J2 becomes ready and runs exactly once.
    let run_id = engine.trigger_job("rollup").await.unwrap();
    assert_eq!(engine.queue_stats("etl").await.unwrap().depth, 1);
    let rollup_lease = engine.acquire_lease("w1", "etl", Ordering::Fifo).await.unwrap().unwrap();
    assert_eq!(rollup_lease.id, run_id);
    assert!(engine.acquire_lease("w1", "etl", Ordering::Fifo).await.unwrap().is_none());
}

#[tokio::test]
async fn s4_worker_loss_reclaims_envelope_for_redelivery_then_second_worker_acks() {
    let store = InMemoryStore::new();
    let envelope = Envelope::new("send_email", vec![], 0);
    let id = envelope.id;
    store.enqueue("emails", envelope, None).await.unwrap();

    // W leases E, then stops heartbeating — never acks.
    let leased = store.dequeue_ready("emails", Ordering::Fifo, chrono::Utc::now(), "w1").await.unwrap().unwrap();
    assert_eq!(leased.id, id);
    assert_eq!(store.queue_depth("emails").await.unwrap(), 0);

    // Reclaim loop evicts W and hands E's lease back.
    let reclaimed = store.reclaim_leases_for_workers(&["w1".to_string()]).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    let (queue, mut envelope) = reclaimed.into_iter().next().unwrap();
    assert_eq!(queue, "emails");
    envelope.attempt += 1;
    assert!(envelope.retry_policy.has_attempts_remaining(envelope.attempt));
    envelope.state = EnvelopeState::Retrying;
    envelope.not_before = None;
    store.retry(&queue, envelope).await.unwrap();

    // E is ready again with attempt incremented.
    assert_eq!(store.queue_depth("emails").await.unwrap(), 1);

    // W' leases and acks.
    let relet = store.dequeue_ready("emails", Ordering::Fifo, chrono::Utc::now(), "w2").await.unwrap().unwrap();
    assert_eq!(relet.id, id);
    assert_eq!(relet.attempt, 1);
    store.ack("emails", relet.id).await.unwrap();

    assert_eq!(store.queue_depth("emails").await.unwrap(), 0);
    assert!(store.reclaim_leases_for_workers(&["w2".to_string()]).await.unwrap().is_empty());
}

fn parallel_workflow_graph() -> WorkflowGraphDef {
    WorkflowGraphDef {
        name: "fan_out".to_string(),
        version: 1,
        start_node: "start".to_string(),
        nodes: vec![
            Node { id: "start".into(), kind: NodeKind::Start },
            Node { id: "split".into(), kind: NodeKind::Gateway { gateway: GatewayKind::Parallel } },
            Node { id: "t1".into(), kind: NodeKind::Task { task_name: "check_inventory".into() } },
            Node { id: "t2".into(), kind: NodeKind::Task { task_name: "check_fraud".into() } },
            Node { id: "join".into(), kind: NodeKind::Gateway { gateway: GatewayKind::Parallel } },
            Node { id: "end".into(), kind: NodeKind::End },
        ],
        transitions: vec![
            Transition { from: "start".into(), to: "split".into(), condition: None },
            Transition { from: "split".into(), to: "t1".into(), condition: None },
            Transition { from: "split".into(), to: "t2".into(), condition: None },
            Transition { from: "t1".into(), to: "join".into(), condition: None },
            Transition { from: "t2".into(), to: "join".into(), condition: None },
            Transition { from: "join".into(), to: "end".into(), condition: None },
        ],
    }
}

#[tokio::test]
async fn s5_parallel_workflow_joins_once_both_branches_complete() {
    let engine = DispatchEngine::new(EngineConfig::default());
    for (task, queue) in [("check_inventory", "inventory"), ("check_fraud", "fraud")] {
        engine.declare_queue(QueueDef { name: queue.into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
        engine.declare_task(TaskDefinition { name: task.into(), default_retry_policy: Default::default(), required_capability_labels: vec![] });
        engine.declare_route(RouteRule { id: format!("r-{task}"), task_name_pattern: task.into(), queue: queue.into(), priority: 0 });
    }
    engine.declare_workflow(parallel_workflow_graph()).unwrap();

    let instance_id = engine.start_workflow("fan_out", json!({})).await.unwrap();
    let instance = engine.get_workflow_instance(instance_id).await.unwrap();
    assert!(!instance.is_terminal());
    assert_eq!(instance.frontier.len(), 2);
    assert_eq!(instance.active_envelopes.len(), 2);

    // Drive both task completions through the interpreter path the Execution
    // Runtime uses once a worker acks: load the instance, complete each
    // branch directly against the store the way the runtime would for a
    // scheduled task node, then re-save.
    let mut instance = engine.get_workflow_instance(instance_id).await.unwrap();
    let t1_envelope = instance.active_envelope("t1").unwrap();
    let t2_envelope = instance.active_envelope("t2").unwrap();

    let interpreter = GraphInterpreter::new();
    let graph = parallel_workflow_graph();
    let task_queues: std::collections::HashMap<String, String> =
        [("check_inventory".to_string(), "inventory".to_string()), ("check_fraud".to_string(), "fraud".to_string())]
            .into_iter()
            .collect();

    let actions = interpreter.on_task_completed(&graph, &mut instance, "t1", t1_envelope, json!({}), &task_queues).unwrap();
    assert!(actions.is_empty(), "first arrival at the join must not emit an action");
    assert!(!instance.is_terminal());

    let actions = interpreter.on_task_completed(&graph, &mut instance, "t2", t2_envelope, json!({}), &task_queues).unwrap();
    assert!(!actions.is_empty(), "second arrival must complete the join and emit the end transition");
    assert!(instance.is_terminal());
    assert!(instance.frontier.is_empty());

    let end_events = instance.history.iter().filter(|e| matches!(e, WorkflowEvent::NodeEntered { node_id } if node_id == "end")).count();
    assert_eq!(end_events, 1, "exactly one end event, no early/duplicate join emission");
}

fn boundary_timer_graph() -> WorkflowGraphDef {
    WorkflowGraphDef {
        name: "approval_with_timeout".to_string(),
        version: 1,
        start_node: "start".to_string(),
        nodes: vec![
            Node { id: "start".into(), kind: NodeKind::Start },
            Node { id: "split".into(), kind: NodeKind::Gateway { gateway: GatewayKind::Parallel } },
            Node { id: "approve".into(), kind: NodeKind::Task { task_name: "request_approval".into() } },
            // Modeled with a 0ms duration rather than the scenario's literal
            // PT5S: the interpreter's firing logic is time-value agnostic,
            // and a real 5s sleep would make this test slow for no added
            // coverage of the cancellation behavior itself.
            Node { id: "timeout".into(), kind: NodeKind::Timer { duration_ms: Some(0), interrupting: true } },
            Node { id: "end".into(), kind: NodeKind::End },
        ],
        transitions: vec![
            Transition { from: "start".into(), to: "split".into(), condition: None },
            Transition { from: "split".into(), to: "approve".into(), condition: None },
            Transition { from: "split".into(), to: "timeout".into(), condition: None },
            Transition { from: "timeout".into(), to: "end".into(), condition: None },
        ],
    }
}

#[tokio::test]
async fn s6_interrupting_boundary_timer_revokes_sibling_task_and_completes_via_timer_path() {
    let engine = DispatchEngine::new(EngineConfig::default());
    engine.declare_queue(QueueDef { name: "approvals".into(), ordering: Ordering::Fifo, max_length: None, dead_letter_target: None });
    engine.declare_task(TaskDefinition { name: "request_approval".into(), default_retry_policy: Default::default(), required_capability_labels: vec![] });
    engine.declare_route(RouteRule { id: "r-approve".into(), task_name_pattern: "request_approval".into(), queue: "approvals".into(), priority: 0 });
    engine.declare_workflow(boundary_timer_graph()).unwrap();

    let instance_id = engine.start_workflow("approval_with_timeout", json!({})).await.unwrap();
    let before = engine.get_workflow_instance(instance_id).await.unwrap();
    assert_eq!(before.frontier.len(), 2);
    assert_eq!(engine.queue_stats("approvals").await.unwrap().depth, 1);

    // The timer's 0ms duration means it is immediately due.
    let fired = engine.drain_due_timers().await.unwrap();
    assert_eq!(fired, 1);

    let after = engine.get_workflow_instance(instance_id).await.unwrap();
    assert!(after.is_terminal());
    assert!(after.frontier.is_empty());
    assert!(!after.variables.contains_key("approved"), "cancelled task produced no output variables");

    let end_events = after.history.iter().filter(|e| matches!(e, WorkflowEvent::NodeEntered { node_id } if node_id == "end")).count();
    assert_eq!(end_events, 1);

    // T's envelope was revoked: it's gone from the queue and dead-lettered
    // with `Rejected`, the terminal state a mid-flight cancellation reaches.
    let stats = engine.queue_stats("approvals").await.unwrap();
    assert_eq!(stats.depth, 0);
    assert_eq!(stats.dead_lettered, 1);
}
