//! # Dispatch Engine
//!
//! An in-process message/task/job/workflow dispatch engine: a Topology
//! Registry of declared exchanges/queues/tasks/jobs/workflows, a Router that
//! resolves envelopes to queues, a Scheduler for cron/delay/dependency/rate
//! concerns, a Worker Pool Manager that executes envelopes with
//! backpressure, an Execution Runtime that drives the envelope lifecycle,
//! and a Workflow Interpreter that walks declared graphs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TopologyRegistry                          │
//! │   (exchanges, queues, bindings, task/job/route/workflow defs)│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            ▼                 ▼                 ▼
//! ┌──────────────────┐ ┌───────────────┐ ┌─────────────────────┐
//! │       Router      │ │   Scheduler   │ │  Workflow Interpreter│
//! │ (direct/fanout/    │ │ (cron, delay, │ │  (GraphInterpreter   │
//! │  topic/headers)    │ │  dependency,  │ │   over WorkflowGraphDef)
//! │                    │ │  rate limit)  │ │                      │
//! └──────────────────┘ └───────────────┘ └─────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionRuntime                           │
//! │      (submit/publish/revoke, expiry sweep, DispatchStore)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                              │
//! │  (claims envelopes, executes handlers, sends heartbeats)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dispatch_engine::prelude::*;
//!
//! let engine = DispatchEngine::new(EngineConfig::default());
//! engine.declare_queue(QueueDef {
//!     name: "emails".into(),
//!     ordering: Ordering::Fifo,
//!     max_length: None,
//!     dead_letter_target: None,
//! });
//! engine.declare_task(TaskDefinition {
//!     name: "send_email".into(),
//!     default_retry_policy: RetryPolicy::default(),
//!     required_capability_labels: vec![],
//! });
//! engine.declare_route(RouteRule {
//!     id: "r1".into(),
//!     task_name_pattern: "send_email".into(),
//!     queue: "emails".into(),
//!     priority: 0,
//! });
//! let envelope_id = engine.submit_task("send_email", b"{}".to_vec()).await?;
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod observability;
pub mod reliability;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod topology;
pub mod worker;
pub mod workflow;

mod facade;

pub use facade::{DispatchEngine, QueueStats};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::envelope::{
        AckMode, AttributeValue, Attributes, DeadLetterReason, Envelope, EnvelopeKind, EnvelopeState,
        ResourceAsk,
    };
    pub use crate::error::{DispatchError, Reason};
    pub use crate::facade::DispatchEngine;
    pub use crate::observability::{AuditEvent, AuditFilter, MetricValue};
    pub use crate::reliability::RetryPolicy;
    pub use crate::router::{RouteError, Router};
    pub use crate::runtime::{ExecutionRuntime, ExecutorError};
    pub use crate::store::{DispatchStore, InMemoryStore, StoreError};
    pub use crate::topology::{
        Binding, Exchange, ExchangeKind, GatewayKind, JobDefinition, NodeKind, Ordering, QueueDef,
        RouteRule, TaskDefinition, TopologyRegistry, WorkflowGraphDef,
    };
    pub use crate::worker::{PlacementStrategy, WorkerPool, WorkerPoolConfig, WorkerPoolError};
    pub use crate::workflow::{
        GraphInterpreter, TaskOptions, WorkflowAction, WorkflowError, WorkflowEvent, WorkflowInstance,
        WorkflowSignal,
    };
}
