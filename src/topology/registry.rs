//! Topology Registry (§4.1): a declarative, versioned catalog of exchanges,
//! queues, bindings, task/job definitions, route rules, and workflow graphs.
//!
//! Modeled on the teacher's `persistence/memory.rs` single-writer idiom: all
//! mutation goes through one `parking_lot::RwLock`, but readers never block
//! on each other and never observe a torn write, because every write
//! replaces the whole snapshot `Arc` atomically rather than mutating maps
//! in place (Design Notes: arena/handle style, here realized as
//! copy-on-write snapshots instead of integer handles, since the catalog is
//! small and replaced wholesale on most declarations).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::Reason;

use super::model::{Binding, Exchange, JobDefinition, QueueDef, RouteRule, TaskDefinition, WorkflowGraphDef};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("task definition not found: {0}")]
    TaskNotFound(String),
    #[error("job definition not found: {0}")]
    JobNotFound(String),
    #[error("workflow graph not found: {0}")]
    WorkflowNotFound(String),
    #[error("invalid declaration: {0}")]
    Invalid(String),
}

impl TopologyError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::ExchangeNotFound(_)
            | Self::QueueNotFound(_)
            | Self::TaskNotFound(_)
            | Self::JobNotFound(_)
            | Self::WorkflowNotFound(_) => Reason::NotFound,
            Self::Invalid(_) => Reason::InvalidDeclaration,
        }
    }
}

/// A consistent, immutable view of the whole catalog at one version.
#[derive(Debug, Default, Clone)]
pub struct TopologySnapshot {
    pub version: u64,
    pub exchanges: HashMap<String, Exchange>,
    pub queues: HashMap<String, QueueDef>,
    pub bindings: Vec<Binding>,
    pub task_defs: HashMap<String, TaskDefinition>,
    pub job_defs: HashMap<String, JobDefinition>,
    pub route_rules: Vec<RouteRule>,
    pub workflow_graphs: HashMap<String, WorkflowGraphDef>,
}

pub struct TopologyRegistry {
    inner: RwLock<Arc<TopologySnapshot>>,
}

impl Default for TopologyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(TopologySnapshot::default())),
        }
    }

    /// Lock-free (wrt. writers) consistent snapshot for readers.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.inner.read().clone()
    }

    fn replace(&self, f: impl FnOnce(&mut TopologySnapshot)) {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        next.version += 1;
        f(&mut next);
        *guard = Arc::new(next);
    }

    pub fn declare_exchange(&self, exchange: Exchange) {
        self.replace(|s| {
            s.exchanges.insert(exchange.name.clone(), exchange);
        });
    }

    pub fn declare_queue(&self, queue: QueueDef) {
        self.replace(|s| {
            s.queues.insert(queue.name.clone(), queue);
        });
    }

    pub fn declare_binding(&self, binding: Binding) -> Result<(), TopologyError> {
        let snap = self.snapshot();
        if !snap.exchanges.contains_key(&binding.exchange) {
            return Err(TopologyError::ExchangeNotFound(binding.exchange));
        }
        if !snap.queues.contains_key(&binding.queue) {
            return Err(TopologyError::QueueNotFound(binding.queue));
        }
        validate_topic_pattern(&binding.binding_key)
            .map_err(TopologyError::Invalid)?;
        self.replace(|s| s.bindings.push(binding));
        Ok(())
    }

    pub fn declare_task(&self, task: TaskDefinition) {
        self.replace(|s| {
            s.task_defs.insert(task.name.clone(), task);
        });
    }

    pub fn declare_job(&self, job: JobDefinition) {
        self.replace(|s| {
            s.job_defs.insert(job.name.clone(), job);
        });
    }

    pub fn declare_route(&self, route: RouteRule) {
        self.replace(|s| s.route_rules.push(route));
    }

    pub fn declare_workflow(&self, graph: WorkflowGraphDef) -> Result<(), TopologyError> {
        validate_graph(&graph)?;
        self.replace(|s| {
            s.workflow_graphs.insert(graph.name.clone(), graph);
        });
        Ok(())
    }

    pub fn list_bindings_from(&self, exchange: &str) -> Vec<Binding> {
        self.snapshot()
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .cloned()
            .collect()
    }

    pub fn list_routes_matching(&self, task_name: &str) -> Vec<RouteRule> {
        self.snapshot()
            .route_rules
            .iter()
            .filter(|r| crate::router::topic::glob_matches(&r.task_name_pattern, task_name))
            .cloned()
            .collect()
    }
}

/// Validates the `#`/`*` grammar at declaration time: `#` must not appear
/// adjacent to another `#` (SPEC_FULL.md §4.2).
fn validate_topic_pattern(pattern: &str) -> Result<(), String> {
    let parts: Vec<&str> = pattern.split('.').collect();
    for window in parts.windows(2) {
        if window[0] == "#" && window[1] == "#" {
            return Err(format!("adjacent '#' segments in pattern: {pattern}"));
        }
    }
    Ok(())
}

/// Structural validation of a workflow graph: every transition references a
/// declared node, and the start node exists.
fn validate_graph(graph: &WorkflowGraphDef) -> Result<(), TopologyError> {
    if graph.node(&graph.start_node).is_none() {
        return Err(TopologyError::Invalid(format!(
            "start node {} not declared",
            graph.start_node
        )));
    }
    for t in &graph.transitions {
        if graph.node(&t.from).is_none() {
            return Err(TopologyError::Invalid(format!("transition from unknown node {}", t.from)));
        }
        if graph.node(&t.to).is_none() {
            return Err(TopologyError::Invalid(format!("transition to unknown node {}", t.to)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::model::ExchangeKind;

    #[test]
    fn declare_and_lookup_exchange() {
        let reg = TopologyRegistry::new();
        reg.declare_exchange(Exchange {
            name: "orders".into(),
            kind: ExchangeKind::Topic,
        });
        let snap = reg.snapshot();
        assert!(snap.exchanges.contains_key("orders"));
        assert_eq!(snap.version, 1);
    }

    #[test]
    fn binding_rejects_unknown_exchange() {
        let reg = TopologyRegistry::new();
        reg.declare_queue(QueueDef {
            name: "q1".into(),
            ordering: super::super::model::Ordering::Fifo,
            max_length: None,
            dead_letter_target: None,
        });
        let err = reg
            .declare_binding(Binding {
                exchange: "missing".into(),
                queue: "q1".into(),
                binding_key: "a.b".into(),
                header_match: None,
            })
            .unwrap_err();
        assert!(matches!(err, TopologyError::ExchangeNotFound(_)));
    }

    #[test]
    fn binding_rejects_adjacent_hash() {
        let reg = TopologyRegistry::new();
        reg.declare_exchange(Exchange {
            name: "e".into(),
            kind: ExchangeKind::Topic,
        });
        reg.declare_queue(QueueDef {
            name: "q".into(),
            ordering: super::super::model::Ordering::Fifo,
            max_length: None,
            dead_letter_target: None,
        });
        let err = reg
            .declare_binding(Binding {
                exchange: "e".into(),
                queue: "q".into(),
                binding_key: "a.#.#".into(),
                header_match: None,
            })
            .unwrap_err();
        assert!(matches!(err, TopologyError::Invalid(_)));
    }

    #[test]
    fn snapshot_is_versioned_and_immutable() {
        let reg = TopologyRegistry::new();
        let before = reg.snapshot();
        reg.declare_exchange(Exchange {
            name: "e".into(),
            kind: ExchangeKind::Fanout,
        });
        assert_eq!(before.version, 0);
        assert!(before.exchanges.is_empty());
        assert_eq!(reg.snapshot().version, 1);
    }
}
