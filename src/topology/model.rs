//! Declarative topology entities (§3).
//!
//! These structs are immutable once registered: a redeclare replaces the
//! whole entity under the Topology Registry's versioned-snapshot discipline
//! rather than being mutated in place.

use serde::{Deserialize, Serialize};

use crate::envelope::Attributes;
use crate::reliability::RetryPolicy;
use crate::worker::PlacementStrategy;

/// How an exchange distributes a published envelope to bound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Routed to exactly the queues whose binding key equals the routing key.
    Direct,
    /// Routed to every bound queue, ignoring the routing key.
    Fanout,
    /// Routed using the `#`/`*` glob grammar over dot-separated segments.
    Topic,
    /// Routed by AND/OR matching of header attributes.
    Headers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
}

/// FIFO/priority/LIFO ordering within a queue (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ordering {
    Fifo,
    Priority,
    Lifo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDef {
    pub name: String,
    pub ordering: Ordering,
    /// `None` means unbounded.
    pub max_length: Option<usize>,
    /// Name of the exchange/queue to dead-letter into, if any.
    pub dead_letter_target: Option<String>,
}

/// `x-match` semantics for a headers binding (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMatchMode {
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    /// Binding key for direct/topic exchanges; ignored for fanout/headers.
    pub binding_key: String,
    /// Required header values for a headers exchange binding.
    pub header_match: Option<(HeaderMatchMode, Attributes)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub default_retry_policy: RetryPolicy,
    pub required_capability_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    pub id: String,
    /// Glob pattern (`*` single segment, `**`/`#` trailing) over task names.
    pub task_name_pattern: String,
    pub queue: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependencyType {
    /// Dependency's latest terminal run must be `Completed`.
    Success,
    /// Dependency's latest terminal run must be `Completed` or `Failed`.
    Completion,
    /// Dependency's latest terminal run must be `Failed` — compensation/alerting
    /// job chains that should only fire once the thing they react to broke.
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDependency {
    pub depends_on_job_def: String,
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub cron_expression: Option<String>,
    pub dependencies: Vec<JobDependency>,
    pub queue: String,
    pub placement_strategy: Option<PlacementStrategy>,
}

/// Graph node kinds the Workflow Interpreter executes (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Task {
        task_name: String,
    },
    Gateway {
        gateway: GatewayKind,
    },
    Timer {
        /// Milliseconds to wait, or an absolute ISO8601 timestamp.
        duration_ms: Option<u64>,
        interrupting: bool,
    },
    HumanTask {
        form: String,
    },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Exclusive,
    Parallel,
    Inclusive,
    EventBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    /// Guard expression source; `None` marks the default transition out of a gateway.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraphDef {
    pub name: String,
    pub version: u32,
    pub nodes: Vec<Node>,
    pub transitions: Vec<Transition>,
    pub start_node: String,
}

impl WorkflowGraphDef {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn transitions_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.from == node_id)
    }
}
