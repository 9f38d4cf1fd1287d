//! Topology Registry (§4.1): declarative catalog of exchanges, queues,
//! bindings, task/job definitions, route rules, and workflow graphs.

mod model;
mod registry;

pub use model::{
    Binding, DependencyType, Exchange, ExchangeKind, GatewayKind, HeaderMatchMode, JobDefinition,
    JobDependency, Node, NodeKind, Ordering, QueueDef, RouteRule, TaskDefinition, Transition,
    WorkflowGraphDef,
};
pub use registry::{TopologyError, TopologyRegistry, TopologySnapshot};
