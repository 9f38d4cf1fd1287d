//! Router (§4.2): resolves a published envelope to destination queues via an
//! exchange's bindings, and resolves a task name to a queue via route rules.

use thiserror::Error;

use crate::envelope::Attributes;
use crate::error::Reason;
use crate::topology::{ExchangeKind, RouteRule, TopologyRegistry};

use super::headers::headers_match;
use super::topic::{glob_matches, topic_matches};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("exchange not declared: {0}")]
    UnknownExchange(String),
    #[error("no binding/route matched routing key {0:?}")]
    Unroutable(String),
}

impl RouteError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::UnknownExchange(_) => Reason::NotFound,
            Self::Unroutable(_) => Reason::Unroutable,
        }
    }
}

pub struct Router<'a> {
    topology: &'a TopologyRegistry,
}

impl<'a> Router<'a> {
    pub fn new(topology: &'a TopologyRegistry) -> Self {
        Self { topology }
    }

    /// Resolve the set of queue names a published envelope fans out to.
    pub fn route(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: &Attributes,
    ) -> Result<Vec<String>, RouteError> {
        let snapshot = self.topology.snapshot();
        let exchange_def = snapshot
            .exchanges
            .get(exchange)
            .ok_or_else(|| RouteError::UnknownExchange(exchange.to_string()))?;

        let bindings = self.topology.list_bindings_from(exchange);
        let mut queues: Vec<String> = match exchange_def.kind {
            ExchangeKind::Fanout => bindings.into_iter().map(|b| b.queue).collect(),
            ExchangeKind::Direct => bindings
                .into_iter()
                .filter(|b| b.binding_key == routing_key)
                .map(|b| b.queue)
                .collect(),
            ExchangeKind::Topic => bindings
                .into_iter()
                .filter(|b| topic_matches(&b.binding_key, routing_key))
                .map(|b| b.queue)
                .collect(),
            ExchangeKind::Headers => bindings
                .into_iter()
                .filter(|b| {
                    b.header_match
                        .as_ref()
                        .map(|(mode, required)| headers_match(*mode, required, headers))
                        .unwrap_or(false)
                })
                .map(|b| b.queue)
                .collect(),
        };

        let mut seen = std::collections::HashSet::with_capacity(queues.len());
        queues.retain(|q| seen.insert(q.clone()));

        if queues.is_empty() {
            return Err(RouteError::Unroutable(routing_key.to_string()));
        }
        Ok(queues)
    }

    /// Resolve a task name to the highest-priority matching route rule.
    ///
    /// Ties break lexicographically by rule id, per SPEC_FULL.md §4.2.
    /// Grounded in `iteration349_task_queue.py::_route_task`'s
    /// descending-priority sort over glob-matched routes.
    pub fn route_task(&self, task_name: &str) -> Result<RouteRule, RouteError> {
        let mut candidates = self.topology.list_routes_matching(task_name);
        candidates.retain(|r| glob_matches(&r.task_name_pattern, task_name));
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| RouteError::Unroutable(task_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Binding, Exchange, QueueDef};

    fn setup() -> TopologyRegistry {
        let reg = TopologyRegistry::new();
        reg.declare_exchange(Exchange {
            name: "orders".into(),
            kind: ExchangeKind::Topic,
        });
        reg.declare_queue(QueueDef {
            name: "q.created".into(),
            ordering: crate::topology::Ordering::Fifo,
            max_length: None,
            dead_letter_target: None,
        });
        reg.declare_binding(Binding {
            exchange: "orders".into(),
            queue: "q.created".into(),
            binding_key: "order.created.*".into(),
            header_match: None,
        })
        .unwrap();
        reg
    }

    #[test]
    fn topic_route_resolves_bound_queue() {
        let reg = setup();
        let router = Router::new(&reg);
        let queues = router
            .route("orders", "order.created.us", &Default::default())
            .unwrap();
        assert_eq!(queues, vec!["q.created".to_string()]);
    }

    #[test]
    fn unmatched_key_is_unroutable() {
        let reg = setup();
        let router = Router::new(&reg);
        let err = router
            .route("orders", "order.shipped.us", &Default::default())
            .unwrap_err();
        assert!(matches!(err, RouteError::Unroutable(_)));
    }

    #[test]
    fn fanout_route_dedups_while_preserving_first_match_order() {
        let reg = TopologyRegistry::new();
        reg.declare_exchange(Exchange { name: "ex".into(), kind: ExchangeKind::Fanout });
        for (queue, binding_key) in [("c", "any"), ("a", "any"), ("c", "any"), ("b", "any")] {
            reg.declare_queue(QueueDef {
                name: queue.into(),
                ordering: crate::topology::Ordering::Fifo,
                max_length: None,
                dead_letter_target: None,
            });
            reg.declare_binding(Binding { exchange: "ex".into(), queue: queue.into(), binding_key: binding_key.into(), header_match: None }).unwrap();
        }
        let router = Router::new(&reg);
        let queues = router.route("ex", "ignored", &Default::default()).unwrap();
        assert_eq!(queues, vec!["c".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn route_task_breaks_ties_by_priority_then_id() {
        let reg = TopologyRegistry::new();
        reg.declare_route(RouteRule {
            id: "b".into(),
            task_name_pattern: "email.*".into(),
            queue: "low".into(),
            priority: 5,
        });
        reg.declare_route(RouteRule {
            id: "a".into(),
            task_name_pattern: "email.*".into(),
            queue: "high".into(),
            priority: 5,
        });
        let router = Router::new(&reg);
        let rule = router.route_task("email.send").unwrap();
        assert_eq!(rule.id, "a");
    }
}
