//! Graph interpreter (§4.6).
//!
//! Replaces the teacher's compile-time `Workflow` trait — one hand-coded
//! Rust type per workflow — with a single type that interprets any declared
//! `WorkflowGraphDef`. Keeps the teacher's event-sourcing discipline: every
//! state change is first appended to the instance's history, then folded,
//! and the interpreter itself holds no state of its own (`GraphInterpreter`
//! is a stateless unit struct, like `TimeoutManager`).
//!
//! An inclusive join only waits on the incoming transitions its matching
//! split actually activated (see `live_incoming`/`branch_is_live` below),
//! not the node's full statically-declared incoming set — a partial
//! inclusive split (guards chose some but not all outgoing branches) would
//! otherwise deadlock a downstream join waiting on a transition that can
//! never fire. See DESIGN.md's Open Question decisions for the exact
//! reverse-reachability rule applied.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::action::WorkflowAction;
use super::error::WorkflowError;
use super::event::WorkflowEvent;
use super::guard::GuardExpr;
use super::instance::WorkflowInstance;
use crate::topology::{GatewayKind, Node, NodeKind, Transition, WorkflowGraphDef};

/// Interprets a [`WorkflowGraphDef`] against a [`WorkflowInstance`], turning
/// history events into the next batch of [`WorkflowAction`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphInterpreter;

impl GraphInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Activate the graph's start node for a freshly created instance.
    pub fn start(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        self.enter_node(graph, instance, &graph.start_node, None, task_queues)
    }

    /// A task's envelope succeeded; merge its output and advance.
    pub fn on_task_completed(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        envelope_id: Uuid,
        output: serde_json::Value,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        instance.append(WorkflowEvent::TaskCompleted {
            node_id: node_id.to_string(),
            envelope_id,
            result: output.clone(),
        });
        if let serde_json::Value::Object(map) = output {
            for (key, value) in map {
                instance.append(WorkflowEvent::VariableSet { key, value });
            }
        }
        self.leave(graph, instance, node_id, task_queues)
    }

    /// A task's envelope exhausted retries; fail the instance.
    pub fn on_task_failed(
        &self,
        instance: &mut WorkflowInstance,
        node_id: &str,
        envelope_id: Uuid,
        error: String,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        instance.append(WorkflowEvent::TaskFailed {
            node_id: node_id.to_string(),
            envelope_id,
            error: error.clone(),
        });
        instance.append(WorkflowEvent::InstanceFailed { error: error.clone() });
        Ok(vec![WorkflowAction::fail(error)])
    }

    /// A timer node fired; cancel interrupted siblings, then advance.
    pub fn on_timer_fired(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let node = Self::node(graph, node_id)?;
        let interrupting = matches!(node.kind, NodeKind::Timer { interrupting: true, .. });

        let mut actions = Vec::new();
        if interrupting {
            let siblings: Vec<String> = instance
                .frontier
                .iter()
                .filter(|n| n.as_str() != node_id)
                .cloned()
                .collect();
            for sibling in siblings {
                if let Some(envelope_id) = instance.active_envelope(&sibling) {
                    instance.append(WorkflowEvent::TaskFailed {
                        node_id: sibling.clone(),
                        envelope_id,
                        error: "cancelled_by_boundary_event".to_string(),
                    });
                    actions.push(WorkflowAction::CancelTask { node_id: sibling, envelope_id });
                }
            }
        }

        instance.append(WorkflowEvent::TimerFired { node_id: node_id.to_string() });
        actions.extend(self.leave(graph, instance, node_id, task_queues)?);
        Ok(actions)
    }

    /// An external "complete" command resumed a human task node.
    pub fn on_human_task_completed(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        output: serde_json::Value,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        if let serde_json::Value::Object(map) = output {
            for (key, value) in map {
                instance.append(WorkflowEvent::VariableSet { key, value });
            }
        }
        instance.frontier.retain(|n| n != node_id);
        self.leave(graph, instance, node_id, task_queues)
    }

    /// Cancel the instance immediately, regardless of frontier state.
    pub fn cancel(&self, instance: &mut WorkflowInstance, reason: String) -> Vec<WorkflowAction> {
        instance.append(WorkflowEvent::InstanceCancelled { reason: reason.clone() });
        vec![WorkflowAction::CancelInstance { reason }]
    }

    fn node<'a>(graph: &'a WorkflowGraphDef, node_id: &str) -> Result<&'a Node, WorkflowError> {
        graph.node(node_id).ok_or_else(|| WorkflowError::NodeNotFound {
            graph: graph.name.clone(),
            node: node_id.to_string(),
        })
    }

    /// Move a single token out of `node_id`, along whichever transition(s)
    /// its kind implies, entering each destination node in turn.
    fn leave(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let targets = graph.transitions_from(node_id).map(|t| t.to.clone()).next();
        match targets {
            Some(to) => self.enter_node(graph, instance, &to, Some(node_id), task_queues),
            None => Err(WorkflowError::NoSatisfiedTransition(node_id.to_string())),
        }
    }

    fn enter_node(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        from: Option<&str>,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let node = Self::node(graph, node_id)?;
        match node.kind.clone() {
            NodeKind::Start => {
                instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });
                self.leave_single_or_exclusive(graph, instance, node_id, task_queues)
            }
            NodeKind::Task { task_name } => {
                instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });
                let queue = task_queues.get(&task_name).cloned().unwrap_or_else(|| task_name.clone());
                let input = serde_json::to_value(&instance.variables).unwrap_or(serde_json::Value::Null);
                Ok(vec![WorkflowAction::schedule_task(node_id, task_name, queue, input)])
            }
            NodeKind::Timer { duration_ms, interrupting } => {
                instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });
                let duration = Duration::from_millis(duration_ms.unwrap_or(0));
                let fire_at = Utc::now()
                    + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
                instance.append(WorkflowEvent::TimerStarted {
                    node_id: node_id.to_string(),
                    fire_at,
                    interrupting,
                });
                Ok(vec![WorkflowAction::StartTimer { node_id: node_id.to_string(), duration, interrupting }])
            }
            NodeKind::HumanTask { .. } => {
                instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });
                Ok(vec![])
            }
            NodeKind::End => {
                instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });
                // An end node consumes its token immediately; it never stays
                // on the frontier awaiting anything further.
                instance.frontier.retain(|n| n != node_id);
                if let Some(from) = from {
                    instance.frontier.retain(|n| n != from);
                }
                if instance.frontier.is_empty() {
                    let result = serde_json::to_value(&instance.variables).unwrap_or(serde_json::Value::Null);
                    instance.append(WorkflowEvent::InstanceCompleted { result: result.clone() });
                    return Ok(vec![WorkflowAction::complete(result)]);
                }
                Ok(vec![])
            }
            NodeKind::Gateway { gateway } => self.enter_gateway(graph, instance, node_id, from, gateway, task_queues),
        }
    }

    fn enter_gateway(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        from: Option<&str>,
        gateway: GatewayKind,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let incoming: Vec<String> = graph
            .transitions
            .iter()
            .filter(|t| t.to == node_id)
            .map(|t| t.from.clone())
            .filter(|from| gateway != GatewayKind::Inclusive || self.branch_is_live(graph, instance, from, node_id))
            .collect();

        if matches!(gateway, GatewayKind::Parallel | GatewayKind::Inclusive) && incoming.len() > 1 {
            let from = from.ok_or_else(|| WorkflowError::NodeNotFound {
                graph: graph.name.clone(),
                node: node_id.to_string(),
            })?;
            let complete = instance.record_join_arrival(node_id, from, &incoming);
            if !complete {
                return Ok(vec![]);
            }
            instance.clear_join(node_id);
        }

        instance.append(WorkflowEvent::NodeEntered { node_id: node_id.to_string() });

        match gateway {
            GatewayKind::Exclusive => self.leave_single_or_exclusive(graph, instance, node_id, task_queues),
            GatewayKind::EventBased => self.leave_single_or_exclusive(graph, instance, node_id, task_queues),
            GatewayKind::Parallel => {
                let transitions: Vec<String> = graph.transitions_from(node_id).map(|t| t.to.clone()).collect();
                instance.append(WorkflowEvent::GatewayEvaluated {
                    node_id: node_id.to_string(),
                    chosen_transitions: transitions.clone(),
                });
                let mut actions = Vec::new();
                for to in transitions {
                    actions.extend(self.enter_node(graph, instance, &to, Some(node_id), task_queues)?);
                }
                Ok(actions)
            }
            GatewayKind::Inclusive => {
                let transitions: Vec<&crate::topology::Transition> = graph.transitions_from(node_id).collect();
                let mut chosen = Vec::new();
                for t in &transitions {
                    if let Some(cond) = &t.condition {
                        if GuardExpr::parse(cond)?.eval(&instance.variables)? {
                            chosen.push(t.to.clone());
                        }
                    }
                }
                if chosen.is_empty() {
                    chosen = transitions
                        .iter()
                        .filter(|t| t.condition.is_none())
                        .map(|t| t.to.clone())
                        .collect();
                }
                if chosen.is_empty() {
                    return Err(WorkflowError::NoSatisfiedTransition(node_id.to_string()));
                }
                instance.append(WorkflowEvent::GatewayEvaluated {
                    node_id: node_id.to_string(),
                    chosen_transitions: chosen.clone(),
                });
                let mut actions = Vec::new();
                for to in chosen {
                    actions.extend(self.enter_node(graph, instance, &to, Some(node_id), task_queues)?);
                }
                Ok(actions)
            }
        }
    }

    /// Whether the edge `edge_from -> edge_to` can still deliver a token to
    /// an inclusive join, given what its originating split actually chose.
    ///
    /// Walks backward from `edge_from` through the chain of single-exit
    /// nodes (every node kind but a gateway has exactly one outgoing
    /// transition taken per visit) until it reaches a gateway. A `Parallel`
    /// gateway always activates every outgoing edge, so anything reachable
    /// through one is live. An `Inclusive` gateway only activated the
    /// transitions recorded in its own `GatewayEvaluated` event, so the edge
    /// is live only if that event's `chosen_transitions` names the node this
    /// walk is about to step through. Ambiguous cases (the chain forks, or
    /// bottoms out at the start node without finding a gateway) are treated
    /// as live rather than risking a false deadlock.
    fn branch_is_live(&self, graph: &WorkflowGraphDef, instance: &WorkflowInstance, edge_from: &str, edge_to: &str) -> bool {
        let mut to = edge_to.to_string();
        let mut from = edge_from.to_string();
        loop {
            let node = match graph.node(&from) {
                Some(n) => n,
                None => return true,
            };
            if let NodeKind::Gateway { gateway } = &node.kind {
                if *gateway != GatewayKind::Inclusive {
                    return true;
                }
                return instance.history.iter().any(|e| {
                    matches!(
                        e,
                        WorkflowEvent::GatewayEvaluated { node_id, chosen_transitions }
                            if node_id == &from && chosen_transitions.contains(&to)
                    )
                });
            }
            let preds: Vec<&Transition> = graph.transitions.iter().filter(|t| t.to == from).collect();
            match preds.as_slice() {
                [p] => {
                    to = from.clone();
                    from = p.from.clone();
                }
                _ => return true,
            }
        }
    }

    /// Shared exclusive-choice logic used by exclusive gateways, the start
    /// node, and event-based gateways (whose first-firing-wins race is
    /// modeled upstream, at the point `on_*` is invoked by the runtime).
    fn leave_single_or_exclusive(
        &self,
        graph: &WorkflowGraphDef,
        instance: &mut WorkflowInstance,
        node_id: &str,
        task_queues: &HashMap<String, String>,
    ) -> Result<Vec<WorkflowAction>, WorkflowError> {
        let transitions: Vec<&crate::topology::Transition> = graph.transitions_from(node_id).collect();
        if transitions.is_empty() {
            return Err(WorkflowError::NoSatisfiedTransition(node_id.to_string()));
        }

        let mut chosen = None;
        for t in &transitions {
            if let Some(cond) = &t.condition {
                if GuardExpr::parse(cond)?.eval(&instance.variables)? {
                    chosen = Some((*t).clone());
                    break;
                }
            }
        }
        let chosen = match chosen {
            Some(t) => t,
            None => transitions
                .iter()
                .find(|t| t.condition.is_none())
                .map(|t| (*t).clone())
                .ok_or_else(|| WorkflowError::NoSatisfiedTransition(node_id.to_string()))?,
        };

        instance.append(WorkflowEvent::GatewayEvaluated {
            node_id: node_id.to_string(),
            chosen_transitions: vec![chosen.to.clone()],
        });
        self.enter_node(graph, instance, &chosen.to, Some(node_id), task_queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Node, Transition};
    use serde_json::json;

    fn linear_graph() -> WorkflowGraphDef {
        WorkflowGraphDef {
            name: "linear".to_string(),
            version: 1,
            start_node: "start".to_string(),
            nodes: vec![
                Node { id: "start".to_string(), kind: NodeKind::Start },
                Node { id: "task-1".to_string(), kind: NodeKind::Task { task_name: "send_email".to_string() } },
                Node { id: "end".to_string(), kind: NodeKind::End },
            ],
            transitions: vec![
                Transition { from: "start".to_string(), to: "task-1".to_string(), condition: None },
                Transition { from: "task-1".to_string(), to: "end".to_string(), condition: None },
            ],
        }
    }

    fn exclusive_graph() -> WorkflowGraphDef {
        WorkflowGraphDef {
            name: "branch".to_string(),
            version: 1,
            start_node: "start".to_string(),
            nodes: vec![
                Node { id: "start".to_string(), kind: NodeKind::Start },
                Node { id: "gw".to_string(), kind: NodeKind::Gateway { gateway: GatewayKind::Exclusive } },
                Node { id: "approved".to_string(), kind: NodeKind::End },
                Node { id: "rejected".to_string(), kind: NodeKind::End },
            ],
            transitions: vec![
                Transition { from: "start".to_string(), to: "gw".to_string(), condition: None },
                Transition { from: "gw".to_string(), to: "approved".to_string(), condition: Some("amount <= 100".to_string()) },
                Transition { from: "gw".to_string(), to: "rejected".to_string(), condition: None },
            ],
        }
    }

    fn parallel_graph() -> WorkflowGraphDef {
        WorkflowGraphDef {
            name: "fork_join".to_string(),
            version: 1,
            start_node: "start".to_string(),
            nodes: vec![
                Node { id: "start".to_string(), kind: NodeKind::Start },
                Node { id: "split".to_string(), kind: NodeKind::Gateway { gateway: GatewayKind::Parallel } },
                Node { id: "task-a".to_string(), kind: NodeKind::Task { task_name: "a".to_string() } },
                Node { id: "task-b".to_string(), kind: NodeKind::Task { task_name: "b".to_string() } },
                Node { id: "join".to_string(), kind: NodeKind::Gateway { gateway: GatewayKind::Parallel } },
                Node { id: "end".to_string(), kind: NodeKind::End },
            ],
            transitions: vec![
                Transition { from: "start".to_string(), to: "split".to_string(), condition: None },
                Transition { from: "split".to_string(), to: "task-a".to_string(), condition: None },
                Transition { from: "split".to_string(), to: "task-b".to_string(), condition: None },
                Transition { from: "task-a".to_string(), to: "join".to_string(), condition: None },
                Transition { from: "task-b".to_string(), to: "join".to_string(), condition: None },
                Transition { from: "join".to_string(), to: "end".to_string(), condition: None },
            ],
        }
    }

    #[test]
    fn start_schedules_first_task() {
        let graph = linear_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "linear", 1, json!({}));
        let interpreter = GraphInterpreter::new();
        let actions = interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], WorkflowAction::ScheduleTask { node_id, .. } if node_id == "task-1"));
    }

    #[test]
    fn task_completion_reaches_end_and_completes_instance() {
        let graph = linear_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "linear", 1, json!({}));
        let interpreter = GraphInterpreter::new();
        interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();

        let envelope_id = Uuid::now_v7();
        let actions = interpreter
            .on_task_completed(&graph, &mut instance, "task-1", envelope_id, json!({"ok": true}), &HashMap::new())
            .unwrap();

        assert!(matches!(&actions[0], WorkflowAction::CompleteInstance { .. }));
        assert!(instance.is_terminal());
    }

    #[test]
    fn exclusive_gateway_picks_first_satisfied_guard() {
        let graph = exclusive_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "branch", 1, json!({}));
        instance.append(WorkflowEvent::VariableSet { key: "amount".to_string(), value: json!(50) });
        let interpreter = GraphInterpreter::new();
        let actions = interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();
        assert!(matches!(&actions[0], WorkflowAction::CompleteInstance { .. }));
        assert!(instance.frontier.is_empty());
    }

    #[test]
    fn exclusive_gateway_falls_back_to_default() {
        let graph = exclusive_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "branch", 1, json!({}));
        instance.append(WorkflowEvent::VariableSet { key: "amount".to_string(), value: json!(500) });
        let interpreter = GraphInterpreter::new();
        interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();
        let completed = instance
            .history
            .iter()
            .any(|e| matches!(e, WorkflowEvent::InstanceCompleted { .. }));
        assert!(completed);
    }

    fn inclusive_graph() -> WorkflowGraphDef {
        WorkflowGraphDef {
            name: "inclusive_fork_join".to_string(),
            version: 1,
            start_node: "start".to_string(),
            nodes: vec![
                Node { id: "start".to_string(), kind: NodeKind::Start },
                Node { id: "split".to_string(), kind: NodeKind::Gateway { gateway: GatewayKind::Inclusive } },
                Node { id: "task-a".to_string(), kind: NodeKind::Task { task_name: "a".to_string() } },
                Node { id: "task-b".to_string(), kind: NodeKind::Task { task_name: "b".to_string() } },
                Node { id: "join".to_string(), kind: NodeKind::Gateway { gateway: GatewayKind::Inclusive } },
                Node { id: "end".to_string(), kind: NodeKind::End },
            ],
            transitions: vec![
                Transition { from: "start".to_string(), to: "split".to_string(), condition: None },
                Transition { from: "split".to_string(), to: "task-a".to_string(), condition: Some("always".to_string()) },
                Transition { from: "split".to_string(), to: "task-b".to_string(), condition: Some("never".to_string()) },
                Transition { from: "task-a".to_string(), to: "join".to_string(), condition: None },
                Transition { from: "task-b".to_string(), to: "join".to_string(), condition: None },
                Transition { from: "join".to_string(), to: "end".to_string(), condition: None },
            ],
        }
    }

    #[test]
    fn inclusive_gateway_joins_after_only_the_activated_branch_completes() {
        let graph = inclusive_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "inclusive_fork_join", 1, json!({}));
        instance.append(WorkflowEvent::VariableSet { key: "always".to_string(), value: json!(true) });
        instance.append(WorkflowEvent::VariableSet { key: "never".to_string(), value: json!(false) });
        let interpreter = GraphInterpreter::new();

        // The split only activates task-a; task-b's guard never passes.
        let actions = interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], WorkflowAction::ScheduleTask { node_id, .. } if node_id == "task-a"));
        assert_eq!(instance.frontier, vec!["task-a".to_string()]);

        // Completing the one activated branch must complete the join
        // immediately rather than waiting forever on task-b's dead edge.
        let actions = interpreter
            .on_task_completed(&graph, &mut instance, "task-a", Uuid::now_v7(), json!({}), &HashMap::new())
            .unwrap();
        assert!(matches!(&actions[0], WorkflowAction::CompleteInstance { .. }));
        assert!(instance.is_terminal());
    }

    #[test]
    fn parallel_gateway_waits_for_both_tasks_before_joining() {
        let graph = parallel_graph();
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "fork_join", 1, json!({}));
        let interpreter = GraphInterpreter::new();
        let actions = interpreter.start(&graph, &mut instance, &HashMap::new()).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(instance.frontier.len(), 2);

        let actions = interpreter
            .on_task_completed(&graph, &mut instance, "task-a", Uuid::now_v7(), json!({}), &HashMap::new())
            .unwrap();
        assert!(actions.is_empty(), "join should not fire until both branches arrive");

        let actions = interpreter
            .on_task_completed(&graph, &mut instance, "task-b", Uuid::now_v7(), json!({}), &HashMap::new())
            .unwrap();
        assert!(matches!(&actions[0], WorkflowAction::CompleteInstance { .. }));
    }
}
