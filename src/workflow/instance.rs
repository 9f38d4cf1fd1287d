//! Workflow instance state (§4.6).
//!
//! Rebuilt from the teacher's executor-owned workflow state, generalized
//! from one-struct-per-workflow-type to a single shape that fits any graph:
//! `variables`, a `frontier` of active node ids, and an append-only
//! `history` that is the source of truth for everything else (the other
//! fields are derived/cached views kept in sync as events are appended).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::WorkflowEvent;
use super::history::{compact, HistoryRetention, HistorySummary};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A workflow instance's full state, derived by folding its history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub graph_name: String,
    pub graph_version: u32,
    pub variables: HashMap<String, serde_json::Value>,

    /// Active node ids (one token per active path through the graph).
    pub frontier: Vec<String>,

    /// Append-only event log. Oldest entries may be compacted into `summary`.
    pub history: Vec<WorkflowEvent>,
    #[serde(skip)]
    history_timestamps: Vec<DateTime<Utc>>,
    pub summary: HistorySummary,

    /// For each gateway node awaiting a join, the set of incoming transition
    /// `from` node ids that have already delivered a token.
    pub join_arrivals: HashMap<String, HashSet<String>>,

    /// Envelope id of each task node currently awaiting completion, so a
    /// sibling interrupting boundary timer can revoke it.
    pub active_envelopes: HashMap<String, Uuid>,

    pub status: InstanceStatus,

    /// Optimistic-concurrency version, bumped on every successful append.
    pub sequence: u64,
}

impl WorkflowInstance {
    pub fn new(id: Uuid, graph_name: impl Into<String>, graph_version: u32, input: serde_json::Value) -> Self {
        let graph_name = graph_name.into();
        let mut instance = Self {
            id,
            graph_name: graph_name.clone(),
            graph_version,
            variables: HashMap::new(),
            frontier: Vec::new(),
            history: Vec::new(),
            history_timestamps: Vec::new(),
            summary: HistorySummary::default(),
            join_arrivals: HashMap::new(),
            active_envelopes: HashMap::new(),
            status: InstanceStatus::Running,
            sequence: 0,
        };
        instance.append(WorkflowEvent::InstanceStarted {
            graph_name,
            graph_version,
            input,
        });
        instance
    }

    /// Append an event, folding its effect into the cached state and bumping
    /// the concurrency sequence. This is the only way instance state changes.
    pub fn append(&mut self, event: WorkflowEvent) {
        self.apply(&event);
        self.history.push(event);
        self.history_timestamps.push(Utc::now());
        self.sequence += 1;
    }

    fn apply(&mut self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::NodeEntered { node_id } => {
                if !self.frontier.contains(node_id) {
                    self.frontier.push(node_id.clone());
                }
            }
            WorkflowEvent::VariableSet { key, value } => {
                self.variables.insert(key.clone(), value.clone());
            }
            WorkflowEvent::GatewayEvaluated { node_id, .. } | WorkflowEvent::TimerFired { node_id } => {
                self.frontier.retain(|n| n != node_id);
            }
            WorkflowEvent::TaskScheduled { node_id, envelope_id, .. } => {
                self.active_envelopes.insert(node_id.clone(), *envelope_id);
            }
            WorkflowEvent::TaskCompleted { node_id, .. }
            | WorkflowEvent::TaskFailed { node_id, .. }
            | WorkflowEvent::TaskTimedOut { node_id, .. } => {
                self.frontier.retain(|n| n != node_id);
                self.active_envelopes.remove(node_id);
            }
            WorkflowEvent::InstanceCompleted { .. } => self.status = InstanceStatus::Completed,
            WorkflowEvent::InstanceFailed { .. } => self.status = InstanceStatus::Failed,
            WorkflowEvent::InstanceCancelled { .. } => self.status = InstanceStatus::Cancelled,
            _ => {}
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != InstanceStatus::Running
    }

    /// Record that a token arrived at `gateway` via the transition from `from`.
    /// Returns `true` once every transition in `required_incoming` has delivered.
    pub fn record_join_arrival(&mut self, gateway: &str, from: &str, required_incoming: &[String]) -> bool {
        let arrived = self.join_arrivals.entry(gateway.to_string()).or_default();
        arrived.insert(from.to_string());
        required_incoming.iter().all(|f| arrived.contains(f))
    }

    pub fn active_envelope(&self, node_id: &str) -> Option<Uuid> {
        self.active_envelopes.get(node_id).copied()
    }

    pub fn clear_join(&mut self, gateway: &str) {
        self.join_arrivals.remove(gateway);
    }

    pub fn compact_history(&mut self, retention: &HistoryRetention, now: DateTime<Utc>) {
        compact(&mut self.history, &mut self.history_timestamps, &mut self.summary, retention, now);
    }
}
