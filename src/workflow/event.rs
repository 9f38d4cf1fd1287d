//! Workflow instance history events (§4.6).
//!
//! Adapted from the teacher's append-only persisted-event shape: still an
//! immutable log replayed to reconstruct instance state, but the variant set
//! now matches graph nodes (task/gateway/timer/human-task) in place of the
//! teacher's compile-time `Workflow` trait callbacks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WorkflowSignal;

/// Types of timeouts that can occur on a node awaiting completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    ScheduleToStart,
    StartToClose,
    Heartbeat,
}

/// Events stored in a workflow instance's history. Immutable once written;
/// instance state is reconstructed by replaying all events in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    InstanceStarted {
        graph_name: String,
        graph_version: u32,
        input: serde_json::Value,
    },

    NodeEntered {
        node_id: String,
    },

    TaskScheduled {
        node_id: String,
        envelope_id: Uuid,
        task_name: String,
    },

    TaskCompleted {
        node_id: String,
        envelope_id: Uuid,
        result: serde_json::Value,
    },

    TaskFailed {
        node_id: String,
        envelope_id: Uuid,
        error: String,
    },

    TaskTimedOut {
        node_id: String,
        envelope_id: Uuid,
        timeout_type: TimeoutType,
    },

    TimerStarted {
        node_id: String,
        fire_at: chrono::DateTime<chrono::Utc>,
        interrupting: bool,
    },

    TimerFired {
        node_id: String,
    },

    GatewayEvaluated {
        node_id: String,
        chosen_transitions: Vec<String>,
    },

    SignalReceived {
        signal: WorkflowSignal,
    },

    VariableSet {
        key: String,
        value: serde_json::Value,
    },

    InstanceCompleted {
        result: serde_json::Value,
    },

    InstanceFailed {
        error: String,
    },

    InstanceCancelled {
        reason: String,
    },
}

impl WorkflowEvent {
    /// Node this event pertains to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeEntered { node_id }
            | Self::TaskScheduled { node_id, .. }
            | Self::TaskCompleted { node_id, .. }
            | Self::TaskFailed { node_id, .. }
            | Self::TaskTimedOut { node_id, .. }
            | Self::TimerStarted { node_id, .. }
            | Self::TimerFired { node_id }
            | Self::GatewayEvaluated { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// `true` if this event ends the instance's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InstanceCompleted { .. } | Self::InstanceFailed { .. } | Self::InstanceCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instance_started_round_trips() {
        let event = WorkflowEvent::InstanceStarted {
            graph_name: "onboarding".to_string(),
            graph_version: 1,
            input: json!({"order_id": "123"}),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"instance_started\""));

        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn node_id_extraction() {
        let event = WorkflowEvent::TaskCompleted {
            node_id: "step-1".to_string(),
            envelope_id: Uuid::now_v7(),
            result: json!({"status": "ok"}),
        };
        assert_eq!(event.node_id(), Some("step-1"));

        let start_event = WorkflowEvent::InstanceStarted {
            graph_name: "g".to_string(),
            graph_version: 1,
            input: json!({}),
        };
        assert_eq!(start_event.node_id(), None);
    }

    #[test]
    fn terminal_events() {
        assert!(WorkflowEvent::InstanceCompleted { result: json!({}) }.is_terminal());
        assert!(WorkflowEvent::InstanceFailed { error: "boom".to_string() }.is_terminal());
        assert!(WorkflowEvent::InstanceCancelled { reason: "cancelled".to_string() }.is_terminal());
        assert!(!WorkflowEvent::NodeEntered { node_id: "x".to_string() }.is_terminal());
    }
}
