//! Workflow actions and task options (§4.6).
//!
//! Adapted from the teacher's activity-scheduling commands: the interpreter
//! emits one of these in response to a history event, and the runtime
//! executes it (enqueueing an envelope, arming a timer, closing out the
//! instance). `TaskOptions` keeps the teacher's per-activity knobs minus
//! the circuit breaker, which this crate does not carry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Actions a workflow instance can request after processing an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Schedule a task node: enqueue an envelope onto the named queue.
    ScheduleTask {
        /// Graph node this task belongs to.
        node_id: String,

        /// Task/routing-key name (matched against a worker's registered handlers).
        task_name: String,

        /// Queue the envelope should be enqueued onto.
        queue: String,

        /// Input payload for the task (JSON).
        input: serde_json::Value,

        /// Execution options (retries, timeouts, priority).
        options: TaskOptions,
    },

    /// Start a timer node that fires after the specified duration.
    StartTimer {
        /// Graph node this timer belongs to.
        node_id: String,

        /// Duration to wait before firing.
        #[serde(with = "duration_serde")]
        duration: Duration,

        /// Whether this timer interrupts its enclosing scope on firing,
        /// versus running alongside it (non-interrupting boundary timer).
        interrupting: bool,
    },

    /// Evaluate a gateway node's outgoing transitions against current variables.
    EvaluateGateway {
        /// Graph node of the gateway.
        node_id: String,
    },

    /// Complete the workflow instance successfully with a result.
    CompleteInstance {
        /// Result value (JSON).
        result: serde_json::Value,
    },

    /// Fail the workflow instance with an error.
    FailInstance {
        /// Error details.
        error: String,
    },

    /// Cancel the workflow instance.
    CancelInstance {
        /// Human-readable cancellation reason.
        reason: String,
    },

    /// Revoke an in-flight task's envelope (interrupting boundary event).
    CancelTask {
        /// Graph node of the task being cancelled.
        node_id: String,

        /// Envelope id to revoke.
        envelope_id: uuid::Uuid,
    },

    /// No action (event handling did not trigger new work).
    None,
}

impl WorkflowAction {
    /// Create a schedule-task action with default options.
    pub fn schedule_task(
        node_id: impl Into<String>,
        task_name: impl Into<String>,
        queue: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ScheduleTask {
            node_id: node_id.into(),
            task_name: task_name.into(),
            queue: queue.into(),
            input,
            options: TaskOptions::default(),
        }
    }

    /// Create a complete-instance action.
    pub fn complete(result: serde_json::Value) -> Self {
        Self::CompleteInstance { result }
    }

    /// Create a fail-instance action.
    pub fn fail(error: impl Into<String>) -> Self {
        Self::FailInstance { error: error.into() }
    }

    /// Create a (non-interrupting) timer action.
    pub fn timer(node_id: impl Into<String>, duration: Duration) -> Self {
        Self::StartTimer {
            node_id: node_id.into(),
            duration,
            interrupting: false,
        }
    }
}

/// Options for task node execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOptions {
    /// Retry policy for this task.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for the envelope to be claimed by a worker.
    #[serde(with = "duration_serde")]
    pub schedule_to_start_timeout: Duration,

    /// Maximum time for task execution (from start to completion).
    #[serde(with = "duration_serde")]
    pub start_to_close_timeout: Duration,

    /// Heartbeat interval for long-running tasks.
    /// If set, workers must send heartbeats within this interval.
    #[serde(with = "option_duration_serde")]
    pub heartbeat_timeout: Option<Duration>,

    /// Priority (higher values = higher priority, dequeued first).
    pub priority: i32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            schedule_to_start_timeout: Duration::from_secs(60),
            start_to_close_timeout: Duration::from_secs(300),
            heartbeat_timeout: None,
            priority: 0,
        }
    }
}

impl TaskOptions {
    /// Create options with a specific retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the schedule-to-start timeout.
    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = timeout;
        self
    }

    /// Set the start-to-close timeout.
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    /// Enable heartbeating with the specified timeout.
    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Serde support for Duration (as milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration>
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedule_task_action() {
        let action = WorkflowAction::schedule_task("step-1", "send_email", "notifications", json!({"key": "value"}));

        match action {
            WorkflowAction::ScheduleTask {
                node_id,
                task_name,
                queue,
                input,
                ..
            } => {
                assert_eq!(node_id, "step-1");
                assert_eq!(task_name, "send_email");
                assert_eq!(queue, "notifications");
                assert_eq!(input, json!({"key": "value"}));
            }
            _ => panic!("Expected ScheduleTask"),
        }
    }

    #[test]
    fn test_task_options_serialization() {
        let options = TaskOptions::default()
            .with_priority(10)
            .with_heartbeat(Duration::from_secs(30));

        let json = serde_json::to_string(&options).unwrap();
        let parsed: TaskOptions = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.priority, 10);
        assert_eq!(parsed.heartbeat_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_workflow_action_serialization() {
        let action = WorkflowAction::ScheduleTask {
            node_id: "step-1".to_string(),
            task_name: "send_email".to_string(),
            queue: "notifications".to_string(),
            input: json!({}),
            options: TaskOptions::default(),
        };

        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"type\":\"schedule_task\""));

        let parsed: WorkflowAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, parsed);
    }

    #[test]
    fn test_timer_action() {
        let action = WorkflowAction::timer("delay", Duration::from_secs(60));

        match action {
            WorkflowAction::StartTimer {
                node_id,
                duration,
                interrupting,
            } => {
                assert_eq!(node_id, "delay");
                assert_eq!(duration, Duration::from_secs(60));
                assert!(!interrupting);
            }
            _ => panic!("Expected StartTimer"),
        }
    }
}
