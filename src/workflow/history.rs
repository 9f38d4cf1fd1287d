//! Workflow instance history retention (§4.6).
//!
//! Grounded in the teacher's `ExecutorConfig::max_events_per_workflow` cap —
//! same "never let the append-only log grow unboundedly" concern — but
//! generalized from a hard cutoff into a compact-to-summary policy, since
//! the retained history is replayed to rebuild instance state and an older
//! entry can be folded into aggregate counts instead of discarded outright.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::WorkflowEvent;

/// How many history entries (and for how long) an instance retains in full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoryRetention {
    /// Maximum number of full events retained before the oldest are compacted.
    pub max_events: usize,

    /// Maximum age of a full event before it is compacted, regardless of count.
    #[serde(with = "duration_millis")]
    pub max_age: Duration,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self {
            max_events: 1_000,
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl HistoryRetention {
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Counts of compacted history entries, grouped by event discriminant name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistorySummary {
    pub counts: HashMap<String, u64>,
    pub compacted_total: u64,
}

impl HistorySummary {
    fn record(&mut self, event: &WorkflowEvent) {
        *self.counts.entry(event_kind(event).to_string()).or_insert(0) += 1;
        self.compacted_total += 1;
    }
}

/// Compacts `history` in place against `retention`, folding anything past the
/// count/age cutoff into `summary`. `timestamps[i]` is the wall-clock time
/// `history[i]` was appended; both slices must be the same length and in
/// append order.
pub fn compact(
    history: &mut Vec<WorkflowEvent>,
    timestamps: &mut Vec<DateTime<Utc>>,
    summary: &mut HistorySummary,
    retention: &HistoryRetention,
    now: DateTime<Utc>,
) {
    let max_age =
        chrono::Duration::from_std(retention.max_age).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
    let mut cut = 0;
    while cut < history.len() {
        let over_count = history.len() - cut > retention.max_events;
        let over_age = now.signed_duration_since(timestamps[cut]) > max_age;
        if over_count || over_age {
            cut += 1;
        } else {
            break;
        }
    }
    for event in history.drain(0..cut) {
        summary.record(&event);
    }
    timestamps.drain(0..cut);
}

fn event_kind(event: &WorkflowEvent) -> &'static str {
    match event {
        WorkflowEvent::InstanceStarted { .. } => "instance_started",
        WorkflowEvent::NodeEntered { .. } => "node_entered",
        WorkflowEvent::TaskScheduled { .. } => "task_scheduled",
        WorkflowEvent::TaskCompleted { .. } => "task_completed",
        WorkflowEvent::TaskFailed { .. } => "task_failed",
        WorkflowEvent::TaskTimedOut { .. } => "task_timed_out",
        WorkflowEvent::TimerStarted { .. } => "timer_started",
        WorkflowEvent::TimerFired { .. } => "timer_fired",
        WorkflowEvent::GatewayEvaluated { .. } => "gateway_evaluated",
        WorkflowEvent::SignalReceived { .. } => "signal_received",
        WorkflowEvent::VariableSet { .. } => "variable_set",
        WorkflowEvent::InstanceCompleted { .. } => "instance_completed",
        WorkflowEvent::InstanceFailed { .. } => "instance_failed",
        WorkflowEvent::InstanceCancelled { .. } => "instance_cancelled",
    }
}

mod duration_millis {
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
