//! The Envelope data model (§3) shared by every subsystem.
//!
//! An envelope is the one unit of work the Router, Scheduler, Worker Pool
//! Manager, and Execution Runtime all move around; message, task, job, and
//! workflow-step dispatch are all envelopes carrying different `kind`s.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::RetryPolicy;

/// A dynamically typed attribute value carried in headers/attributes maps.
///
/// Kept as a small closed enum (rather than `serde_json::Value`) per the
/// Design Notes' "typed outcomes over stringly-typed exceptions" guidance —
/// headers-exchange matching and guard evaluation both need to compare
/// values without re-parsing JSON on every lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Attribute/header map convenience alias.
pub type Attributes = HashMap<String, AttributeValue>;

/// Acknowledgement discipline a consumer declares for an envelope (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Consumer acks explicitly; unacked envelopes are redelivered on lease expiry.
    Manual,
    /// The runtime acks as soon as the envelope is delivered to a worker.
    AutoOnDeliver,
    /// The runtime acks only once the handler returns successfully.
    AutoOnSuccess,
    /// Fire-and-forget: no ack is ever required, and the lease is released
    /// immediately on delivery with no redelivery on worker loss.
    None,
}

impl Default for AckMode {
    fn default() -> Self {
        Self::AutoOnSuccess
    }
}

/// Lifecycle state of an envelope (§4.5 state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    /// Accepted, not yet eligible for delivery (e.g. scheduled in the future).
    Pending,
    /// Eligible for delivery, waiting for a worker.
    Ready,
    /// Leased to a worker, executing.
    Running,
    /// Terminal: handler acknowledged success.
    Success,
    /// Non-terminal: handler failed, will be retried.
    Retrying,
    /// Terminal: handler failed and no retries remain.
    Failed,
    /// Terminal: moved to a dead-letter queue.
    DeadLettered,
}

impl EnvelopeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::DeadLettered)
    }
}

/// What kind of work unit an envelope carries (§3); message/task/job-run and
/// workflow-step dispatch all share this one shape, distinguished by `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Message,
    Task,
    JobRun,
    WorkflowStep,
}

impl Default for EnvelopeKind {
    fn default() -> Self {
        Self::Message
    }
}

/// Requested resources for placement (§3); `slots` defaults to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceAsk {
    pub cpu_shares: u32,
    pub memory_bytes: u64,
    pub slots: u32,
}

impl Default for ResourceAsk {
    fn default() -> Self {
        Self {
            cpu_shares: 0,
            memory_bytes: 0,
            slots: 1,
        }
    }
}

/// Taxonomy of reasons an envelope was dead-lettered (§3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeadLetterReason {
    MaxAttempts,
    MaxLength,
    Expired,
    Rejected,
    WorkerLost,
}

/// The envelope: the unit of dispatch moved through every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Message/task/job-run/workflow-step; see `EnvelopeKind`.
    pub kind: EnvelopeKind,
    /// Name of the originating exchange/queue/task-def/job-def, used by the
    /// Router to resolve a destination.
    pub routing_key: String,
    /// Groups related units: all spans of one trace, all steps of one
    /// workflow instance. Defaults to `id` when not otherwise set.
    pub correlation: Uuid,
    /// The envelope that produced this one, for chains and child spans.
    pub parent: Option<Uuid>,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub headers: Attributes,
    pub attributes: Attributes,
    pub priority: i32,
    pub ack_mode: AckMode,
    /// `requeue_on_nack == false` sends a negatively-acknowledged envelope
    /// straight to the dead-letter target instead of back onto its queue.
    pub requeue_on_nack: bool,
    pub retry_policy: RetryPolicy,
    /// Labels a worker must expose to be eligible to receive this envelope.
    pub required_capabilities: Vec<String>,
    pub resource_ask: ResourceAsk,
    pub created_at: DateTime<Utc>,
    /// Not eligible for delivery before this time (delay queue / cron).
    pub not_before: Option<DateTime<Utc>>,
    /// Hard deadline after which the envelope expires undelivered.
    pub expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub state: EnvelopeState,
    /// Populated once `state` is `DeadLettered`.
    pub dead_letter_reason: Option<DeadLetterReason>,
    /// Set when this envelope is itself a re-submission into a DLQ target.
    pub original_id: Option<Uuid>,
    /// Sequence assigned by the owning queue at enqueue time; used to keep
    /// FIFO order within a priority level (Open Question #1 in SPEC_FULL.md).
    pub sequence: u64,
}

impl Envelope {
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>, sequence: u64) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            kind: EnvelopeKind::default(),
            routing_key: routing_key.into(),
            correlation: id,
            parent: None,
            payload,
            content_type: "application/octet-stream".to_string(),
            headers: HashMap::new(),
            attributes: HashMap::new(),
            priority: 0,
            ack_mode: AckMode::default(),
            requeue_on_nack: true,
            retry_policy: RetryPolicy::default(),
            required_capabilities: Vec::new(),
            resource_ask: ResourceAsk::default(),
            created_at: Utc::now(),
            not_before: None,
            expires_at: None,
            attempt: 0,
            state: EnvelopeState::Pending,
            dead_letter_reason: None,
            original_id: None,
            sequence,
        }
    }

    pub fn with_kind(mut self, kind: EnvelopeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_headers(mut self, headers: Attributes) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_required_capabilities(mut self, labels: Vec<String>) -> Self {
        self.required_capabilities = labels;
        self
    }

    pub fn with_correlation(mut self, correlation: Uuid) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map(|at| now >= at).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_is_pending() {
        let env = Envelope::new("orders.created", vec![1, 2, 3], 0);
        assert_eq!(env.state, EnvelopeState::Pending);
        assert_eq!(env.attempt, 0);
        assert!(env.is_due(Utc::now()));
    }

    #[test]
    fn ttl_marks_expired_after_elapsed() {
        let env = Envelope::new("x", vec![], 0).with_ttl(Duration::from_millis(0));
        assert!(env.is_expired(Utc::now() + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn defaults_carry_correlation_and_one_slot() {
        let env = Envelope::new("orders.created", vec![], 0);
        assert_eq!(env.correlation, env.id);
        assert!(env.parent.is_none());
        assert!(env.requeue_on_nack);
        assert_eq!(env.resource_ask.slots, 1);
        assert!(env.required_capabilities.is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(EnvelopeState::Success.is_terminal());
        assert!(EnvelopeState::Failed.is_terminal());
        assert!(EnvelopeState::DeadLettered.is_terminal());
        assert!(!EnvelopeState::Running.is_terminal());
    }
}
