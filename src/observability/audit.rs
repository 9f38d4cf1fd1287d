//! Append-only audit log (§4.7): one [`AuditEvent`] per lifecycle
//! transition that terminates a unit of work (dead-letter, cancellation,
//! workflow failure) or a validation/control decision, per spec.md §7's
//! propagation policy.
//!
//! Grounded in `worker::backpressure::BackpressureState`'s lock-free-reader
//! idiom generalized to a bounded ring buffer: a capacity-bounded
//! `VecDeque` under one `parking_lot::RwLock`, the same single-writer
//! shape the Topology Registry uses for its snapshot, scaled down to a
//! simple FIFO-eviction buffer since audit entries don't need
//! copy-on-write versioning.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Reason;

/// One recorded lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub queue: Option<String>,
    pub worker: Option<String>,
    pub task_def: Option<String>,
    pub workflow: Option<String>,
    pub state: Option<String>,
    pub reason: Option<Reason>,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind: kind.into(),
            queue: None,
            worker: None,
            task_def: None,
            workflow: None,
            state: None,
            reason: None,
            detail: detail.into(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn with_task_def(mut self, task_def: impl Into<String>) -> Self {
        self.task_def = Some(task_def.into());
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Filter applied by `query_audit`; every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub kind: Option<String>,
    pub queue: Option<String>,
    pub worker: Option<String>,
    pub workflow: Option<String>,
    pub reason: Option<Reason>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.as_deref().map(|k| k == event.kind).unwrap_or(true)
            && self.queue.as_deref().map(|q| Some(q) == event.queue.as_deref()).unwrap_or(true)
            && self.worker.as_deref().map(|w| Some(w) == event.worker.as_deref()).unwrap_or(true)
            && self.workflow.as_deref().map(|w| Some(w) == event.workflow.as_deref()).unwrap_or(true)
            && self.reason.map(|r| Some(r) == event.reason).unwrap_or(true)
    }
}

/// Bounded FIFO ring of audit entries; the oldest is dropped once
/// `capacity` is exceeded, mirroring history retention's "never grow an
/// append-only log without bound" discipline.
pub struct AuditLog {
    capacity: usize,
    entries: RwLock<VecDeque<AuditEvent>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: RwLock::new(VecDeque::new()) }
    }

    pub fn record(&self, event: AuditEvent) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Most recent entries matching `filter`, newest first, capped at `limit`.
    pub fn query(&self, filter: &AuditFilter, limit: usize) -> Vec<AuditEvent> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
