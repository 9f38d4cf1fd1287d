//! Workflow timer registry (§4.6): fires timer nodes and boundary timers for
//! the graph interpreter, built atop the same `DelayQueue` used for envelope
//! scheduling.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::delay_queue::DelayQueue;

/// A pending timer belonging to one workflow instance node.
#[derive(Debug, Clone)]
pub struct TimerFiring {
    pub instance_id: Uuid,
    pub node_id: String,
    pub interrupting: bool,
}

/// Holds all pending workflow timers and hands back the ones due at a given
/// instant. One registry is shared across all workflow instances; the
/// interpreter looks up firings by instance id after draining.
#[derive(Default)]
pub struct TimerRegistry {
    queue: DelayQueue<TimerFiring>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
        }
    }

    pub fn schedule(&self, fire_at: DateTime<Utc>, instance_id: Uuid, node_id: String, interrupting: bool) {
        self.queue.push(
            fire_at,
            TimerFiring {
                instance_id,
                node_id,
                interrupting,
            },
        );
    }

    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<TimerFiring> {
        self.queue.drain_due(now)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn drains_due_timers_for_their_instance() {
        let registry = TimerRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        registry.schedule(now - Duration::seconds(1), id, "wait-node".into(), true);
        registry.schedule(now + Duration::seconds(60), id, "later-node".into(), false);

        let due = registry.drain_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].node_id, "wait-node");
        assert_eq!(registry.pending_count(), 1);
    }
}
