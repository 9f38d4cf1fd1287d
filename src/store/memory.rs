//! In-memory [`DispatchStore`], grounded in `persistence/memory.rs`'s use of
//! `parking_lot::RwLock<HashMap<..>>` per resource kind and `dashmap` for the
//! hot worker-registry path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::envelope::{DeadLetterReason, Envelope, EnvelopeState};
use crate::scheduler::RunOutcome;
use crate::topology::Ordering;
use crate::workflow::WorkflowInstance;

use super::{DispatchStore, StoreError, WorkerRecord};

#[derive(Default)]
struct QueueState {
    entries: Vec<Envelope>,
    paused: bool,
}

/// An envelope currently out of its queue and leased to a worker, tracked so
/// a worker that stops heartbeating can have its in-flight envelopes
/// reclaimed (§4.5, §8 scenario S4) instead of silently disappearing.
struct Lease {
    queue: String,
    worker_id: String,
    envelope: Envelope,
}

#[derive(Default)]
pub struct InMemoryStore {
    queues: RwLock<HashMap<String, QueueState>>,
    dead_letters: RwLock<HashMap<String, Vec<Envelope>>>,
    workers: DashMap<String, WorkerRecord>,
    job_outcomes: RwLock<HashMap<String, RunOutcome>>,
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    leases: RwLock<HashMap<Uuid, Lease>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pick_index(entries: &[Envelope], ordering: Ordering, now: DateTime<Utc>) -> Option<usize> {
    let due_indices: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_due(now) && !e.is_expired(now))
        .map(|(i, _)| i)
        .collect();

    match ordering {
        Ordering::Fifo => due_indices.into_iter().next(),
        Ordering::Lifo => due_indices.into_iter().next_back(),
        Ordering::Priority => due_indices
            .into_iter()
            .max_by_key(|&i| (entries[i].priority, std::cmp::Reverse(entries[i].sequence))),
    }
}

#[async_trait]
impl DispatchStore for InMemoryStore {
    async fn enqueue(&self, queue: &str, envelope: Envelope, max_length: Option<usize>) -> Result<(), StoreError> {
        let mut queues = self.queues.write();
        let state = queues.entry(queue.to_string()).or_default();
        if let Some(max) = max_length {
            if state.entries.len() >= max {
                return Err(StoreError::QueueFull {
                    queue: queue.to_string(),
                    max_length: max,
                });
            }
        }
        state.entries.push(envelope);
        Ok(())
    }

    async fn dequeue_ready(
        &self,
        queue: &str,
        ordering: Ordering,
        now: DateTime<Utc>,
        worker_id: &str,
    ) -> Result<Option<Envelope>, StoreError> {
        let mut queues = self.queues.write();
        let state = match queues.get_mut(queue) {
            Some(s) => s,
            None => return Ok(None),
        };
        if state.paused {
            return Ok(None);
        }
        match pick_index(&state.entries, ordering, now) {
            Some(idx) => {
                let mut envelope = state.entries.remove(idx);
                envelope.state = EnvelopeState::Running;
                self.leases.write().insert(
                    envelope.id,
                    Lease { queue: queue.to_string(), worker_id: worker_id.to_string(), envelope: envelope.clone() },
                );
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }

    async fn peek_ready(
        &self,
        queue: &str,
        ordering: Ordering,
        now: DateTime<Utc>,
    ) -> Result<Option<Envelope>, StoreError> {
        let queues = self.queues.read();
        let state = match queues.get(queue) {
            Some(s) => s,
            None => return Ok(None),
        };
        if state.paused {
            return Ok(None);
        }
        Ok(pick_index(&state.entries, ordering, now).map(|idx| state.entries[idx].clone()))
    }

    async fn ack(&self, queue: &str, envelope_id: Uuid) -> Result<(), StoreError> {
        self.leases.write().remove(&envelope_id);
        let mut queues = self.queues.write();
        if let Some(state) = queues.get_mut(queue) {
            state.entries.retain(|e| e.id != envelope_id);
        }
        Ok(())
    }

    async fn retry(&self, queue: &str, envelope: Envelope) -> Result<(), StoreError> {
        self.leases.write().remove(&envelope.id);
        let mut queues = self.queues.write();
        let state = queues.entry(queue.to_string()).or_default();
        state.entries.push(envelope);
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, mut envelope: Envelope, reason: DeadLetterReason) -> Result<(), StoreError> {
        self.leases.write().remove(&envelope.id);
        envelope.state = EnvelopeState::DeadLettered;
        envelope.dead_letter_reason = Some(reason);
        let mut dlqs = self.dead_letters.write();
        dlqs.entry(queue.to_string()).or_default().push(envelope);
        Ok(())
    }

    async fn list_dead_letters(&self, queue: &str) -> Result<Vec<Envelope>, StoreError> {
        Ok(self.dead_letters.read().get(queue).cloned().unwrap_or_default())
    }

    async fn reap_expired(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Envelope>, StoreError> {
        let mut queues = self.queues.write();
        let state = match queues.get_mut(queue) {
            Some(s) => s,
            None => return Ok(vec![]),
        };
        let mut expired = Vec::new();
        state.entries.retain(|e| {
            if e.is_expired(now) {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        Ok(expired)
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize, StoreError> {
        Ok(self.queues.read().get(queue).map(|s| s.entries.len()).unwrap_or(0))
    }

    async fn upsert_worker(&self, record: WorkerRecord) -> Result<(), StoreError> {
        self.workers.insert(record.worker_id.clone(), record);
        Ok(())
    }

    async fn heartbeat_worker(&self, worker_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.workers
            .get_mut(worker_id)
            .map(|mut r| r.last_heartbeat = at)
            .ok_or_else(|| StoreError::WorkerNotFound(worker_id.to_string()))
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Ok(self.workers.iter().map(|e| e.value().clone()).collect())
    }

    async fn remove_stale_workers(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let stale: Vec<String> = self
            .workers
            .iter()
            .filter(|e| now - e.value().last_heartbeat > threshold)
            .map(|e| e.key().clone())
            .collect();
        for id in &stale {
            self.workers.remove(id);
        }
        Ok(stale)
    }

    async fn reclaim_leases_for_workers(&self, worker_ids: &[String]) -> Result<Vec<(String, Envelope)>, StoreError> {
        let mut leases = self.leases.write();
        let stale_ids: Vec<Uuid> = leases
            .iter()
            .filter(|(_, lease)| worker_ids.iter().any(|w| w == &lease.worker_id))
            .map(|(id, _)| *id)
            .collect();
        let mut reclaimed = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(lease) = leases.remove(&id) {
                reclaimed.push((lease.queue, lease.envelope));
            }
        }
        Ok(reclaimed)
    }

    async fn take_envelope(&self, envelope_id: Uuid) -> Result<Option<(String, Envelope)>, StoreError> {
        if let Some(lease) = self.leases.write().remove(&envelope_id) {
            return Ok(Some((lease.queue, lease.envelope)));
        }
        let mut queues = self.queues.write();
        for (queue, state) in queues.iter_mut() {
            if let Some(idx) = state.entries.iter().position(|e| e.id == envelope_id) {
                return Ok(Some((queue.clone(), state.entries.remove(idx))));
            }
        }
        Ok(None)
    }

    async fn find_envelope(&self, envelope_id: Uuid) -> Result<Option<Envelope>, StoreError> {
        if let Some(lease) = self.leases.read().get(&envelope_id) {
            return Ok(Some(lease.envelope.clone()));
        }
        if let Some(envelope) = self
            .queues
            .read()
            .values()
            .find_map(|state| state.entries.iter().find(|e| e.id == envelope_id).cloned())
        {
            return Ok(Some(envelope));
        }
        Ok(self
            .dead_letters
            .read()
            .values()
            .find_map(|entries| entries.iter().find(|e| e.id == envelope_id).cloned()))
    }

    async fn pause_queue(&self, queue: &str) -> Result<(), StoreError> {
        self.queues.write().entry(queue.to_string()).or_default().paused = true;
        Ok(())
    }

    async fn resume_queue(&self, queue: &str) -> Result<(), StoreError> {
        self.queues.write().entry(queue.to_string()).or_default().paused = false;
        Ok(())
    }

    async fn record_job_outcome(&self, job_def_name: &str, outcome: RunOutcome) -> Result<(), StoreError> {
        self.job_outcomes.write().insert(job_def_name.to_string(), outcome);
        Ok(())
    }

    async fn latest_job_outcomes(&self) -> Result<HashMap<String, RunOutcome>, StoreError> {
        Ok(self.job_outcomes.read().clone())
    }

    async fn save_instance(&self, instance: WorkflowInstance) -> Result<(), StoreError> {
        self.instances.write().insert(instance.id, instance);
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.instances.read().get(&id).cloned().ok_or(StoreError::InstanceNotFound(id))
    }

    async fn list_instances(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self.instances.read().values().cloned().collect())
    }
}
