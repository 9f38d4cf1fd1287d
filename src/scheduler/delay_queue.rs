//! Delay queue: a min-heap of due-time entries, drained by a background
//! poller shaped after the teacher's `worker/poller.rs::TaskPoller` adaptive
//! backoff loop.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct DueEntry<T> {
    due_at: DateTime<Utc>,
    item: T,
}

impl<T> PartialEq for DueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at
    }
}
impl<T> Eq for DueEntry<T> {}

impl<T> PartialOrd for DueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DueEntry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so `BinaryHeap` (a max-heap) pops the earliest due time first.
        other.due_at.cmp(&self.due_at)
    }
}

/// A thread-safe min-heap of `(due_at, item)` pairs.
pub struct DelayQueue<T> {
    heap: Mutex<BinaryHeap<DueEntry<T>>>,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn push(&self, due_at: DateTime<Utc>, item: T) {
        self.heap.lock().push(DueEntry { due_at, item });
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// The due time of the earliest entry, if any.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().peek().map(|e| e.due_at)
    }

    /// Pop every entry whose due time has passed, relative to `now`.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<T> {
        let mut heap = self.heap.lock();
        let mut drained = Vec::new();
        while let Some(top) = heap.peek() {
            if top.due_at > now {
                break;
            }
            drained.push(heap.pop().unwrap().item);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn drains_only_due_entries_in_order() {
        let q: DelayQueue<&str> = DelayQueue::new();
        let now = Utc::now();
        q.push(now + Duration::seconds(10), "late");
        q.push(now - Duration::seconds(5), "early");
        q.push(now - Duration::seconds(1), "mid");

        let due = q.drain_due(now);
        assert_eq!(due, vec!["early", "mid"]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn next_due_at_reflects_earliest() {
        let q: DelayQueue<i32> = DelayQueue::new();
        let now = Utc::now();
        q.push(now + Duration::seconds(5), 1);
        q.push(now + Duration::seconds(1), 2);
        assert_eq!(q.next_due_at(), Some(now + Duration::seconds(1)));
    }
}
