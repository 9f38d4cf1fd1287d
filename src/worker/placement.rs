//! Worker placement strategies (§4.4): chooses which registered worker a
//! claimed task is handed to, among workers whose capability labels are a
//! superset of the task's required labels.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A worker's observed state at placement time.
#[derive(Debug, Clone)]
pub struct WorkerCandidate {
    pub worker_id: String,
    pub capability_labels: Vec<String>,
    pub in_flight: usize,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    LeastLoaded,
    RoundRobin,
    Random,
    Weighted,
}

impl Default for PlacementStrategy {
    fn default() -> Self {
        Self::LeastLoaded
    }
}

/// Stateful placement chooser; `RoundRobin` needs a counter across calls.
pub struct Placer {
    strategy: PlacementStrategy,
    round_robin_cursor: AtomicUsize,
}

impl Placer {
    pub fn new(strategy: PlacementStrategy) -> Self {
        Self {
            strategy,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Filters `candidates` down to those whose labels are a superset of
    /// `required`, then selects one per the configured strategy. `None`
    /// means no eligible worker exists.
    pub fn place<'a>(
        &self,
        candidates: &'a [WorkerCandidate],
        required: &[String],
    ) -> Option<&'a WorkerCandidate> {
        let eligible: Vec<&WorkerCandidate> = candidates
            .iter()
            .filter(|c| required.iter().all(|r| c.capability_labels.contains(r)))
            .collect();

        if eligible.is_empty() {
            return None;
        }

        match self.strategy {
            PlacementStrategy::LeastLoaded => eligible
                .into_iter()
                .min_by_key(|c| c.in_flight)
                .map(|c| c as &WorkerCandidate),
            PlacementStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
                Some(eligible[idx])
            }
            PlacementStrategy::Random => {
                let mut rng = rand::thread_rng();
                eligible.choose(&mut rng).copied()
            }
            PlacementStrategy::Weighted => {
                let total_weight: u32 = eligible.iter().map(|c| c.weight.max(1)).sum();
                if total_weight == 0 {
                    return eligible.first().copied();
                }
                let mut pick = rand::random::<u32>() % total_weight;
                for c in &eligible {
                    let w = c.weight.max(1);
                    if pick < w {
                        return Some(c);
                    }
                    pick -= w;
                }
                eligible.last().copied()
            }
        }
    }
}
