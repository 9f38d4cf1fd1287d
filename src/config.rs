//! Aggregate engine configuration.
//!
//! Follows the teacher's builder-struct idiom (`WorkerPoolConfig`,
//! `BackpressureConfig`, `PollerConfig`): every tunable has a sensible
//! default and a `with_x` setter, and sub-configs compose into one
//! top-level struct passed to [`crate::DispatchEngine::new`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;
use crate::scheduler::RateLimitConfig;
use crate::worker::{BackpressureConfig, PlacementStrategy};
use crate::workflow::HistoryRetention;

/// Top-level configuration for a [`crate::DispatchEngine`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default retry policy for envelopes that don't declare their own.
    pub default_retry_policy: RetryPolicy,

    /// Default backpressure watermarks applied to new worker registrations.
    pub default_backpressure: BackpressureConfig,

    /// Default rate limiter parameters for queues that enable rate limiting.
    pub default_rate_limit: RateLimitConfig,

    /// Default placement strategy for queues that don't declare one.
    pub default_placement_strategy: PlacementStrategy,

    /// How long a worker may go without a heartbeat before being marked offline.
    #[serde(with = "duration_millis")]
    pub worker_offline_threshold: Duration,

    /// Tick interval for the background delay-queue poller.
    #[serde(with = "duration_millis")]
    pub scheduler_tick_interval: Duration,

    /// Workflow instance history retention policy.
    pub history_retention: HistoryRetention,

    /// Capacity of the in-process audit log ring buffer.
    pub audit_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry_policy: RetryPolicy::default(),
            default_backpressure: BackpressureConfig::default(),
            default_rate_limit: RateLimitConfig::default(),
            default_placement_strategy: PlacementStrategy::LeastLoaded,
            worker_offline_threshold: Duration::from_secs(30),
            scheduler_tick_interval: Duration::from_millis(100),
            history_retention: HistoryRetention::default(),
            audit_log_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    pub fn with_default_placement_strategy(mut self, strategy: PlacementStrategy) -> Self {
        self.default_placement_strategy = strategy;
        self
    }

    pub fn with_worker_offline_threshold(mut self, threshold: Duration) -> Self {
        self.worker_offline_threshold = threshold;
        self
    }

    pub fn with_audit_log_capacity(mut self, capacity: usize) -> Self {
        self.audit_log_capacity = capacity;
        self
    }
}

pub(crate) mod duration_millis {
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
