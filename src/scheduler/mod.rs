//! Scheduler (§4.3): cron schedules, the delayed-envelope queue, job
//! dependency gating, per-route rate limiting, and workflow timers.

pub mod cron;
pub mod delay_queue;
pub mod dependency;
pub mod rate_limiter;
pub mod timer;

use thiserror::Error;

use crate::error::Reason;

pub use cron::{CronError, CronSchedule};
pub use delay_queue::DelayQueue;
pub use dependency::{DependencyGate, RunOutcome};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use timer::{TimerFiring, TimerRegistry};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression: {0}")]
    Cron(#[from] CronError),
    #[error("job definition not found: {0}")]
    JobNotFound(String),
    #[error("job dependencies unmet: {0:?}")]
    DependenciesBlocked(Vec<String>),
    #[error("rate limit exceeded for {0}")]
    RateLimited(String),
}

impl SchedulerError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::Cron(_) => Reason::InvalidDeclaration,
            Self::JobNotFound(_) => Reason::NotFound,
            Self::DependenciesBlocked(_) => Reason::DependencyBlocked,
            Self::RateLimited(_) => Reason::RateLimited,
        }
    }
}
