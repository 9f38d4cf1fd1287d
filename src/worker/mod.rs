//! Worker Pool Manager (§4.4): capability-labeled worker registration,
//! placement strategies, load-aware polling, and backpressure.
//!
//! This module provides:
//! - [`WorkerPool`] - polls one queue with concurrent, backpressured execution
//! - [`Placer`] / [`PlacementStrategy`] - capability-aware worker selection
//! - [`BackpressureConfig`] - Load-aware task acceptance configuration
//! - [`PollerConfig`] - Task polling with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ TaskPoller  │  │  Heartbeat  │  │  Stale Reclaimer    │  │
//! │  │  (polling)  │  │   (5s)      │  │     (30s)           │  │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘  │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │              BackpressureState                       │    │
//! │  │  (high/low watermarks, load tracking)               │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Task Executor (Semaphore-limited)           │    │
//! │  │  [Task 1] [Task 2] [Task 3] ... [Task N]            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dispatch_engine::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let config = WorkerPoolConfig::new("process_order")
//!     .with_worker_id("order-worker-1")
//!     .with_max_concurrency(20);
//!
//! let pool = WorkerPool::new(store, config);
//!
//! pool.register_handler("process_order", |envelope| async move {
//!     Ok(serde_json::json!({"status": "completed"}))
//! });
//!
//! pool.start().await?;
//! pool.shutdown().await?;
//! ```

mod backpressure;
pub mod placement;
mod poller;
mod pool;

pub use backpressure::{BackpressureConfig, BackpressureError, BackpressureState};
pub use placement::{Placer, PlacementStrategy, WorkerCandidate};
pub use poller::{AdaptivePoller, PollerConfig, PollerError, TaskPoller};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
