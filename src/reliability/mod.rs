//! Reliability patterns: retry backoff and timeout enforcement (§4.5).
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`TimeoutManager`] - Soft/hard timeout checks for running attempts

mod retry;
mod timeout;

pub use retry::RetryPolicy;
pub use timeout::{TaskTimingInfo, TimeoutConfig, TimeoutError, TimeoutManager, TimeoutType};
