//! Execution Runtime (§4.5): submission/publish entry points and the
//! background sweeps that keep envelopes from lingering past their deadline.
//!
//! The teacher's `WorkflowFactory`/`WorkflowRegistry` type-erasure machinery
//! (registering one Rust type per workflow) has no counterpart here: the
//! Workflow Interpreter (`crate::workflow`) executes declared graphs instead
//! of registered types, so that registry is dropped rather than carried
//! forward as dead weight.

mod executor;

pub use executor::{ExecutionRuntime, ExecutorConfig, ExecutorError};
