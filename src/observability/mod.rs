//! Observability Surface (§4.7): read-only counters/gauges/histograms and
//! an append-only audit log. Pull-only — this module never pushes to an
//! external collector; see [`metrics`] module docs for why no metrics crate
//! is pulled in.

pub mod audit;
pub mod metrics;

pub use audit::{AuditEvent, AuditFilter, AuditLog};
pub use metrics::{HistogramSnapshot, Labels, MetricValue, MetricsRegistry};
