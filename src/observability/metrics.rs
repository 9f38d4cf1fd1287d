//! Counters, gauges, and fixed-bucket histograms (§4.7).
//!
//! Grounded in `worker::backpressure::BackpressureState`'s lock-free atomics
//! idiom: every metric is an `AtomicU64`/`AtomicI64` behind a name+labels
//! key, not a mutex-guarded accumulator. No external metrics crate is
//! pulled in — nothing in the corpus uses one for in-process counters, and
//! this surface is pull-only (§4.7), matching spec.md's "consumers pull"
//! requirement rather than pushing to a collector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

/// A label set attached to one metric observation. Kept as a sorted `Vec`
/// rather than a `HashMap` so two label sets with the same pairs compare
/// equal regardless of insertion order.
pub type Labels = Vec<(String, String)>;

fn normalize(mut labels: Labels) -> Labels {
    labels.sort();
    labels
}

#[derive(Default)]
struct Counter(AtomicU64);

#[derive(Default)]
struct Gauge(AtomicI64);

/// Fixed-bucket histogram: counts per upper-bound bucket plus a running sum,
/// matching the "histograms as fixed-bucket counters" grounding note.
struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_millis: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(bounds: Vec<f64>) -> Self {
        let buckets = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self { bounds, buckets, sum_millis: AtomicU64::new(0), count: AtomicU64::new(0) }
    }

    fn observe(&self, value_millis: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if value_millis <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_millis.fetch_add(value_millis as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            sum_millis: self.sum_millis.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum_millis: u64,
    pub count: u64,
}

/// A single point-in-time read of one metric, returned by `get_metric`.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Histogram(HistogramSnapshot),
}

/// Default latency buckets (milliseconds) used for every histogram this
/// registry creates on first observation.
const DEFAULT_BUCKETS_MS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0];

/// Process-local metrics registry. Labels `queue`/`worker`/`task-def`/
/// `workflow`/`state`/`reason` per §4.7; callers pass whichever subset
/// applies to the metric being recorded.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<(String, Labels), Counter>>,
    gauges: RwLock<HashMap<(String, Labels), Gauge>>,
    histograms: RwLock<HashMap<(String, Labels), Histogram>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_counter(&self, name: &str, labels: Labels) {
        self.add_counter(name, labels, 1);
    }

    pub fn add_counter(&self, name: &str, labels: Labels, delta: u64) {
        let key = (name.to_string(), normalize(labels));
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.0.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        counters.entry(key).or_default().0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, labels: Labels, value: i64) {
        let key = (name.to_string(), normalize(labels));
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.0.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        gauges.entry(key).or_default().0.store(value, Ordering::Relaxed);
    }

    pub fn observe_histogram(&self, name: &str, labels: Labels, value_millis: f64) {
        let key = (name.to_string(), normalize(labels));
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value_millis);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        histograms
            .entry(key)
            .or_insert_with(|| Histogram::new(DEFAULT_BUCKETS_MS.to_vec()))
            .observe(value_millis);
    }

    /// Read the current value of one metric under an exact label set, or
    /// `None` if nothing has recorded under that name+labels yet.
    pub fn get_metric(&self, name: &str, labels: Labels) -> Option<MetricValue> {
        let key = (name.to_string(), normalize(labels));
        if let Some(c) = self.counters.read().get(&key) {
            return Some(MetricValue::Counter(c.0.load(Ordering::Relaxed)));
        }
        if let Some(g) = self.gauges.read().get(&key) {
            return Some(MetricValue::Gauge(g.0.load(Ordering::Relaxed)));
        }
        if let Some(h) = self.histograms.read().get(&key) {
            return Some(MetricValue::Histogram(h.snapshot()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn counter_accumulates_across_calls() {
        let registry = MetricsRegistry::new();
        registry.incr_counter("envelopes_acked", labels(&[("queue", "emails")]));
        registry.incr_counter("envelopes_acked", labels(&[("queue", "emails")]));
        match registry.get_metric("envelopes_acked", labels(&[("queue", "emails")])).unwrap() {
            MetricValue::Counter(n) => assert_eq!(n, 2),
            _ => panic!("expected counter"),
        }
    }

    #[test]
    fn label_order_does_not_create_separate_series() {
        let registry = MetricsRegistry::new();
        registry.incr_counter("x", labels(&[("a", "1"), ("b", "2")]));
        registry.incr_counter("x", labels(&[("b", "2"), ("a", "1")]));
        match registry.get_metric("x", labels(&[("a", "1"), ("b", "2")])).unwrap() {
            MetricValue::Counter(n) => assert_eq!(n, 2),
            _ => panic!("expected counter"),
        }
    }

    #[test]
    fn gauge_overwrites_rather_than_accumulates() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("queue_depth", labels(&[("queue", "emails")]), 5);
        registry.set_gauge("queue_depth", labels(&[("queue", "emails")]), 3);
        match registry.get_metric("queue_depth", labels(&[("queue", "emails")])).unwrap() {
            MetricValue::Gauge(n) => assert_eq!(n, 3),
            _ => panic!("expected gauge"),
        }
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.observe_histogram("task_duration", labels(&[]), 3.0);
        registry.observe_histogram("task_duration", labels(&[]), 40.0);
        match registry.get_metric("task_duration", labels(&[])).unwrap() {
            MetricValue::Histogram(snap) => {
                assert_eq!(snap.count, 2);
                assert_eq!(snap.counts[0], 0); // <= 1ms bucket
                assert_eq!(snap.counts[2], 1); // <= 10ms bucket catches the 3.0 sample
                assert_eq!(snap.counts[4], 2); // <= 100ms bucket catches both
            }
            _ => panic!("expected histogram"),
        }
    }

    #[test]
    fn unknown_metric_reads_as_none() {
        let registry = MetricsRegistry::new();
        assert!(registry.get_metric("missing", labels(&[])).is_none());
    }
}
