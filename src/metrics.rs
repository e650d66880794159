//! Call- and attempt-scoped metric collection.
//!
//! Collectors only accumulate values; publishing them is left to the caller.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Metrics recorded by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Time spent inside a signer.
    SigningDuration,
    /// Time spent waiting on the transport for one attempt.
    ServiceCallDuration,
    /// Number of retries performed by a call.
    RetryCount,
    /// Time spent waiting for a send token.
    RateLimitWaitDuration,
}

impl Metric {
    /// Stable metric name.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::SigningDuration => "SigningDuration",
            Metric::ServiceCallDuration => "ServiceCallDuration",
            Metric::RetryCount => "RetryCount",
            Metric::RateLimitWaitDuration => "RateLimitWaitDuration",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared handle to a metric collector.
///
/// Clones record into the same collector. [`create_child`](Self::create_child)
/// starts a nested collector, which is how each attempt gets a fresh one.
#[derive(Clone)]
pub struct MetricCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    name: String,
    durations: Mutex<BTreeMap<Metric, Vec<Duration>>>,
    counters: Mutex<BTreeMap<Metric, u64>>,
    children: Mutex<Vec<MetricCollector>>,
}

impl MetricCollector {
    /// Create a root collector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                name: name.into(),
                durations: Mutex::new(BTreeMap::new()),
                counters: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create and register a nested collector.
    pub fn create_child(&self, name: impl Into<String>) -> MetricCollector {
        let child = MetricCollector::new(name);
        self.inner.children.lock().push(child.clone());
        child
    }

    /// Collector name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Record one duration sample.
    pub fn record_duration(&self, metric: Metric, duration: Duration) {
        self.inner
            .durations
            .lock()
            .entry(metric)
            .or_default()
            .push(duration);
    }

    /// Add to a counter.
    pub fn increment(&self, metric: Metric, by: u64) {
        *self.inner.counters.lock().entry(metric).or_insert(0) += by;
    }

    /// All duration samples recorded for `metric`.
    pub fn durations(&self, metric: Metric) -> Vec<Duration> {
        self.inner
            .durations
            .lock()
            .get(&metric)
            .cloned()
            .unwrap_or_default()
    }

    /// Current counter value.
    pub fn count(&self, metric: Metric) -> u64 {
        self.inner.counters.lock().get(&metric).copied().unwrap_or(0)
    }

    /// Returns true if anything at all was recorded for `metric`.
    pub fn has_recorded(&self, metric: Metric) -> bool {
        self.inner.durations.lock().contains_key(&metric)
            || self.inner.counters.lock().contains_key(&metric)
    }

    /// Nested collectors, in creation order.
    pub fn children(&self) -> Vec<MetricCollector> {
        self.inner.children.lock().clone()
    }

    /// Returns true if both handles point at the same collector.
    pub fn ptr_eq(&self, other: &MetricCollector) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricCollector")
            .field("name", &self.inner.name)
            .field("counters", &*self.inner.counters.lock())
            .field("children", &self.inner.children.lock().len())
            .finish_non_exhaustive()
    }
}
