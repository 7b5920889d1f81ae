//! In-process metrics
//!
//! A `MetricsScope` is handed to every plugin at setup. Scopes are cheap to
//! clone and share one registry, so sub-scopes created by different plugins
//! can be reported together.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::trace;

// ─────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────

/// Summary statistics of observed values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// Mean of observed values, `None` before the first observation
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Records a distribution of values (e.g. wait times in seconds)
#[derive(Debug, Clone)]
pub struct Histogram {
    name: Arc<str>,
    summary: Arc<RwLock<Summary>>,
}

impl Histogram {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            summary: Arc::default(),
        }
    }

    /// Record one value
    pub fn observe(&self, value: f64) {
        let mut s = self.summary.write();
        if s.count == 0 {
            s.min = value;
            s.max = value;
        } else {
            s.min = s.min.min(value);
            s.max = s.max.max(value);
        }
        s.count += 1;
        s.sum += value;
        trace!(metric = %self.name, value, "Histogram observation");
    }

    pub fn summary(&self) -> Summary {
        *self.summary.read()
    }
}

/// Monotonic counter
#[derive(Debug, Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: Arc::default(),
        }
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Scope
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Registry {
    histograms: RwLock<BTreeMap<String, Histogram>>,
    counters: RwLock<BTreeMap<String, Counter>>,
}

/// Reported value of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(u64),
    Histogram(Summary),
}

/// Named metrics namespace
#[derive(Debug, Clone)]
pub struct MetricsScope {
    prefix: String,
    registry: Arc<Registry>,
}

impl MetricsScope {
    /// Root scope with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            prefix: name.into(),
            registry: Arc::default(),
        }
    }

    /// Child scope sharing this scope's registry
    pub fn sub_scope(&self, name: &str) -> Self {
        Self {
            prefix: format!("{}:{}", self.prefix, name),
            registry: self.registry.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.prefix
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Get or register a histogram in this scope
    pub fn histogram(&self, name: &str) -> Histogram {
        let key = self.full_name(name);
        if let Some(h) = self.registry.histograms.read().get(&key) {
            return h.clone();
        }
        self.registry
            .histograms
            .write()
            .entry(key.clone())
            .or_insert_with(|| Histogram::new(&key))
            .clone()
    }

    /// Get or register a counter in this scope
    pub fn counter(&self, name: &str) -> Counter {
        let key = self.full_name(name);
        if let Some(c) = self.registry.counters.read().get(&key) {
            return c.clone();
        }
        self.registry
            .counters
            .write()
            .entry(key)
            .or_insert_with(Counter::new)
            .clone()
    }

    /// Current values of every metric in the registry
    pub fn snapshot(&self) -> BTreeMap<String, MetricValue> {
        let mut out = BTreeMap::new();
        for (name, c) in self.registry.counters.read().iter() {
            out.insert(name.clone(), MetricValue::Counter(c.get()));
        }
        for (name, h) in self.registry.histograms.read().iter() {
            out.insert(name.clone(), MetricValue::Histogram(h.summary()));
        }
        out
    }
}

impl Default for MetricsScope {
    fn default() -> Self {
        Self::new("remote_exec")
    }
}

// ─────────────────────────────────────────────────────────────────
// Executor Metrics
// ─────────────────────────────────────────────────────────────────

/// Metrics recorded by the execution state machine
#[derive(Debug, Clone)]
pub struct ExecutorMetrics {
    /// Seconds between the first admission request and each later attempt
    pub resource_wait_time: Histogram,

    /// Admission requests that were denied
    pub admission_denied: Counter,

    /// Backend create calls that failed
    pub creation_failures: Counter,

    /// Tasks that reached a terminal phase through the cache
    pub terminal_observed: Counter,
}

impl ExecutorMetrics {
    pub fn new(scope: &MetricsScope) -> Self {
        Self {
            resource_wait_time: scope.histogram("resource_wait_time"),
            admission_denied: scope.counter("admission_denied"),
            creation_failures: scope.counter("creation_failures"),
            terminal_observed: scope.counter("terminal_observed"),
        }
    }
}
