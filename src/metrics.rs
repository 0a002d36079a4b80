//! Latency histograms and event counters for the translation path.
//! Histograms keep the last 1024 samples per name and report p50/p95/p99.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Records elapsed time into a histogram when finished.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record and return elapsed milliseconds.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.registry.record(self.name, elapsed_ms);
        elapsed_ms
    }
}

/// Fixed-capacity ring of samples.
struct SampleRing {
    samples: Vec<f64>,
    next: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

#[derive(Default)]
struct Inner {
    histograms: HashMap<&'static str, SampleRing>,
    counters: HashMap<&'static str, u64>,
}

pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    ring_capacity: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ring_capacity: 1024,
        }
    }

    /// Record a latency sample in milliseconds.
    pub fn record(&self, name: &'static str, value_ms: f64) {
        let capacity = self.ring_capacity;
        self.inner
            .lock()
            .histograms
            .entry(name)
            .or_insert_with(|| SampleRing::new(capacity))
            .push(value_ms);
        tracing::trace!(metric = name, value_ms, "metric_recorded");
    }

    pub fn increment(&self, name: &'static str) {
        *self.inner.lock().counters.entry(name).or_insert(0) += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.inner
            .lock()
            .histograms
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        let histograms = inner
            .histograms
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    HistogramSummary {
                        p50_ms: ring.percentile(50.0),
                        p95_ms: ring.percentile(95.0),
                        p99_ms: ring.percentile(99.0),
                        count: ring.samples.len(),
                    },
                )
            })
            .collect();
        let counters = inner
            .counters
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect();
        MetricsSummary { histograms, counters }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub histograms: HashMap<String, HistogramSummary>,
    pub counters: HashMap<String, u64>,
}

pub mod metric_names {
    pub const CACHE_LOOKUP: &str = "t_cache_lookup";
    pub const REMOTE_CALL: &str = "t_remote_call";
    pub const TRANSLATE_DONE: &str = "t_translate_done";
    pub const BATCH_DONE: &str = "t_batch_done";

    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_MISS: &str = "cache_miss";
    pub const REMOTE_CALLS: &str = "remote_calls";
    pub const RETRIES: &str = "retries";
    pub const RATE_LIMIT_WAITS: &str = "rate_limit_waits";
    pub const RATE_LIMIT_DENIED: &str = "rate_limit_denied";
    pub const TRANSLATE_FAILED: &str = "translate_failed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_samples() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::REMOTE_CALL, v as f64);
        }
        assert_eq!(registry.percentile(metric_names::REMOTE_CALL, 50.0), 51.0);
        assert_eq!(registry.percentile(metric_names::REMOTE_CALL, 99.0), 99.0);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut ring = SampleRing::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            ring.push(v);
        }
        assert_eq!(ring.samples.len(), 3);
        assert_eq!(ring.percentile(100.0), 3.0);
    }

    #[test]
    fn counters_and_summary() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.increment(metric_names::CACHE_HIT);
        registry.increment(metric_names::CACHE_HIT);
        registry.span(metric_names::TRANSLATE_DONE).finish();

        assert_eq!(registry.counter(metric_names::CACHE_HIT), 2);
        assert_eq!(registry.counter(metric_names::CACHE_MISS), 0);

        let summary = registry.summary();
        assert_eq!(summary.counters["cache_hit"], 2);
        assert_eq!(summary.histograms["t_translate_done"].count, 1);
    }
}
