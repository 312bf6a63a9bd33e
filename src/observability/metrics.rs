//! In-process broker metrics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket histogram. Values are in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    // Scaled by 1000 to keep sub-millisecond precision in an integer.
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            bucket_bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn default_latency() -> Self {
        Self::new(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0])
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .bucket_bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

/// Counters shared by every broker component.
#[derive(Debug)]
pub struct BrokerMetrics {
    pub requests_total: Counter,
    pub requests_failed: Counter,
    pub requests_rejected_context: Counter,
    pub approvals_enqueued: Counter,
    pub approvals_resolved: Counter,
    pub approvals_auto_resolved: Counter,
    pub approvals_cancelled: Counter,
    pub approvals_stale: Counter,
    pub pending_approvals: Gauge,
    pub active_ports: Gauge,
    pub notifications_sent: Counter,
    pub dispatch_latency_ms: Histogram,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new(),
            requests_failed: Counter::new(),
            requests_rejected_context: Counter::new(),
            approvals_enqueued: Counter::new(),
            approvals_resolved: Counter::new(),
            approvals_auto_resolved: Counter::new(),
            approvals_cancelled: Counter::new(),
            approvals_stale: Counter::new(),
            pending_approvals: Gauge::new(),
            active_ports: Gauge::new(),
            notifications_sent: Counter::new(),
            dispatch_latency_ms: Histogram::default_latency(),
        }
    }

    pub fn record_request_end(&self, success: bool, latency_ms: f64) {
        self.dispatch_latency_ms.observe(latency_ms);
        if !success {
            self.requests_failed.inc();
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of [`BrokerMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub context_rejections: u64,
    pub approvals_enqueued: u64,
    pub approvals_resolved: u64,
    pub approvals_auto_resolved: u64,
    pub approvals_cancelled: u64,
    pub stale_resolutions: u64,
    pub pending_approvals: i64,
    pub active_ports: i64,
    pub notifications_sent: u64,
    pub avg_dispatch_latency_ms: f64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &BrokerMetrics) -> Self {
        let count = metrics.dispatch_latency_ms.count();
        let avg = if count > 0 {
            metrics.dispatch_latency_ms.sum_ms() / count as f64
        } else {
            0.0
        };

        Self {
            total_requests: metrics.requests_total.get(),
            failed_requests: metrics.requests_failed.get(),
            context_rejections: metrics.requests_rejected_context.get(),
            approvals_enqueued: metrics.approvals_enqueued.get(),
            approvals_resolved: metrics.approvals_resolved.get(),
            approvals_auto_resolved: metrics.approvals_auto_resolved.get(),
            approvals_cancelled: metrics.approvals_cancelled.get(),
            stale_resolutions: metrics.approvals_stale.get(),
            pending_approvals: metrics.pending_approvals.get(),
            active_ports: metrics.active_ports.get(),
            notifications_sent: metrics.notifications_sent.get(),
            avg_dispatch_latency_ms: avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_gauge_can_go_negative() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), -1);
    }

    #[test]
    fn test_histogram_buckets() {
        let hist = Histogram::new(vec![10.0, 100.0]);
        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);
        assert_eq!(hist.bucket_counts(), vec![1, 1, 1]);
        assert_eq!(hist.count(), 3);
        assert!((hist.sum_ms() - 555.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary() {
        let metrics = BrokerMetrics::new();
        metrics.requests_total.inc();
        metrics.requests_total.inc();
        metrics.record_request_end(true, 2.0);
        metrics.record_request_end(false, 4.0);
        metrics.approvals_stale.inc();

        let summary = metrics.summary();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.stale_resolutions, 1);
        assert!((summary.avg_dispatch_latency_ms - 3.0).abs() < 1e-9);
    }
}
