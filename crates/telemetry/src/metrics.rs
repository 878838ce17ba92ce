//! Internal metrics collection for broker, outbox, dedupe, and ordered
//! processing activity. Collected in-memory; exposed via `snapshot()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the event streaming core.
#[derive(Debug, Default)]
pub struct Metrics {
    // Broker publish/consume
    pub broker_publish_count: Counter,
    pub broker_publish_errors: Counter,
    pub broker_consume_count: Counter,
    pub broker_consume_errors: Counter,

    // Outbox
    pub outbox_pending: Gauge,
    pub outbox_failed: Gauge,
    pub outbox_dispatched: Counter,
    pub outbox_dispatch_errors: Counter,
    pub outbox_expired: Counter,

    // Dedupe / exactly-once
    pub dedupe_processed: Counter,
    pub dedupe_skipped: Counter,
    pub dedupe_poison: Counter,
    pub dedupe_store_errors: Counter,

    // Ordered processor
    pub ordered_queue_depth: Gauge,
    pub ordered_handler_errors: Counter,

    // Latency histograms
    pub broker_publish_latency_ms: Histogram,
    pub broker_consume_latency_ms: Histogram,
    pub outbox_dispatch_latency_ms: Histogram,

    // Gauges
    pub active_subscriptions: Gauge,
    pub consumer_lag: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub broker_publish_count: u64,
    pub broker_publish_errors: u64,
    pub broker_consume_count: u64,
    pub broker_consume_errors: u64,
    pub outbox_pending: u64,
    pub outbox_failed: u64,
    pub outbox_dispatched: u64,
    pub outbox_dispatch_errors: u64,
    pub dedupe_processed: u64,
    pub dedupe_skipped: u64,
    pub dedupe_poison: u64,
    pub ordered_queue_depth: u64,
    pub broker_publish_latency_mean_ms: f64,
    pub broker_consume_latency_mean_ms: f64,
    pub active_subscriptions: u64,
    pub consumer_lag: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            broker_publish_count: self.broker_publish_count.get(),
            broker_publish_errors: self.broker_publish_errors.get(),
            broker_consume_count: self.broker_consume_count.get(),
            broker_consume_errors: self.broker_consume_errors.get(),
            outbox_pending: self.outbox_pending.get(),
            outbox_failed: self.outbox_failed.get(),
            outbox_dispatched: self.outbox_dispatched.get(),
            outbox_dispatch_errors: self.outbox_dispatch_errors.get(),
            dedupe_processed: self.dedupe_processed.get(),
            dedupe_skipped: self.dedupe_skipped.get(),
            dedupe_poison: self.dedupe_poison.get(),
            ordered_queue_depth: self.ordered_queue_depth.get(),
            broker_publish_latency_mean_ms: self.broker_publish_latency_ms.mean(),
            broker_consume_latency_mean_ms: self.broker_consume_latency_ms.mean(),
            active_subscriptions: self.active_subscriptions.get(),
            consumer_lag: self.consumer_lag.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
