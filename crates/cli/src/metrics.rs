use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Batch counters, shared across documents
#[derive(Default)]
pub struct Metrics {
    documents_processed: AtomicUsize,
    documents_failed: AtomicUsize,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,

    items_extracted: AtomicUsize,
    items_stored: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, duration: Duration, extracted: usize, stored: usize) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.items_extracted.fetch_add(extracted, Ordering::Relaxed);
        self.items_stored.fetch_add(stored, Ordering::Relaxed);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.documents_processed.load(Ordering::Relaxed);
        let failed = self.documents_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            documents_processed: processed,
            documents_failed: failed,
            items_extracted: self.items_extracted.load(Ordering::Relaxed),
            items_stored: self.items_stored.load(Ordering::Relaxed),
            avg_run_time_ms: avg_time_ms(&self.total_run_time_us, processed + failed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub items_extracted: usize,
    pub items_stored: usize,
    pub avg_run_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.documents_processed, 0);
        assert_eq!(snapshot.avg_run_time_ms, 0.0);
    }

    #[test]
    fn test_counts_and_average() {
        let metrics = Metrics::new();
        metrics.record_success(Duration::from_millis(30), 3, 3);
        metrics.record_success(Duration::from_millis(10), 1, 1);
        metrics.record_failure(Duration::from_millis(20));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 2);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.items_extracted, 4);
        assert_eq!(snapshot.items_stored, 4);
        assert!((snapshot.avg_run_time_ms - 20.0).abs() < 1e-9);
    }
}
