//! Batch outcome counters.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Percentage of `count` over `received`, 0.0 when nothing was received.
fn rate(count: u64, received: u64) -> f64 {
    if received > 0 {
        count as f64 / received as f64 * 100.0
    } else {
        0.0
    }
}

/// Counters for one batch run.
///
/// All updates are lock-free, so chunk workers can record outcomes
/// concurrently. [`BatchMetrics::start_batch`] resets everything.
#[derive(Debug)]
pub struct BatchMetrics {
    /// Items submitted
    pub received: AtomicU64,

    /// Items persisted
    pub ingested: AtomicU64,

    /// Items dropped as duplicates within the batch
    pub duplicates: AtomicU64,

    /// Items that failed validation or were rejected by the store
    pub failures: AtomicU64,

    // Batch start, as an offset from `origin` in microseconds
    origin: Instant,
    start_offset_us: AtomicU64,
    started: AtomicBool,
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self {
            received: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            origin: Instant::now(),
            start_offset_us: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }
}

impl BatchMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reset all counters and restart the clock.
    pub fn start_batch(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.ingested.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.start_offset_us
            .store(self.origin.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.started.store(true, Ordering::Relaxed);
    }

    /// Record a received item.
    pub fn increment_received(&self) {
        self.increment_received_by(1);
    }

    /// Record `n` received items.
    pub fn increment_received_by(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a persisted item.
    pub fn increment_ingested(&self) {
        self.increment_ingested_by(1);
    }

    /// Record `n` persisted items.
    pub fn increment_ingested_by(&self, n: u64) {
        self.ingested.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a duplicate.
    pub fn increment_duplicates(&self) {
        self.increment_duplicates_by(1);
    }

    /// Record `n` duplicates.
    pub fn increment_duplicates_by(&self, n: u64) {
        self.duplicates.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a failed item.
    pub fn increment_failures(&self) {
        self.increment_failures_by(1);
    }

    /// Record `n` failed items.
    pub fn increment_failures_by(&self, n: u64) {
        self.failures.fetch_add(n, Ordering::Relaxed);
    }

    /// Time since [`start_batch`](Self::start_batch), zero before the first batch.
    pub fn elapsed(&self) -> Duration {
        if !self.started.load(Ordering::Relaxed) {
            return Duration::ZERO;
        }
        let start = Duration::from_micros(self.start_offset_us.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(start)
    }

    pub fn success_rate(&self) -> f64 {
        rate(
            self.ingested.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
        )
    }

    pub fn failure_rate(&self) -> f64 {
        rate(
            self.failures.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
        )
    }

    pub fn duplicate_rate(&self) -> f64 {
        rate(
            self.duplicates.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
        )
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let received = self.received.load(Ordering::Relaxed);
        let ingested = self.ingested.load(Ordering::Relaxed);
        let duplicates = self.duplicates.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);

        MetricsSnapshot {
            received,
            ingested,
            duplicates,
            failures,
            elapsed: self.elapsed(),
            success_rate: rate(ingested, received),
            failure_rate: rate(failures, received),
            duplicate_rate: rate(duplicates, received),
        }
    }

    /// Alias of [`snapshot`](Self::snapshot).
    pub fn current_summary(&self) -> MetricsSnapshot {
        self.snapshot()
    }

    /// Log the current counters at INFO.
    pub fn log_summary(&self, batch_id: &str) {
        tracing::info!("Batch {} summary: {}", batch_id, self.snapshot());
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub ingested: u64,
    pub duplicates: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    /// Percent of received items persisted
    pub success_rate: f64,
    /// Percent of received items that failed
    pub failure_rate: f64,
    /// Percent of received items dropped as duplicates
    pub duplicate_rate: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Received: {} | Ingested: {} ({:.1}%) | Duplicates: {} ({:.1}%) | \
             Failures: {} ({:.1}%) | Elapsed: {:.3}s",
            self.received,
            self.ingested,
            self.success_rate,
            self.duplicates,
            self.duplicate_rate,
            self.failures,
            self.failure_rate,
            self.elapsed.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_zero_received() {
        let metrics = BatchMetrics::new();
        metrics.start_batch();

        assert_eq!(metrics.success_rate(), 0.0);
        assert_eq!(metrics.failure_rate(), 0.0);
        assert_eq!(metrics.duplicate_rate(), 0.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.failure_rate, 0.0);
        assert_eq!(snapshot.duplicate_rate, 0.0);
    }

    #[test]
    fn test_success_rate() {
        let metrics = BatchMetrics::new();
        metrics.start_batch();
        metrics.increment_received_by(10);
        metrics.increment_ingested_by(7);
        metrics.increment_duplicates();
        metrics.increment_failures_by(2);

        assert_eq!(metrics.success_rate(), 70.0);
        assert_eq!(metrics.duplicate_rate(), 10.0);
        assert_eq!(metrics.failure_rate(), 20.0);

        let snapshot = metrics.current_summary();
        assert_eq!(snapshot.received, 10);
        assert_eq!(snapshot.ingested, 7);
        assert_eq!(snapshot.success_rate, 70.0);
    }

    #[test]
    fn test_start_batch_resets() {
        let metrics = BatchMetrics::new();
        metrics.start_batch();
        metrics.increment_received_by(5);
        metrics.increment_failures();

        metrics.start_batch();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 0);
        assert_eq!(snapshot.failures, 0);
    }

    #[test]
    fn test_elapsed_before_start_is_zero() {
        let metrics = BatchMetrics::new();
        assert_eq!(metrics.elapsed(), Duration::ZERO);

        metrics.start_batch();
        std::thread::sleep(Duration::from_millis(5));
        assert!(metrics.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = BatchMetrics::new();
        metrics.start_batch();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment_received();
                        metrics.increment_ingested();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 8000);
        assert_eq!(snapshot.ingested, 8000);
    }

    #[test]
    fn test_snapshot_serializes_elapsed_as_seconds() {
        let snapshot = MetricsSnapshot {
            received: 4,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["received"], 4);
    }
}
