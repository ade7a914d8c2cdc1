//! Metrics registry
//!
//! - Counters only, monotonic
//! - Shared across components through `Arc<MetricsRegistry>`
//! - Relaxed atomics; snapshots are not a consistent cut

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operational counters for the access layer
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Engine calls issued under a retry executor
    attempts: AtomicU64,
    /// Backoff delays scheduled
    retries: AtomicU64,
    /// Retry budgets exhausted
    retries_exhausted: AtomicU64,
    /// Reads answered (or attempted) from a replica after primary failure
    replica_fallbacks: AtomicU64,
    /// Writes whose outcome was initially unknown
    ambiguous_writes: AtomicU64,
    /// CAS or durability conflicts inside the increment loop
    cas_conflicts: AtomicU64,
    /// Increments that completed
    increments: AtomicU64,
    /// Keys requested through batch fetches
    batch_keys: AtomicU64,
    /// Keys still failing after the replica pass
    batch_failures: AtomicU64,
    /// Searches served by the degraded path
    degraded_queries: AtomicU64,
    /// Operations resolved as cancelled
    cancellations: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replica_fallbacks(&self) {
        self.replica_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ambiguous_writes(&self) {
        self.ambiguous_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cas_conflicts(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_increments(&self) {
        self.increments.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished batch
    pub fn record_batch(&self, keys: u64, failures: u64) {
        self.batch_keys.fetch_add(keys, Ordering::Relaxed);
        self.batch_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn increment_degraded_queries(&self) {
        self.degraded_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captured_at: Utc::now(),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            replica_fallbacks: self.replica_fallbacks.load(Ordering::Relaxed),
            ambiguous_writes: self.ambiguous_writes.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            increments: self.increments.load(Ordering::Relaxed),
            batch_keys: self.batch_keys.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub attempts: u64,
    pub retries: u64,
    pub retries_exhausted: u64,
    pub replica_fallbacks: u64,
    pub ambiguous_writes: u64,
    pub cas_conflicts: u64,
    pub increments: u64,
    pub batch_keys: u64,
    pub batch_failures: u64,
    pub degraded_queries: u64,
    pub cancellations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.attempts, 0);
        assert_eq!(snapshot.replica_fallbacks, 0);
        assert_eq!(snapshot.batch_failures, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_attempts();
        registry.increment_attempts();
        registry.increment_retries();
        registry.increment_retries_exhausted();
        registry.increment_replica_fallbacks();
        registry.increment_ambiguous_writes();
        registry.increment_cas_conflicts();
        registry.increment_increments();
        registry.record_batch(3, 1);
        registry.increment_degraded_queries();
        registry.increment_cancellations();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.retries_exhausted, 1);
        assert_eq!(snapshot.replica_fallbacks, 1);
        assert_eq!(snapshot.ambiguous_writes, 1);
        assert_eq!(snapshot.cas_conflicts, 1);
        assert_eq!(snapshot.increments, 1);
        assert_eq!(snapshot.batch_keys, 3);
        assert_eq!(snapshot.batch_failures, 1);
        assert_eq!(snapshot.degraded_queries, 1);
        assert_eq!(snapshot.cancellations, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_replica_fallbacks();
        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["replica_fallbacks"], 1);
        assert!(json["captured_at"].is_string());
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_attempts();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().attempts, 800);
    }
}
