//! Cache Metrics Collection
//!
//! Lock-free counters and gauges for the tiered cache. Everything here is a
//! relaxed atomic so reporting never contends with puts and gets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Memory tier
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    memory_evictions: AtomicU64,
    memory_size_bytes: AtomicU64,
    memory_entries: AtomicU64,

    // Disk tier
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    disk_evictions: AtomicU64,
    disk_size_bytes: AtomicU64,
    disk_entries: AtomicU64,

    // Operations
    puts: AtomicU64,
    deletes: AtomicU64,
    promotions: AtomicU64,
    mmap_opens: AtomicU64,

    // Operation latencies (microseconds, using exponential moving average)
    memory_read_latency_us: AtomicU64,
    disk_read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Memory tier
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A value left memory but stayed on disk
    pub fn record_memory_evictions(&self, count: u64) {
        self.memory_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn update_memory_stats(&self, size: u64, entries: u64) {
        self.memory_size_bytes.store(size, Ordering::Relaxed);
        self.memory_entries.store(entries, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    // Disk tier
    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Miss in both tiers
    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_evictions(&self, count: u64) {
        self.disk_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn update_disk_stats(&self, size: u64, entries: u64) {
        self.disk_size_bytes.store(size, Ordering::Relaxed);
        self.disk_entries.store(entries, Ordering::Relaxed);
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn disk_misses(&self) -> u64 {
        self.disk_misses.load(Ordering::Relaxed)
    }

    // Operations
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mmap_open(&self) {
        self.mmap_opens.fetch_add(1, Ordering::Relaxed);
    }

    // Latency tracking
    pub fn record_memory_read_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.memory_read_latency_us, duration);
    }

    pub fn record_disk_read_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.disk_read_latency_us, duration);
    }

    pub fn record_write_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.write_latency_us, duration);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Overall hit rate: hits in either tier over all lookups
    ///
    /// Only final misses (absent from both tiers) count against it, so a
    /// memory miss served by disk is a hit. Always within [0, 1].
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits() + self.disk_hits();
        let total = hits + self.disk_misses();

        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64).clamp(0.0, 1.0)
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            memory_hits: self.memory_hits(),
            memory_misses: self.memory_misses(),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            memory_size_bytes: self.memory_size_bytes.load(Ordering::Relaxed),
            memory_entries: self.memory_entries.load(Ordering::Relaxed),

            disk_hits: self.disk_hits(),
            disk_misses: self.disk_misses(),
            disk_evictions: self.disk_evictions.load(Ordering::Relaxed),
            disk_size_bytes: self.disk_size_bytes.load(Ordering::Relaxed),
            disk_entries: self.disk_entries.load(Ordering::Relaxed),

            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            mmap_opens: self.mmap_opens.load(Ordering::Relaxed),

            memory_read_latency_us: self.memory_read_latency_us.load(Ordering::Relaxed),
            disk_read_latency_us: self.disk_read_latency_us.load(Ordering::Relaxed),
            write_latency_us: self.write_latency_us.load(Ordering::Relaxed),

            hit_rate: self.hit_rate(),
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    // Memory
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
    pub memory_size_bytes: u64,
    pub memory_entries: u64,

    // Disk
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_evictions: u64,
    pub disk_size_bytes: u64,
    pub disk_entries: u64,

    // Operations
    pub puts: u64,
    pub deletes: u64,
    pub promotions: u64,
    pub mmap_opens: u64,

    // Latency EMAs
    pub memory_read_latency_us: u64,
    pub disk_read_latency_us: u64,
    pub write_latency_us: u64,

    pub hit_rate: f64,
}

impl MetricsSnapshot {
    /// Lookups observed (hits in either tier plus final misses)
    pub fn total_accesses(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.disk_misses
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.memory_hits(), 0);
        assert_eq!(metrics.disk_hits(), 0);
        assert_eq!(metrics.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_final_misses_only() {
        let metrics = CacheMetrics::new();

        metrics.record_memory_hit();
        metrics.record_memory_hit();
        metrics.record_memory_miss();
        metrics.record_disk_hit();
        metrics.record_memory_miss();
        metrics.record_disk_miss();

        assert!((metrics.hit_rate() - 0.75).abs() < 1e-9);
        assert_eq!(metrics.snapshot().total_accesses(), 4);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_disk_read_latency(Duration::from_micros(100));
        assert_eq!(metrics.snapshot().disk_read_latency_us, 100);

        // EMA should smooth values
        metrics.record_disk_read_latency(Duration::from_micros(200));
        let latency = metrics.snapshot().disk_read_latency_us;
        assert!(latency > 100 && latency < 200);
        assert_eq!(metrics.snapshot().write_latency_us, 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_put();
        metrics.record_promotion();
        metrics.record_memory_evictions(3);
        metrics.update_memory_stats(1024, 10);
        metrics.update_disk_stats(4096, 12);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.puts, 1);
        assert_eq!(snapshot.promotions, 1);
        assert_eq!(snapshot.memory_evictions, 3);
        assert_eq!(snapshot.memory_size_bytes, 1024);
        assert_eq!(snapshot.disk_entries, 12);
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
