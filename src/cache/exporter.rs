//! Prometheus Exposition
//!
//! Publishes `ComprehensiveMetrics` on a private registry, so the host
//! decides where (and whether) the text format is served. Monotonic totals
//! are counters advanced by the delta since the last observation; levels are
//! gauges.

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use super::manager::ComprehensiveMetrics;
use crate::error::Result;

/// Default metric namespace
pub const DEFAULT_NAMESPACE: &str = "ipfs_cache";

/// Prometheus exporter for cache metrics
pub struct MetricsExporter {
    registry: Registry,
    hits: IntCounterVec,
    misses: IntCounterVec,
    evictions: IntCounterVec,
    promotions: IntCounter,
    puts: IntCounter,
    deletes: IntCounter,
    mmap_opens: IntCounter,
    size_bytes: IntGaugeVec,
    capacity_bytes: IntGaugeVec,
    entries: IntGaugeVec,
    read_latency: IntGaugeVec,
    write_latency: IntGauge,
    arc_lists: IntGaugeVec,
    arc_target_t1: IntGauge,
    open_mmap_handles: IntGauge,
    tracked_keys: IntGauge,
    replication_health: IntGaugeVec,
    hit_rate: Gauge,
}

/// Advance a counter to `total`; a total below the counter is ignored
fn advance(counter: &IntCounter, total: u64) {
    counter.inc_by(total.saturating_sub(counter.get()));
}

impl MetricsExporter {
    /// Create an exporter with the default namespace
    pub fn new() -> Result<Self> {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Create an exporter whose metric names start with `namespace_`
    pub fn with_namespace(namespace: &str) -> Result<Self> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(namespace);

        let tier_counter = |name: &str, help: &str| -> Result<IntCounterVec> {
            let counter = IntCounterVec::new(opts(name, help), &["tier"])?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let hits = tier_counter("hits_total", "Lookups served by the tier")?;
        let misses = tier_counter("misses_total", "Lookups the tier could not serve")?;
        let evictions = tier_counter("evictions_total", "Values evicted from the tier")?;

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::with_opts(opts(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let promotions = counter("promotions_total", "Disk hits promoted to memory")?;
        let puts = counter("puts_total", "Values stored")?;
        let deletes = counter("deletes_total", "Values deleted")?;
        let mmap_opens = counter("mmap_opens_total", "Memory-mapped handles opened")?;

        let gauge_vec = |name: &str, help: &str, label: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(opts(name, help), &[label])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let size_bytes = gauge_vec("size_bytes", "Bytes held by the tier", "tier")?;
        let capacity_bytes = gauge_vec("capacity_bytes", "Configured tier capacity", "tier")?;
        let entries = gauge_vec("entries", "Values held by the tier", "tier")?;
        let read_latency = gauge_vec(
            "read_latency_microseconds",
            "Moving average of read latency per tier",
            "tier",
        )?;
        let arc_lists = gauge_vec("arc_list_entries", "Entries per ARC list", "list")?;
        let replication_health = gauge_vec(
            "replication_health_entries",
            "Keys per replication health grade",
            "health",
        )?;

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let write_latency = int_gauge("write_latency_microseconds", "Moving average of put latency")?;
        let arc_target_t1 = int_gauge("arc_target_t1_bytes", "ARC adaptive T1 byte target")?;
        let open_mmap_handles = int_gauge("open_mmap_handles", "Memory-mapped handles open")?;
        let tracked_keys = int_gauge("tracked_keys", "Keys with metadata")?;

        let hit_rate = Gauge::with_opts(opts("hit_rate", "Overall hit rate (0-1)"))?;
        registry.register(Box::new(hit_rate.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            promotions,
            puts,
            deletes,
            mmap_opens,
            size_bytes,
            capacity_bytes,
            entries,
            read_latency,
            write_latency,
            arc_lists,
            arc_target_t1,
            open_mmap_handles,
            tracked_keys,
            replication_health,
            hit_rate,
        })
    }

    /// Update every series from a metrics scan
    pub fn observe(&self, metrics: &ComprehensiveMetrics) {
        let summary = &metrics.summary;

        for (tier, hits, misses, evictions, size, capacity, entries, latency) in [
            (
                "memory",
                summary.memory_hits,
                summary.memory_misses,
                summary.memory_evictions,
                metrics.memory.current_size,
                metrics.memory.maxsize,
                summary.memory_entries,
                summary.memory_read_latency_us,
            ),
            (
                "disk",
                summary.disk_hits,
                summary.disk_misses,
                summary.disk_evictions,
                metrics.disk.current_size,
                metrics.disk.size_limit,
                summary.disk_entries,
                summary.disk_read_latency_us,
            ),
        ] {
            advance(&self.hits.with_label_values(&[tier]), hits);
            advance(&self.misses.with_label_values(&[tier]), misses);
            advance(&self.evictions.with_label_values(&[tier]), evictions);
            self.size_bytes.with_label_values(&[tier]).set(size as i64);
            self.capacity_bytes
                .with_label_values(&[tier])
                .set(capacity as i64);
            self.entries.with_label_values(&[tier]).set(entries as i64);
            self.read_latency
                .with_label_values(&[tier])
                .set(latency as i64);
        }

        for (list, len) in [
            ("t1", metrics.memory.t1_len),
            ("t2", metrics.memory.t2_len),
            ("b1", metrics.memory.b1_len),
            ("b2", metrics.memory.b2_len),
        ] {
            self.arc_lists.with_label_values(&[list]).set(len as i64);
        }

        let health = &metrics.replication_health;
        for (grade, count) in [
            ("poor", health.poor),
            ("fair", health.fair),
            ("good", health.good),
            ("excellent", health.excellent),
        ] {
            self.replication_health
                .with_label_values(&[grade])
                .set(count as i64);
        }

        advance(&self.promotions, summary.promotions);
        advance(&self.puts, summary.puts);
        advance(&self.deletes, summary.deletes);
        advance(&self.mmap_opens, summary.mmap_opens);
        self.write_latency.set(summary.write_latency_us as i64);
        self.arc_target_t1.set(metrics.memory.target_t1 as i64);
        self.open_mmap_handles
            .set(metrics.open_mmap_handles as i64);
        self.tracked_keys.set(metrics.entries as i64);
        self.hit_rate.set(summary.hit_rate);
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Underlying registry, for hosts that merge registries
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
