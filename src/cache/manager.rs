//! Tiered Cache Manager
//!
//! Orchestrates the ARC memory tier and the disk tier, tracks per-key
//! metadata and access statistics, and derives replication views.
//!
//! # Residency
//!
//! ```text
//!   absent ──put──▶ memory+disk ──memory eviction──▶ disk-only
//!     ▲               ▲                                 │
//!     │               └─────────── promotion ◀── get ───┘
//!     └──── delete / clear ────────────────────────────┘
//! ```
//!
//! Every put writes the disk tier; values up to `max_item_size` are also
//! admitted to memory. A memory eviction never touches the disk copy. The
//! only automatic removal is a disk capacity eviction of a key that is no
//! longer resident in memory.
//!
//! # Locking
//!
//! Compound operations hold the manager's state lock, then take the tier
//! locks inside it (always in that order). `get_stats` reads atomics only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::arc::{ArcCache, ArcStats};
use super::disk::{DiskCache, DiskStats};
use super::entry::{AccessStats, CacheKey, CacheTier};
use super::metadata::{
    self, Metadata, MetadataFilter, ADDED_AT_FIELD, REPLICATION_FIELD, SIZE_FIELD,
    STORAGE_TIER_FIELD,
};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::mmap::{MmapHandle, MmapRegistry};
use super::policy::PromotionPolicy;
use super::replication::{marker_for, pending_list, HealthHistogram, ReplicationInfo, PENDING_FIELD};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Per-key bookkeeping
#[derive(Debug, Clone, Default)]
struct KeyRecord {
    metadata: Metadata,
    access: AccessStats,
}

impl KeyRecord {
    fn set_tier(&mut self, tier: CacheTier) {
        self.metadata
            .insert(STORAGE_TIER_FIELD.to_string(), json!(tier.as_str()));
    }
}

#[derive(Default)]
struct ManagerState {
    records: HashMap<CacheKey, KeyRecord>,
}

/// Aggregate view for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveMetrics {
    /// Counters and gauges
    pub summary: MetricsSnapshot,
    /// Memory tier detail
    pub memory: ArcStats,
    /// Disk tier detail
    pub disk: DiskStats,
    /// Memory-mapped handles currently open
    pub open_mmap_handles: usize,
    /// Keys with metadata
    pub entries: usize,
    /// Entries per replication health grade
    pub replication_health: HealthHistogram,
}

/// Tiered cache manager
pub struct TieredCacheManager {
    /// Memory tier
    memory: ArcCache,
    /// Disk tier
    disk: DiskCache,
    /// Open memory-mapped handles
    mmaps: MmapRegistry,
    /// Metadata and access records, also the coordination lock
    state: Mutex<ManagerState>,
    /// Configuration
    config: CacheConfig,
    /// Promotion policy
    promotion: PromotionPolicy,
    /// Metrics collector
    metrics: CacheMetrics,
    /// Set by `close`
    closed: AtomicBool,
}

impl TieredCacheManager {
    /// Open a cache with the given configuration
    ///
    /// The disk index is reloaded from `local_cache_path`; the memory tier
    /// starts empty, so every reloaded entry is labelled `disk`.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let disk = DiskCache::open(config.disk_config())?;
        let mut records = HashMap::new();
        for key in disk.keys() {
            let mut record = KeyRecord {
                metadata: disk.get_metadata(&key).unwrap_or_default(),
                access: AccessStats::default(),
            };
            record.set_tier(CacheTier::Disk);
            records.insert(key, record);
        }

        let manager = Self {
            memory: ArcCache::with_config(config.arc_config()),
            disk,
            mmaps: MmapRegistry::new(),
            state: Mutex::new(ManagerState { records }),
            promotion: config.promotion_policy(),
            config,
            metrics: CacheMetrics::new(),
            closed: AtomicBool::new(false),
        };
        manager.update_stats();

        info!(
            path = %manager.config.local_cache_path.display(),
            memory_capacity = manager.config.memory_cache_size,
            disk_capacity = manager.config.local_cache_size,
            entries = manager.disk.len(),
            "Opened tiered cache"
        );
        Ok(manager)
    }

    /// Store a value
    ///
    /// Always writes the disk tier; values no larger than `max_item_size` are
    /// also placed in memory. Metadata is merged into any existing metadata
    /// for the key. Returns the fastest tier now holding the value.
    pub fn put(&self, key: CacheKey, value: impl Into<Bytes>, fields: Metadata) -> Result<CacheTier> {
        let value = value.into();
        let size = value.len() as u64;
        reject_reserved(&fields)?;

        let tracker = LatencyTracker::start();
        let mut state = self.state.lock();

        let mut record = state.records.get(&key).cloned().unwrap_or_default();
        metadata::merge(&mut record.metadata, fields);
        record
            .metadata
            .entry(ADDED_AT_FIELD.to_string())
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        record.metadata.insert(SIZE_FIELD.to_string(), json!(size));

        let tier = if self.fits_in_memory(size) {
            CacheTier::Memory
        } else {
            CacheTier::Disk
        };
        record.set_tier(tier);

        let replaced = self.disk.contains(&key);
        let disk_evicted = self
            .disk
            .put(key.clone(), &value, record.metadata.clone())?;
        if replaced {
            self.mmaps.revoke_key(&key);
        }
        self.apply_disk_evictions(&mut state, disk_evicted);

        match tier {
            CacheTier::Memory => {
                let evicted = self.memory.insert(key.clone(), value)?;
                self.apply_memory_evictions(&mut state, evicted);
            }
            CacheTier::Disk => {
                self.memory.remove(&key);
            }
        }
        state.records.insert(key.clone(), record);

        self.metrics.record_put();
        self.metrics.record_write_latency(tracker.elapsed());
        self.update_stats();
        debug!(key = %key, size, tier = %tier, "Cached value");
        Ok(tier)
    }

    /// Read a value
    ///
    /// Memory is checked first. A disk hit is promoted into memory when the
    /// value fits and the key has been read at least `min_access_count` times
    /// (this read included). Absent keys give `Ok(None)`; a broken disk entry
    /// gives an I/O error.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let tracker = LatencyTracker::start();
        if let Some(value) = self.memory.get(key) {
            self.metrics.record_memory_hit();
            self.metrics.record_memory_read_latency(tracker.elapsed());
            state
                .records
                .entry(key.clone())
                .or_default()
                .access
                .record(CacheTier::Memory, now);
            return Ok(Some(value));
        }
        self.metrics.record_memory_miss();

        let tracker = LatencyTracker::start();
        let value = match self.disk.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.metrics.record_disk_miss();
                return Ok(None);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk tier read failed");
                self.mmaps.revoke_key(key);
                if !self.disk.contains(key) {
                    state.records.remove(key);
                }
                self.update_stats();
                return Err(e);
            }
        };
        self.metrics.record_disk_hit();
        self.metrics.record_disk_read_latency(tracker.elapsed());

        let size = value.len() as u64;
        let record = state.records.entry(key.clone()).or_default();
        record.access.record(CacheTier::Disk, now);

        if self.fits_in_memory(size)
            && self
                .promotion
                .should_promote(size, record.access.access_count)
        {
            record.set_tier(CacheTier::Memory);
            let evicted = self.memory.insert(key.clone(), value.clone())?;
            self.apply_memory_evictions(&mut state, evicted);
            self.metrics.record_promotion();
            self.update_stats();
            debug!(key = %key, size, "Promoted value to memory");
        }

        Ok(Some(value))
    }

    /// Read a value without recording an access or promoting it
    ///
    /// Used for copies made on the cache's own behalf, such as replication.
    pub fn peek(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let _state = self.state.lock();
        match self.memory.peek(key) {
            Some(value) => Ok(Some(value)),
            None => self.disk.peek(key),
        }
    }

    /// Memory-map the disk copy of a value
    ///
    /// Returns `Ok(None)` when the key has no disk copy. The handle stays
    /// registered until dropped; an overwrite of the key, `delete`, `clear`
    /// and `close` revoke it without waiting on outstanding `bytes()` guards.
    pub fn get_mmap(&self, key: &CacheKey) -> Result<Option<MmapHandle>> {
        if !self.config.enable_memory_mapping {
            return Err(Error::Unsupported(
                "memory mapping is disabled (enable_memory_mapping = false)".into(),
            ));
        }

        let _state = self.state.lock();
        let Some(path) = self.disk.file_path(key) else {
            return Ok(None);
        };
        let handle = self.mmaps.open(key.clone(), &path)?;
        self.metrics.record_mmap_open();
        Ok(Some(handle))
    }

    /// Metadata for a key, with the derived `replication` view injected
    pub fn get_metadata(&self, key: &CacheKey) -> Option<Metadata> {
        let state = self.state.lock();
        let record = state.records.get(key)?;
        Some(self.metadata_view(key, record))
    }

    /// Merge fields into a key's metadata
    ///
    /// Returns `Ok(false)` for an unknown key. The `replication` field is
    /// derived and cannot be written.
    pub fn update_metadata(&self, key: &CacheKey, fields: Metadata) -> Result<bool> {
        reject_reserved(&fields)?;
        let updated = self.edit_metadata(key, |_| fields)?;
        if updated {
            debug!(key = %key, "Updated metadata");
        }
        Ok(updated)
    }

    /// Add `tier` to the key's `pending_replication` list
    pub fn mark_pending(&self, key: &CacheKey, tier: &str) -> Result<bool> {
        self.edit_metadata(key, |current| {
            let mut pending = pending_list(current);
            if !pending.iter().any(|t| t == tier) {
                pending.push(tier.to_string());
                pending.sort();
            }
            metadata_from([(PENDING_FIELD, json!(pending))])
        })
    }

    /// Drop `tier` from the key's `pending_replication` list
    pub fn clear_pending(&self, key: &CacheKey, tier: &str) -> Result<bool> {
        self.edit_metadata(key, |current| {
            metadata_from([(PENDING_FIELD, json!(pending_without(current, tier)))])
        })
    }

    /// Record a finished copy to `tier` at `location`
    ///
    /// Sets the tier's marker field and drops it from the pending list in a
    /// single update.
    pub fn record_replica(&self, key: &CacheKey, tier: &str, location: &str) -> Result<bool> {
        let marker = marker_for(tier).ok_or_else(|| {
            Error::InvalidArgument(format!("tier '{tier}' has no metadata marker"))
        })?;
        self.edit_metadata(key, |current| {
            let (field, value) = marker.record(location);
            let mut fields = metadata_from([(PENDING_FIELD, json!(pending_without(current, tier)))]);
            fields.insert(field, value);
            fields
        })
    }

    /// Forget the copy on `tier` (unpinned, bucket emptied, deal expired)
    pub fn drop_replica(&self, key: &CacheKey, tier: &str) -> Result<bool> {
        let marker = marker_for(tier).ok_or_else(|| {
            Error::InvalidArgument(format!("tier '{tier}' has no metadata marker"))
        })?;
        self.edit_metadata(key, |current| {
            let (field, value) = marker.clear();
            let mut fields = metadata_from([(PENDING_FIELD, json!(pending_without(current, tier)))]);
            fields.insert(field, value);
            fields
        })
    }

    /// Read-modify-write of a key's metadata under the state lock
    ///
    /// `build` sees the current metadata and returns the fields to merge.
    /// The disk index is updated first so a failed write leaves both copies
    /// unchanged.
    fn edit_metadata<F>(&self, key: &CacheKey, build: F) -> Result<bool>
    where
        F: FnOnce(&Metadata) -> Metadata,
    {
        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(key) else {
            return Ok(false);
        };

        let fields = build(&record.metadata);
        if self.disk.contains(key) {
            self.disk.update_metadata(key, fields.clone())?;
        }
        metadata::merge(&mut record.metadata, fields);
        Ok(true)
    }

    /// Keys whose metadata view satisfies every filter, sorted by key
    ///
    /// Filters see the same view as `get_metadata`, so
    /// `replication.health=fair` works.
    pub fn query_metadata(&self, filters: &[MetadataFilter]) -> Vec<(CacheKey, Metadata)> {
        let state = self.state.lock();
        let mut matches: Vec<(CacheKey, Metadata)> = state
            .records
            .iter()
            .map(|(key, record)| (key.clone(), self.metadata_view(key, record)))
            .filter(|(_, view)| metadata::matches_all(view, filters))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches
    }

    /// Replication view for a key
    pub fn replication_info(&self, key: &CacheKey) -> Option<ReplicationInfo> {
        let state = self.state.lock();
        let record = state.records.get(key)?;
        Some(self.derive_replication(key, &record.metadata))
    }

    /// Access statistics for a key
    pub fn access_stats(&self, key: &CacheKey) -> Option<AccessStats> {
        self.state
            .lock()
            .records
            .get(key)
            .map(|record| record.access.clone())
    }

    /// Remove a key from every tier
    pub fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.lock();

        self.mmaps.revoke_key(key);
        let in_memory = self.memory.remove(key).is_some();
        let on_disk = self.disk.remove(key)?;
        let had_record = state.records.remove(key).is_some();

        let deleted = in_memory || on_disk || had_record;
        if deleted {
            self.metrics.record_delete();
            self.update_stats();
            debug!(key = %key, "Deleted value");
        }
        Ok(deleted)
    }

    /// Clear the named tiers
    ///
    /// Clearing memory keeps disk copies and their metadata. Clearing disk
    /// revokes every memory-mapped handle. Keys left in neither tier lose
    /// their metadata.
    pub fn clear(&self, tiers: &[CacheTier]) -> Result<()> {
        let mut state = self.state.lock();

        if tiers.contains(&CacheTier::Memory) {
            self.memory.clear();
            let disk = &self.disk;
            state.records.retain(|key, record| {
                let keep = disk.contains(key);
                if keep {
                    record.set_tier(CacheTier::Disk);
                }
                keep
            });
            info!("Cleared memory tier");
        }

        if tiers.contains(&CacheTier::Disk) {
            let revoked = self.mmaps.revoke_all();
            let result = self.disk.clear();
            let memory = &self.memory;
            state.records.retain(|key, _| memory.contains(key));
            self.update_stats();
            result?;
            info!(revoked, "Cleared disk tier");
        }

        self.update_stats();
        Ok(())
    }

    /// Clear both tiers
    pub fn clear_all(&self) -> Result<()> {
        self.clear(&CacheTier::all())
    }

    /// Check whether either tier holds `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.memory.contains(key) || self.disk.contains(key)
    }

    /// Check whether `tier` holds `key`
    pub fn contains_in(&self, tier: CacheTier, key: &CacheKey) -> bool {
        match tier {
            CacheTier::Memory => self.memory.contains(key),
            CacheTier::Disk => self.disk.contains(key),
        }
    }

    /// Fastest tier holding `key`
    pub fn tier_of(&self, key: &CacheKey) -> Option<CacheTier> {
        CacheTier::all()
            .into_iter()
            .find(|tier| self.contains_in(*tier, key))
    }

    /// Counters and gauges; never takes the state lock
    pub fn get_stats(&self) -> MetricsSnapshot {
        self.update_stats();
        self.metrics.snapshot()
    }

    /// Counters plus per-tier detail and a replication health scan
    pub fn get_comprehensive_metrics(&self) -> ComprehensiveMetrics {
        let state = self.state.lock();
        let mut replication_health = HealthHistogram::default();
        for (key, record) in &state.records {
            replication_health.record(&self.derive_replication(key, &record.metadata));
        }

        ComprehensiveMetrics {
            summary: self.get_stats(),
            memory: self.memory.stats(),
            disk: self.disk.stats(),
            open_mmap_handles: self.mmaps.open_count(),
            entries: state.records.len(),
            replication_health,
        }
    }

    /// Release memory-mapped handles and drop the memory tier
    ///
    /// Disk contents and the index stay in place for the next `open`.
    /// Called automatically on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _state = self.state.lock();
        let revoked = self.mmaps.revoke_all();
        self.memory.clear();
        self.update_stats();
        info!(revoked, "Closed tiered cache");
    }

    /// Number of open memory-mapped handles
    pub fn open_mmap_count(&self) -> usize {
        self.mmaps.open_count()
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get reference to the memory tier
    pub fn memory(&self) -> &ArcCache {
        &self.memory
    }

    /// Get reference to the disk tier
    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    fn fits_in_memory(&self, size: u64) -> bool {
        self.promotion.admits(size) && size <= self.memory.capacity()
    }

    fn derive_replication(&self, key: &CacheKey, metadata: &Metadata) -> ReplicationInfo {
        let live: Vec<CacheTier> = CacheTier::all()
            .into_iter()
            .filter(|tier| self.contains_in(*tier, key))
            .collect();
        self.config.replication_policy.derive(metadata, &live)
    }

    fn metadata_view(&self, key: &CacheKey, record: &KeyRecord) -> Metadata {
        let mut view = record.metadata.clone();
        view.insert(
            REPLICATION_FIELD.to_string(),
            self.derive_replication(key, &record.metadata).to_value(),
        );
        view
    }

    /// Relabel or forget keys the memory tier just evicted
    fn apply_memory_evictions(&self, state: &mut ManagerState, evicted: Vec<CacheKey>) {
        if evicted.is_empty() {
            return;
        }
        self.metrics.record_memory_evictions(evicted.len() as u64);
        for key in evicted {
            if self.disk.contains(&key) {
                if let Some(record) = state.records.get_mut(&key) {
                    record.set_tier(CacheTier::Disk);
                }
            } else {
                state.records.remove(&key);
                debug!(key = %key, "Memory eviction dropped last copy");
            }
        }
    }

    /// Forget keys the disk tier just evicted unless memory still holds them
    fn apply_disk_evictions(&self, state: &mut ManagerState, evicted: Vec<CacheKey>) {
        if evicted.is_empty() {
            return;
        }
        self.metrics.record_disk_evictions(evicted.len() as u64);
        for key in evicted {
            self.mmaps.revoke_key(&key);
            if !self.memory.contains(&key) {
                state.records.remove(&key);
                debug!(key = %key, "Disk eviction dropped last copy");
            }
        }
    }

    fn update_stats(&self) {
        self.metrics
            .update_memory_stats(self.memory.size(), self.memory.len() as u64);
        self.metrics
            .update_disk_stats(self.disk.size(), self.disk.len() as u64);
    }
}

impl Drop for TieredCacheManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn pending_without(metadata: &Metadata, tier: &str) -> Vec<String> {
    pending_list(metadata)
        .into_iter()
        .filter(|t| t != tier)
        .collect()
}

fn reject_reserved(fields: &Metadata) -> Result<()> {
    if fields.contains_key(REPLICATION_FIELD) {
        return Err(Error::InvalidArgument(format!(
            "metadata field '{REPLICATION_FIELD}' is derived and cannot be set"
        )));
    }
    Ok(())
}

/// Build a metadata map from `(field, value)` pairs
pub fn metadata_from<I, K, V>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
