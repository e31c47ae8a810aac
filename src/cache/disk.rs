//! Disk Cache - Durable Warm Tier
//!
//! One file per value plus a JSON index, both under a single directory.
//!
//! # Layout
//!
//! ```text
//! <cache_dir>/
//!   index.json          key -> {filename, size, metadata, created_at, ...}
//!   <uuid>.bin          value bytes
//!   <uuid>.tmp          in-flight write (never referenced by the index)
//! ```
//!
//! # Write ordering
//!
//! A put writes `<uuid>.tmp`, fsyncs it, renames it to `<uuid>.bin`, and only
//! then commits the index (itself written to a temp file and renamed). A
//! crash can leave an orphaned data file, which `open` deletes, but never an
//! index entry pointing at a missing file.
//!
//! # Eviction
//!
//! Oldest `created_at` first, ties broken by insertion sequence. Overwriting
//! a key gives it a fresh `created_at`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{content_hash, CacheKey};
use super::metadata::{self, Metadata};
use crate::error::{Error, Result};

/// Default disk tier capacity (1GB)
pub const DEFAULT_DISK_CAPACITY: u64 = 1024 * 1024 * 1024;

/// Index file name inside the cache directory
pub const INDEX_FILE: &str = "index.json";

/// Extension of committed value files
const DATA_EXT: &str = "bin";

/// Extension of in-flight writes
const TEMP_EXT: &str = "tmp";

/// Index format version
const INDEX_VERSION: u32 = 1;

/// Bucket used by `stats_by` for entries lacking the dimension
pub const UNKNOWN_DIMENSION: &str = "unknown";

/// Disk cache configuration
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Maximum total value bytes (`size_limit`)
    pub capacity: u64,
    /// Cache directory path
    pub cache_dir: PathBuf,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DISK_CAPACITY,
            cache_dir: std::env::temp_dir().join("ipfs_tiered_cache"),
        }
    }
}

/// Index entry for one cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIndexEntry {
    /// Data file name inside the cache directory
    pub filename: String,
    /// Value size in bytes
    pub size: u64,
    /// Metadata stored with the value
    #[serde(default)]
    pub metadata: Metadata,
    /// When this value was written
    pub created_at: DateTime<Utc>,
    /// Insertion sequence, breaks `created_at` ties
    pub seq: u64,
    /// Hash of the value bytes
    pub content_hash: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    next_seq: u64,
    entries: BTreeMap<CacheKey, DiskIndexEntry>,
}

#[derive(Default)]
struct DiskState {
    entries: HashMap<CacheKey, DiskIndexEntry>,
    /// Eviction order, oldest first
    order: BTreeMap<(DateTime<Utc>, u64), CacheKey>,
    current_size: u64,
    next_seq: u64,
}

impl DiskState {
    fn insert(&mut self, key: CacheKey, entry: DiskIndexEntry) -> Option<DiskIndexEntry> {
        let previous = self.remove(&key);
        self.current_size += entry.size;
        self.order
            .insert((entry.created_at, entry.seq), key.clone());
        self.entries.insert(key, entry);
        previous
    }

    fn remove(&mut self, key: &CacheKey) -> Option<DiskIndexEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&(entry.created_at, entry.seq));
        self.current_size -= entry.size;
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<(CacheKey, DiskIndexEntry)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.current_size -= entry.size;
        Some((key, entry))
    }

    fn snapshot(&self) -> PersistedIndex {
        PersistedIndex {
            version: INDEX_VERSION,
            next_seq: self.next_seq,
            entries: self
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
        }
    }
}

/// Count and bytes for one bucket of a stats breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionStats {
    pub count: u64,
    pub bytes: u64,
}

/// Disk Cache - durable warm tier
pub struct DiskCache {
    /// Index state
    state: Mutex<DiskState>,
    /// Configuration
    config: DiskConfig,
    /// Published size gauge
    current_size: AtomicU64,
    /// Published entry gauge
    entry_count: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl DiskCache {
    /// Open (or create) a disk cache rooted at `config.cache_dir`
    ///
    /// Reloads the index, drops entries whose data file is missing or has the
    /// wrong length, deletes unreferenced data and temp files, and evicts down
    /// to `capacity` if the directory holds more than the configured limit.
    pub fn open(config: DiskConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::InvalidArgument(
                "disk cache capacity must be greater than zero".into(),
            ));
        }
        fs::create_dir_all(&config.cache_dir).map_err(|e| Error::io_at(&config.cache_dir, e))?;

        let index_path = config.cache_dir.join(INDEX_FILE);
        let persisted: PersistedIndex = match fs::read(&index_path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => PersistedIndex::default(),
            Err(e) => return Err(Error::io_at(&index_path, e)),
        };

        let mut state = DiskState {
            next_seq: persisted.next_seq,
            ..Default::default()
        };
        let mut repaired = false;

        for (key, entry) in persisted.entries {
            let path = config.cache_dir.join(&entry.filename);
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() && meta.len() == entry.size => {
                    state.next_seq = state.next_seq.max(entry.seq + 1);
                    state.insert(key, entry);
                }
                _ => {
                    warn!(key = %key, file = %entry.filename, "Dropping dangling disk index entry");
                    repaired = true;
                }
            }
        }

        let referenced: HashSet<&str> = state
            .entries
            .values()
            .map(|entry| entry.filename.as_str())
            .collect();
        let listing = fs::read_dir(&config.cache_dir).map_err(|e| Error::io_at(&config.cache_dir, e))?;
        for dir_entry in listing {
            let path = dir_entry.map_err(|e| Error::io_at(&config.cache_dir, e))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let managed = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some(DATA_EXT) | Some(TEMP_EXT)
            );
            if managed && !referenced.contains(name) {
                warn!(file = %name, "Removing orphaned disk cache file");
                fs::remove_file(&path).map_err(|e| Error::io_at(&path, e))?;
            }
        }

        let mut overflow = Vec::new();
        while state.current_size > config.capacity {
            match state.pop_oldest() {
                Some(victim) => overflow.push(victim),
                None => break,
            }
        }

        let cache = Self {
            state: Mutex::new(DiskState::default()),
            config,
            current_size: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };

        if repaired || !overflow.is_empty() {
            cache.persist(&state)?;
        }
        for (key, entry) in &overflow {
            debug!(key = %key, "Evicted disk entry above configured capacity");
            cache.delete_file(&entry.filename)?;
        }
        cache
            .evictions
            .fetch_add(overflow.len() as u64, Ordering::Relaxed);

        info!(
            dir = %cache.config.cache_dir.display(),
            entries = state.entries.len(),
            bytes = state.current_size,
            "Opened disk cache"
        );
        cache.publish(&state);
        *cache.state.lock() = state;
        Ok(cache)
    }

    /// Store a value with its metadata
    ///
    /// Returns the keys evicted to make room. Fails with `CapacityExceeded`
    /// when the value alone is larger than the capacity; nothing changes in
    /// that case.
    pub fn put(&self, key: CacheKey, value: &[u8], metadata: Metadata) -> Result<Vec<CacheKey>> {
        let size = value.len() as u64;
        if size > self.config.capacity {
            return Err(Error::CapacityExceeded {
                tier: "disk",
                size,
                capacity: self.config.capacity,
            });
        }

        let file_id = Uuid::new_v4();
        let filename = format!("{file_id}.{DATA_EXT}");
        let temp_path = self.config.cache_dir.join(format!("{file_id}.{TEMP_EXT}"));
        let data_path = self.config.cache_dir.join(&filename);

        if let Err(e) = write_synced(&temp_path, value) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, &data_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::io_at(&data_path, e));
        }

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        let previous = state.remove(&key);
        let mut victims = Vec::new();
        while state.current_size + size > self.config.capacity {
            match state.pop_oldest() {
                Some(victim) => victims.push(victim),
                None => break,
            }
        }
        state.insert(
            key.clone(),
            DiskIndexEntry {
                filename,
                size,
                metadata,
                created_at: Utc::now(),
                seq,
                content_hash: content_hash(value),
            },
        );

        if let Err(e) = self.persist(&state) {
            state.remove(&key);
            for (victim, entry) in victims {
                state.insert(victim, entry);
            }
            if let Some(entry) = previous {
                state.insert(key, entry);
            }
            self.publish(&state);
            let _ = fs::remove_file(&data_path);
            return Err(e);
        }
        self.publish(&state);

        if let Some(old) = previous {
            self.discard_file(&old.filename);
        }
        for (_, entry) in &victims {
            self.discard_file(&entry.filename);
        }

        let evicted: Vec<CacheKey> = victims.into_iter().map(|(k, _)| k).collect();
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        debug!(key = %key, size, evicted = evicted.len(), "Stored value on disk");
        Ok(evicted)
    }

    /// Read a value
    ///
    /// A missing data file or a content hash mismatch is reported as an I/O
    /// error and the broken entry is dropped from the index.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let path = self.config.cache_dir.join(&entry.filename);
        let failure = match fs::read(&path) {
            Ok(data) if content_hash(&data) == entry.content_hash && data.len() as u64 == entry.size => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(Bytes::from(data)));
            }
            Ok(_) => std::io::Error::new(ErrorKind::InvalidData, "disk cache file is corrupt"),
            Err(e) if e.kind() == ErrorKind::NotFound => e,
            Err(e) => return Err(Error::io_at(&path, e)),
        };

        warn!(key = %key, file = %path.display(), error = %failure, "Dropping unreadable disk entry");
        if let Some(broken) = state.remove(key) {
            if let Err(e) = self.persist(&state) {
                state.insert(key.clone(), broken);
                return Err(e);
            }
            self.publish(&state);
            self.discard_file(&broken.filename);
        }
        Err(Error::io_at(path, failure))
    }

    /// Read a value without counting a hit or repairing the index
    pub fn peek(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let state = self.state.lock();
        let Some(entry) = state.entries.get(key) else {
            return Ok(None);
        };

        let path = self.config.cache_dir.join(&entry.filename);
        let data = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        if data.len() as u64 != entry.size || content_hash(&data) != entry.content_hash {
            let failure = std::io::Error::new(ErrorKind::InvalidData, "disk cache file is corrupt");
            return Err(Error::io_at(path, failure));
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Check if key exists in the index
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Remove a value and its file
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(entry) = state.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&state) {
            state.insert(key.clone(), entry);
            return Err(e);
        }
        self.publish(&state);
        self.delete_file(&entry.filename)?;
        debug!(key = %key, "Removed value from disk");
        Ok(true)
    }

    /// Delete every file and empty the index
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        let empty = DiskState {
            next_seq: state.next_seq,
            ..Default::default()
        };
        self.persist(&empty)?;
        let old = std::mem::replace(&mut *state, empty);
        self.publish(&state);

        let mut first_error = None;
        for entry in old.entries.values() {
            if let Err(e) = self.delete_file(&entry.filename) {
                first_error.get_or_insert(e);
            }
        }
        info!(entries = old.entries.len(), "Cleared disk cache");
        first_error.map_or(Ok(()), Err)
    }

    /// Get stored metadata
    pub fn get_metadata(&self, key: &CacheKey) -> Option<Metadata> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.metadata.clone())
    }

    /// Merge fields into stored metadata; `Ok(false)` for an unknown key
    pub fn update_metadata(&self, key: &CacheKey, fields: Metadata) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return Ok(false);
        };
        let before = entry.metadata.clone();
        metadata::merge(&mut entry.metadata, fields);

        if let Err(e) = self.persist(&state) {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.metadata = before;
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Index entry for a key
    pub fn entry(&self, key: &CacheKey) -> Option<DiskIndexEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Absolute path of the data file holding `key`
    pub fn file_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|entry| self.config.cache_dir.join(&entry.filename))
    }

    /// All keys, oldest first
    pub fn keys(&self) -> Vec<CacheKey> {
        self.state.lock().order.values().cloned().collect()
    }

    /// Break down entries by a metadata field
    ///
    /// String values are used as-is, other values by their JSON rendering,
    /// and entries without the field fall under `"unknown"`.
    pub fn stats_by(&self, dimension: &str) -> BTreeMap<String, DimensionStats> {
        let state = self.state.lock();
        let mut breakdown: BTreeMap<String, DimensionStats> = BTreeMap::new();
        for entry in state.entries.values() {
            let bucket = match entry.metadata.get(dimension) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => UNKNOWN_DIMENSION.to_string(),
                Some(other) => other.to_string(),
            };
            let slot = breakdown.entry(bucket).or_default();
            slot.count += 1;
            slot.bytes += entry.size;
        }
        breakdown
    }

    /// Write the index atomically
    fn persist(&self, state: &DiskState) -> Result<()> {
        let encoded = serde_json::to_vec(&state.snapshot())?;
        let index_path = self.config.cache_dir.join(INDEX_FILE);
        let temp_path = self.config.cache_dir.join(format!("{INDEX_FILE}.{TEMP_EXT}"));
        write_synced(&temp_path, &encoded)?;
        fs::rename(&temp_path, &index_path).map_err(|e| Error::io_at(&index_path, e))
    }

    fn delete_file(&self, filename: &str) -> Result<()> {
        let path = self.config.cache_dir.join(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_at(path, e)),
        }
    }

    /// Delete a file the committed index no longer references
    fn discard_file(&self, filename: &str) {
        if let Err(e) = self.delete_file(filename) {
            warn!(file = %filename, error = %e, "Failed to delete replaced disk cache file");
        }
    }

    fn publish(&self, state: &DiskState) {
        self.current_size
            .store(state.current_size, Ordering::Relaxed);
        self.entry_count
            .store(state.entries.len() as u64, Ordering::Relaxed);
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get capacity
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed) as usize
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity() as f64
    }

    /// Cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Get configuration
    pub fn config(&self) -> &DiskConfig {
        &self.config
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| Error::io_at(path, e))?;
    file.write_all(data).map_err(|e| Error::io_at(path, e))?;
    file.sync_all().map_err(|e| Error::io_at(path, e))
}

/// Disk cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    /// Capacity in bytes
    pub size_limit: u64,
    /// Current size in bytes
    pub current_size: u64,
    /// Number of entries
    pub entry_count: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Eviction count
    pub evictions: u64,
    /// Utilization (0.0 - 1.0)
    pub utilization: f64,
    /// Entries by `mimetype`
    pub by_mimetype: BTreeMap<String, DimensionStats>,
}

impl DiskCache {
    /// Get cache statistics
    pub fn stats(&self) -> DiskStats {
        DiskStats {
            size_limit: self.capacity(),
            current_size: self.size(),
            entry_count: self.len(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            utilization: self.utilization(),
            by_mimetype: self.stats_by("mimetype"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name).unwrap()
    }

    fn open(dir: &TempDir, capacity: u64) -> DiskCache {
        DiskCache::open(DiskConfig {
            capacity,
            cache_dir: dir.path().to_path_buf(),
        })
        .unwrap()
    }

    fn data_files(dir: &Path) -> HashSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".bin"))
            .collect()
    }

    fn indexed_files(cache: &DiskCache) -> HashSet<String> {
        cache
            .keys()
            .iter()
            .filter_map(|k| cache.entry(k))
            .map(|e| e.filename)
            .collect()
    }

    fn mime(value: &str) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("mimetype".into(), json!(value));
        meta
    }

    #[test]
    fn test_disk_cache_put_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024 * 1024);

        cache
            .put(key("a"), b"payload", mime("text/plain"))
            .unwrap();

        assert!(cache.contains(&key("a")));
        assert_eq!(cache.get(&key("a")).unwrap(), Some(Bytes::from_static(b"payload")));
        assert_eq!(cache.get(&key("b")).unwrap(), None);
        assert_eq!(cache.size(), 7);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_capacity_bound_many_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 10_000);

        for i in 0..200 {
            cache
                .put(key(&format!("k{i}")), &[1u8; 100], Metadata::new())
                .unwrap();
            assert!(cache.size() <= 10_000);
        }

        let stats = cache.stats();
        assert!(stats.entry_count <= 100);
        assert!(stats.current_size < 10_000 + 100);
        assert_eq!(data_files(dir.path()), indexed_files(&cache));
    }

    #[test]
    fn test_oldest_evicted_first() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 300);

        for name in ["a", "b", "c"] {
            cache.put(key(name), &[0u8; 100], Metadata::new()).unwrap();
        }
        let evicted = cache.put(key("d"), &[0u8; 150], Metadata::new()).unwrap();

        assert_eq!(evicted, vec![key("a"), key("b")]);
        assert_eq!(cache.keys(), vec![key("c"), key("d")]);
        assert_eq!(cache.evictions(), 2);
    }

    #[test]
    fn test_overwrite_replaces_file() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);

        cache.put(key("a"), b"first", Metadata::new()).unwrap();
        let first = cache.entry(&key("a")).unwrap().filename;
        cache.put(key("a"), b"second!", Metadata::new()).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 7);
        assert!(!dir.path().join(first).exists());
        assert_eq!(data_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_oversized_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 10);

        let result = cache.put(key("big"), &[0u8; 11], Metadata::new());
        assert!(matches!(result, Err(Error::CapacityExceeded { tier: "disk", .. })));
        assert!(cache.is_empty());
        assert!(data_files(dir.path()).is_empty());
    }

    #[test]
    fn test_reopen_restores_index_and_metadata() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1000);
            cache.put(key("a"), b"alpha", mime("text/plain")).unwrap();
            let mut extra = Metadata::new();
            extra.insert("is_pinned".into(), json!(true));
            assert!(cache.update_metadata(&key("a"), extra).unwrap());
        }

        let cache = open(&dir, 1000);
        assert_eq!(cache.get(&key("a")).unwrap(), Some(Bytes::from_static(b"alpha")));
        let meta = cache.get_metadata(&key("a")).unwrap();
        assert_eq!(meta["mimetype"], json!("text/plain"));
        assert_eq!(meta["is_pinned"], json!(true));
    }

    #[test]
    fn test_reopen_repairs_dangling_and_orphans() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1000);
            cache.put(key("kept"), b"kept", Metadata::new()).unwrap();
            cache.put(key("lost"), b"lost", Metadata::new()).unwrap();
            fs::remove_file(cache.file_path(&key("lost")).unwrap()).unwrap();
        }
        fs::write(dir.path().join("stray.bin"), b"stray").unwrap();
        fs::write(dir.path().join("half.tmp"), b"half").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not ours").unwrap();

        let cache = open(&dir, 1000);
        assert_eq!(cache.keys(), vec![key("kept")]);
        assert!(!dir.path().join("stray.bin").exists());
        assert!(!dir.path().join("half.tmp").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(data_files(dir.path()), indexed_files(&cache));
    }

    #[test]
    fn test_reopen_with_smaller_capacity_evicts() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1000);
            for name in ["a", "b", "c"] {
                cache.put(key(name), &[0u8; 100], Metadata::new()).unwrap();
            }
        }
        let cache = open(&dir, 200);
        assert_eq!(cache.keys(), vec![key("b"), key("c")]);
        assert_eq!(data_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_corrupt_file_reported_as_io() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        cache.put(key("a"), b"original", Metadata::new()).unwrap();
        fs::write(cache.file_path(&key("a")).unwrap(), b"tampered").unwrap();

        let err = cache.get(&key("a")).unwrap_err();
        assert!(err.is_io());
        assert!(!cache.contains(&key("a")));
        assert_eq!(cache.get(&key("a")).unwrap(), None);
    }

    #[test]
    fn test_missing_file_reported_as_io() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        cache.put(key("a"), b"value", Metadata::new()).unwrap();
        fs::remove_file(cache.file_path(&key("a")).unwrap()).unwrap();

        assert!(cache.get(&key("a")).unwrap_err().is_io());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_clear_delete_files() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        for name in ["a", "b", "c"] {
            cache.put(key(name), b"x", Metadata::new()).unwrap();
        }

        assert!(cache.remove(&key("a")).unwrap());
        assert!(!cache.remove(&key("a")).unwrap());
        assert_eq!(data_files(dir.path()).len(), 2);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        assert!(data_files(dir.path()).is_empty());
        assert!(dir.path().join(INDEX_FILE).exists());
    }

    /// Replace the index file with a directory so the next rename fails
    fn block_index_writes(dir: &TempDir) {
        let index_path = dir.path().join(INDEX_FILE);
        fs::remove_file(&index_path).unwrap();
        fs::create_dir(&index_path).unwrap();
        fs::write(index_path.join("keep"), b"").unwrap();
    }

    #[test]
    fn test_failed_clear_keeps_index() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        cache.put(key("a"), b"alpha", Metadata::new()).unwrap();
        cache.put(key("b"), b"beta", Metadata::new()).unwrap();
        block_index_writes(&dir);

        assert!(cache.clear().unwrap_err().is_io());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 9);
        assert_eq!(indexed_files(&cache), data_files(dir.path()));
        assert_eq!(cache.get(&key("a")).unwrap(), Some(Bytes::from_static(b"alpha")));
    }

    #[test]
    fn test_failed_drop_of_corrupt_entry_keeps_index() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        cache.put(key("a"), b"original", Metadata::new()).unwrap();
        fs::write(cache.file_path(&key("a")).unwrap(), b"tampered").unwrap();
        block_index_writes(&dir);

        assert!(cache.get(&key("a")).unwrap_err().is_io());
        assert!(cache.contains(&key("a")));
        assert_eq!(cache.size(), 8);
        assert_eq!(indexed_files(&cache), data_files(dir.path()));
    }

    #[test]
    fn test_update_metadata_unknown_key() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        assert!(!cache.update_metadata(&key("nope"), mime("a/b")).unwrap());
    }

    #[test]
    fn test_stats_by_mimetype() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1000);
        cache.put(key("a"), &[0u8; 10], mime("text/plain")).unwrap();
        cache.put(key("b"), &[0u8; 20], mime("text/plain")).unwrap();
        cache.put(key("c"), &[0u8; 5], Metadata::new()).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(
            stats.by_mimetype["text/plain"],
            DimensionStats { count: 2, bytes: 30 }
        );
        assert_eq!(stats.by_mimetype[UNKNOWN_DIMENSION].count, 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let result = DiskCache::open(DiskConfig {
            capacity: 0,
            cache_dir: dir.path().to_path_buf(),
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
