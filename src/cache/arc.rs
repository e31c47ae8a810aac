//! ARC Cache - RAM-based Hot Tier
//!
//! Adaptive Replacement Cache bounded by total value bytes.
//!
//! # Design
//!
//! ```text
//!   T1 (seen once)         T2 (seen twice or more)
//!   LRU ........ MRU       LRU ........ MRU
//!    │                      │
//!    ▼ evict                ▼ evict
//!   B1 (ghost keys)        B2 (ghost keys)
//! ```
//!
//! - T1/T2 hold values; their combined byte size never exceeds `maxsize`
//! - B1/B2 remember evicted keys (no payload), capped by entry count
//! - `target_t1` (ARC's `p`) is the byte budget T1 aims for; a put that hits
//!   B1 grows it, a put that hits B2 shrinks it
//! - A key lives in exactly one of the four lists
//!
//! Recency order inside each list is a logical clock: every attach takes the
//! next tick, so the smallest tick in a list is its LRU end.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::entry::CacheKey;
use crate::error::{Error, Result};

/// Default memory tier capacity (100MB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 100 * 1024 * 1024;

/// Lower bound on ghost list length
const MIN_GHOST_ENTRIES: usize = 8;

/// Upper bound on ghost list length
const MAX_GHOST_ENTRIES: usize = 65_536;

/// Item size assumed before any value has been admitted
const DEFAULT_ITEM_SIZE_ESTIMATE: u64 = 4 * 1024;

/// ARC cache configuration
#[derive(Debug, Clone)]
pub struct ArcConfig {
    /// Maximum bytes held across T1 and T2
    pub maxsize: u64,
    /// Fixed per-ghost-list entry cap; `None` derives it from `maxsize`
    /// divided by the running average admitted item size
    pub ghost_capacity: Option<usize>,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            maxsize: DEFAULT_MEMORY_CAPACITY,
            ghost_capacity: None,
        }
    }
}

/// The four ARC lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcList {
    /// Recent: resident, accessed once
    T1,
    /// Frequent: resident, accessed at least twice
    T2,
    /// Ghosts evicted from T1
    B1,
    /// Ghosts evicted from T2
    B2,
}

impl ArcList {
    #[inline]
    fn index(self) -> usize {
        match self {
            ArcList::T1 => 0,
            ArcList::T2 => 1,
            ArcList::B1 => 2,
            ArcList::B2 => 3,
        }
    }

    /// True for T1 and T2
    #[inline]
    pub fn is_resident(self) -> bool {
        matches!(self, ArcList::T1 | ArcList::T2)
    }
}

struct Slot {
    list: ArcList,
    tick: u64,
    size: u64,
    value: Option<Bytes>,
}

#[derive(Default)]
struct ArcState {
    slots: HashMap<CacheKey, Slot>,
    lists: [BTreeMap<u64, CacheKey>; 4],
    list_bytes: [u64; 4],
    target_t1: u64,
    clock: u64,
    admitted_items: u64,
    admitted_bytes: u64,
}

impl ArcState {
    fn attach(&mut self, key: CacheKey, list: ArcList, size: u64, value: Option<Bytes>) {
        self.clock += 1;
        let tick = self.clock;
        self.lists[list.index()].insert(tick, key.clone());
        self.list_bytes[list.index()] += size;
        self.slots.insert(
            key,
            Slot {
                list,
                tick,
                size,
                value,
            },
        );
    }

    fn detach(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.lists[slot.list.index()].remove(&slot.tick);
        self.list_bytes[slot.list.index()] -= slot.size;
        Some(slot)
    }

    fn lru(&self, list: ArcList) -> Option<CacheKey> {
        self.lists[list.index()]
            .first_key_value()
            .map(|(_, key)| key.clone())
    }

    fn count(&self, list: ArcList) -> usize {
        self.lists[list.index()].len()
    }

    fn bytes(&self, list: ArcList) -> u64 {
        self.list_bytes[list.index()]
    }

    fn resident_bytes(&self) -> u64 {
        self.bytes(ArcList::T1) + self.bytes(ArcList::T2)
    }

    fn list_of(&self, key: &CacheKey) -> Option<ArcList> {
        self.slots.get(key).map(|slot| slot.list)
    }
}

/// Decide whether `replace` takes its victim from T1.
///
/// Tie-break: T1 is chosen when its bytes exceed `target_t1`, or when they
/// sit exactly at the target and the triggering put hit B2. Otherwise T2 is
/// chosen. An empty list is never chosen while the other has entries.
fn evict_from_t1(t1_bytes: u64, t1_empty: bool, t2_empty: bool, target_t1: u64, b2_hit: bool) -> bool {
    if t2_empty {
        return true;
    }
    if t1_empty {
        return false;
    }
    t1_bytes > target_t1 || (b2_hit && t1_bytes == target_t1)
}

/// ARC Cache - RAM-based hot tier
pub struct ArcCache {
    /// List state
    state: Mutex<ArcState>,
    /// Configuration
    config: ArcConfig,
    /// Current resident bytes
    current_size: AtomicU64,
    /// Published list gauges (T1, T2, B1, B2 entry counts)
    list_lens: [AtomicU64; 4],
    /// Published T1/T2 byte gauges
    t1_bytes: AtomicU64,
    t2_bytes: AtomicU64,
    /// Published adaptive target
    target_t1: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
    /// Puts that found their key in a ghost list
    ghost_hits: AtomicU64,
}

impl ArcCache {
    /// Create a new ARC cache with default configuration
    pub fn new() -> Self {
        Self::with_config(ArcConfig::default())
    }

    /// Create a new ARC cache holding at most `maxsize` bytes
    pub fn with_capacity(maxsize: u64) -> Self {
        Self::with_config(ArcConfig {
            maxsize,
            ..Default::default()
        })
    }

    /// Create a new ARC cache with custom configuration
    pub fn with_config(config: ArcConfig) -> Self {
        Self {
            state: Mutex::new(ArcState::default()),
            config,
            current_size: AtomicU64::new(0),
            list_lens: Default::default(),
            t1_bytes: AtomicU64::new(0),
            t2_bytes: AtomicU64::new(0),
            target_t1: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            ghost_hits: AtomicU64::new(0),
        }
    }

    /// Get a value, promoting T1 hits to T2 and refreshing T2 hits
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let mut state = self.state.lock();

        match state.list_of(key) {
            Some(list) if list.is_resident() => {
                let slot = state.detach(key)?;
                let value = slot.value.clone();
                state.attach(key.clone(), ArcList::T2, slot.size, slot.value);
                self.publish(&state);
                self.hits.fetch_add(1, Ordering::Relaxed);
                value
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Put a value into the cache
    ///
    /// Fails with `CapacityExceeded` only when the value alone is larger than
    /// `maxsize`; nothing is stored or evicted in that case.
    pub fn put(&self, key: CacheKey, value: Bytes) -> Result<()> {
        self.insert(key, value).map(|_| ())
    }

    /// Put a value and return the keys evicted to make room for it
    pub fn insert(&self, key: CacheKey, value: Bytes) -> Result<Vec<CacheKey>> {
        let size = value.len() as u64;
        if size > self.config.maxsize {
            return Err(Error::CapacityExceeded {
                tier: "memory",
                size,
                capacity: self.config.maxsize,
            });
        }

        let mut state = self.state.lock();

        let (target_list, b2_hit) = match state.list_of(&key) {
            Some(ArcList::T1) | Some(ArcList::T2) => {
                state.detach(&key);
                (ArcList::T2, false)
            }
            Some(ghost @ (ArcList::B1 | ArcList::B2)) => {
                self.adapt(&mut state, ghost, size);
                state.detach(&key);
                self.ghost_hits.fetch_add(1, Ordering::Relaxed);
                (ArcList::T2, ghost == ArcList::B2)
            }
            None => (ArcList::T1, false),
        };

        let mut evicted = Vec::new();
        while state.resident_bytes() + size > self.config.maxsize {
            match self.replace(&mut state, b2_hit) {
                Some(victim) => evicted.push(victim),
                None => break,
            }
        }

        state.attach(key.clone(), target_list, size, Some(value));
        state.admitted_items += 1;
        state.admitted_bytes += size;
        self.publish(&state);

        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!(key = %key, evicted = evicted.len(), "ARC evicted entries to admit value");
        }

        Ok(evicted)
    }

    /// Remove a key from every list, returning its value if it was resident
    pub fn remove(&self, key: &CacheKey) -> Option<Bytes> {
        let mut state = self.state.lock();
        let slot = state.detach(key)?;
        self.publish(&state);
        slot.value
    }

    /// Read a resident value without touching recency or hit counters
    pub fn peek(&self, key: &CacheKey) -> Option<Bytes> {
        self.state
            .lock()
            .slots
            .get(key)
            .and_then(|slot| slot.value.clone())
    }

    /// Check membership in T1 or T2 (ghosts do not count)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state
            .lock()
            .list_of(key)
            .is_some_and(ArcList::is_resident)
    }

    /// Which list currently tracks `key`, if any
    pub fn list_of(&self, key: &CacheKey) -> Option<ArcList> {
        self.state.lock().list_of(key)
    }

    /// Resident keys, least recently used first within T1 then T2
    pub fn keys(&self) -> Vec<CacheKey> {
        let state = self.state.lock();
        [ArcList::T1, ArcList::T2]
            .iter()
            .flat_map(|list| state.lists[list.index()].values().cloned())
            .collect()
    }

    /// Empty all four lists and reset the adaptive target
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = ArcState::default();
        self.publish(&state);
    }

    /// Shift `target_t1` toward the list whose ghost was hit.
    ///
    /// A B1 hit grows the target by the item size, scaled by |B2|/|B1| when
    /// B2 is the longer ghost list; a B2 hit shrinks it symmetrically.
    fn adapt(&self, state: &mut ArcState, ghost: ArcList, size: u64) {
        let b1 = state.count(ArcList::B1).max(1) as u64;
        let b2 = state.count(ArcList::B2).max(1) as u64;

        match ghost {
            ArcList::B1 => {
                let delta = if b1 >= b2 {
                    size
                } else {
                    size.saturating_mul(b2 / b1)
                };
                state.target_t1 = state
                    .target_t1
                    .saturating_add(delta)
                    .min(self.config.maxsize);
            }
            ArcList::B2 => {
                let delta = if b2 >= b1 {
                    size
                } else {
                    size.saturating_mul(b1 / b2)
                };
                state.target_t1 = state.target_t1.saturating_sub(delta);
            }
            _ => {}
        }
    }

    /// Evict one resident entry into its ghost list
    fn replace(&self, state: &mut ArcState, b2_hit: bool) -> Option<CacheKey> {
        let from_t1 = evict_from_t1(
            state.bytes(ArcList::T1),
            state.count(ArcList::T1) == 0,
            state.count(ArcList::T2) == 0,
            state.target_t1,
            b2_hit,
        );
        let (source, ghost) = if from_t1 {
            (ArcList::T1, ArcList::B1)
        } else {
            (ArcList::T2, ArcList::B2)
        };

        let victim = state.lru(source)?;
        let slot = state.detach(&victim)?;
        state.attach(victim.clone(), ghost, slot.size, None);

        let limit = self.ghost_limit(state);
        while state.count(ghost) > limit {
            match state.lru(ghost) {
                Some(oldest) => {
                    state.detach(&oldest);
                }
                None => break,
            }
        }

        Some(victim)
    }

    /// Per-ghost-list entry cap
    fn ghost_limit(&self, state: &ArcState) -> usize {
        if let Some(fixed) = self.config.ghost_capacity {
            return fixed;
        }
        let average = if state.admitted_items == 0 {
            DEFAULT_ITEM_SIZE_ESTIMATE
        } else {
            (state.admitted_bytes / state.admitted_items).max(1)
        };
        ((self.config.maxsize / average) as usize).clamp(MIN_GHOST_ENTRIES, MAX_GHOST_ENTRIES)
    }

    /// Copy list gauges out of the locked state
    fn publish(&self, state: &ArcState) {
        self.current_size
            .store(state.resident_bytes(), Ordering::Relaxed);
        for list in [ArcList::T1, ArcList::T2, ArcList::B1, ArcList::B2] {
            self.list_lens[list.index()].store(state.count(list) as u64, Ordering::Relaxed);
        }
        self.t1_bytes
            .store(state.bytes(ArcList::T1), Ordering::Relaxed);
        self.t2_bytes
            .store(state.bytes(ArcList::T2), Ordering::Relaxed);
        self.target_t1.store(state.target_t1, Ordering::Relaxed);
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get capacity
    pub fn capacity(&self) -> u64 {
        self.config.maxsize
    }

    /// Get number of resident entries
    pub fn len(&self) -> usize {
        (self.list_lens[0].load(Ordering::Relaxed) + self.list_lens[1].load(Ordering::Relaxed))
            as usize
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

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get configuration
    pub fn config(&self) -> &ArcConfig {
        &self.config
    }
}

impl Default for ArcCache {
    fn default() -> Self {
        Self::new()
    }
}

/// ARC cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArcStats {
    /// Capacity in bytes
    pub maxsize: u64,
    /// Resident bytes
    pub current_size: u64,
    /// Entries in T1
    pub t1_len: usize,
    /// Entries in T2
    pub t2_len: usize,
    /// Ghost entries in B1
    pub b1_len: usize,
    /// Ghost entries in B2
    pub b2_len: usize,
    /// Bytes in T1
    pub t1_bytes: u64,
    /// Bytes in T2
    pub t2_bytes: u64,
    /// Adaptive T1 byte target
    pub target_t1: u64,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
    /// Puts that revived a ghost key
    pub ghost_hits: u64,
}

impl ArcCache {
    /// Get cache statistics
    ///
    /// Reads published gauges only; never takes the list lock.
    pub fn stats(&self) -> ArcStats {
        let lens: Vec<usize> = self
            .list_lens
            .iter()
            .map(|len| len.load(Ordering::Relaxed) as usize)
            .collect();
        ArcStats {
            maxsize: self.capacity(),
            current_size: self.size(),
            t1_len: lens[0],
            t2_len: lens[1],
            b1_len: lens[2],
            b2_len: lens[3],
            t1_bytes: self.t1_bytes.load(Ordering::Relaxed),
            t2_bytes: self.t2_bytes.load(Ordering::Relaxed),
            target_t1: self.target_t1.load(Ordering::Relaxed),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            ghost_hits: self.ghost_hits.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
