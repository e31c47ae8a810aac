//! Property-Based Tests for the Tiered Cache
//!
//! Uses proptest to drive the tiers with random operation sequences and
//! check the invariants that must hold after every step.
//!
//! # Test Properties
//!
//! 1. **ARC Capacity**: resident bytes never exceed `maxsize`
//! 2. **List Exclusivity**: a key sits in at most one ARC list
//! 3. **Disk Capacity**: indexed bytes never exceed capacity, no stray files
//! 4. **Round Trip**: the last value put under a key is the value read back
//! 5. **Promotion**: a disk hit that fits is resident in memory afterwards
//! 6. **Replication Idempotence**: recording the same replica twice changes nothing

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use bytes::Bytes;
use proptest::prelude::*;
use tempfile::TempDir;

use super::arc::{ArcCache, ArcList};
use super::disk::{DiskCache, DiskConfig};
use super::entry::{CacheKey, CacheTier};
use super::manager::TieredCacheManager;
use super::metadata::Metadata;
use super::replication::{ReplicationPolicy, TIER_MARKERS};
use crate::config::CacheConfig;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, usize),
    Get(u8),
    Remove(u8),
}

/// Strategy for operations over a small key space so keys collide often.
fn op_strategy(max_size: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..12, 1..=max_size).prop_map(|(k, size)| Op::Put(k, size)),
        4 => (0u8..12).prop_map(Op::Get),
        1 => (0u8..12).prop_map(Op::Remove),
    ]
}

fn ops_strategy(max_size: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(max_size), 1..200)
}

fn key(id: u8) -> CacheKey {
    CacheKey::new(format!("bafy-{id}")).unwrap()
}

fn value(id: u8, size: usize) -> Bytes {
    Bytes::from(vec![id; size])
}

fn data_files(dir: &Path) -> Vec<u64> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "bin" || ext == "tmp"))
        .map(|entry| entry.metadata().unwrap().len())
        .collect()
}

// =============================================================================
// ARC Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Resident bytes stay within capacity and match the per-list byte gauges.
    #[test]
    fn prop_arc_respects_capacity(ops in ops_strategy(96)) {
        let cache = ArcCache::with_capacity(256);

        for op in ops {
            match op {
                Op::Put(k, size) => cache.put(key(k), value(k, size)).unwrap(),
                Op::Get(k) => { cache.get(&key(k)); }
                Op::Remove(k) => { cache.remove(&key(k)); }
            }

            let stats = cache.stats();
            prop_assert!(stats.current_size <= stats.maxsize);
            prop_assert_eq!(stats.t1_bytes + stats.t2_bytes, stats.current_size);
            prop_assert_eq!(stats.t1_len + stats.t2_len, cache.len());
            prop_assert!(stats.target_t1 <= stats.maxsize);
        }
    }

    /// Every key is tracked by at most one list and resident keys are readable.
    #[test]
    fn prop_arc_lists_are_exclusive(ops in ops_strategy(64)) {
        let cache = ArcCache::with_capacity(200);

        for op in ops {
            match op {
                Op::Put(k, size) => cache.put(key(k), value(k, size)).unwrap(),
                Op::Get(k) => { cache.get(&key(k)); }
                Op::Remove(k) => { cache.remove(&key(k)); }
            }
        }

        let resident = cache.keys();
        let unique: HashSet<&CacheKey> = resident.iter().collect();
        prop_assert_eq!(unique.len(), resident.len());

        for id in 0u8..12 {
            let k = key(id);
            match cache.list_of(&k) {
                Some(ArcList::T1) | Some(ArcList::T2) => {
                    prop_assert!(cache.contains(&k));
                    prop_assert!(resident.contains(&k));
                }
                Some(ArcList::B1) | Some(ArcList::B2) | None => {
                    prop_assert!(!cache.contains(&k));
                    prop_assert!(!resident.contains(&k));
                }
            }
        }
    }
}

// =============================================================================
// Disk Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Indexed bytes stay within capacity and match the files on disk.
    #[test]
    fn prop_disk_respects_capacity(ops in ops_strategy(120)) {
        let dir = TempDir::new().unwrap();
        let disk = DiskCache::open(DiskConfig {
            capacity: 300,
            cache_dir: dir.path().to_path_buf(),
        })
        .unwrap();

        for op in ops {
            match op {
                Op::Put(k, size) => { disk.put(key(k), &value(k, size), Metadata::new()).unwrap(); }
                Op::Get(k) => { disk.get(&key(k)).unwrap(); }
                Op::Remove(k) => { disk.remove(&key(k)).unwrap(); }
            }
            prop_assert!(disk.size() <= disk.capacity());
        }

        let files = data_files(dir.path());
        prop_assert_eq!(files.len(), disk.len());
        prop_assert_eq!(files.iter().sum::<u64>(), disk.size());
    }
}

// =============================================================================
// Manager Properties
// =============================================================================

fn small_manager(dir: &TempDir) -> TieredCacheManager {
    TieredCacheManager::open(CacheConfig {
        memory_cache_size: 128,
        local_cache_size: 1024 * 1024,
        ..CacheConfig::with_path(dir.path())
    })
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With room on disk for everything, reads return the last value put.
    #[test]
    fn prop_round_trip_last_write_wins(ops in ops_strategy(64)) {
        let dir = TempDir::new().unwrap();
        let cache = small_manager(&dir);
        let mut model: HashMap<u8, Bytes> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(k, size) => {
                    // distinct content per write so stale reads are detectable
                    let v = Bytes::from(vec![k.wrapping_add(size as u8); size]);
                    cache.put(key(k), v.clone(), Metadata::new()).unwrap();
                    model.insert(k, v);
                }
                Op::Get(k) => {
                    prop_assert_eq!(cache.get(&key(k)).unwrap(), model.get(&k).cloned());
                }
                Op::Remove(k) => {
                    prop_assert_eq!(cache.delete(&key(k)).unwrap(), model.remove(&k).is_some());
                }
            }
            prop_assert!(cache.memory().size() <= 128);
        }

        for id in 0u8..12 {
            prop_assert_eq!(cache.contains(&key(id)), model.contains_key(&id));
        }
    }

    /// A disk-only read of a value that fits leaves it resident in memory.
    #[test]
    fn prop_disk_hit_promotes(sizes in prop::collection::vec(1usize..=64, 3..12)) {
        let dir = TempDir::new().unwrap();
        let cache = small_manager(&dir);

        for (id, size) in sizes.iter().enumerate() {
            cache.put(key(id as u8), value(id as u8, *size), Metadata::new()).unwrap();
        }

        for id in 0..sizes.len() as u8 {
            let k = key(id);
            let was_in_memory = cache.contains_in(CacheTier::Memory, &k);
            prop_assert!(cache.get(&k).unwrap().is_some());
            prop_assert!(cache.contains_in(CacheTier::Memory, &k));
            if !was_in_memory {
                prop_assert_eq!(cache.tier_of(&k), Some(CacheTier::Memory));
            }
        }
    }

    /// Recording a replica twice yields the same view as recording it once.
    #[test]
    fn prop_record_replica_is_idempotent(picks in prop::collection::vec(0usize..TIER_MARKERS.len(), 1..6)) {
        let dir = TempDir::new().unwrap();
        let cache = small_manager(&dir);
        let k = key(1);
        cache.put(k.clone(), value(1, 8), Metadata::new()).unwrap();

        let mut distinct = HashSet::new();
        for pick in picks {
            let tier = TIER_MARKERS[pick].tier;
            cache.record_replica(&k, tier, "loc").unwrap();
            let once = cache.replication_info(&k).unwrap();
            cache.record_replica(&k, tier, "loc").unwrap();
            let twice = cache.replication_info(&k).unwrap();
            prop_assert_eq!(&once, &twice);
            distinct.insert(tier);
        }

        let info = cache.replication_info(&k).unwrap();
        prop_assert_eq!(info.current_redundancy as usize, 2 + distinct.len());
        prop_assert!(info.pending_tiers.is_empty());

        let policy = ReplicationPolicy::default();
        prop_assert_eq!(info.health, policy.health(info.current_redundancy));
    }
}
