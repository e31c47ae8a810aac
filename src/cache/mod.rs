//! Two-Tier Content Cache
//!
//! Byte-bounded ARC memory tier over a persistent disk tier, with per-key
//! metadata and a replication view derived from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      TieredCacheManager                          │
//! │   records (metadata + access stats) │ promotion │ replication    │
//! └─────────────────────────────────────────────────────────────────┘
//!            │                     │                     │
//!            ▼                     ▼                     ▼
//! ┌───────────────────┐ ┌────────────────────┐ ┌──────────────────┐
//! │  ArcCache (RAM)   │ │  DiskCache (files) │ │   MmapRegistry   │
//! │  T1 T2 │ B1 B2    │ │  index.json + .bin │ │  revocable maps  │
//! └───────────────────┘ └────────────────────┘ └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use ipfs_tiered_cache::cache::{CacheKey, TieredCacheManager};
//! use ipfs_tiered_cache::config::CacheConfig;
//!
//! # fn main() -> ipfs_tiered_cache::Result<()> {
//! let cache = TieredCacheManager::open(CacheConfig::with_path("/var/cache/ipfs"))?;
//! let key = CacheKey::new("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")?;
//! cache.put(key.clone(), &b"hello"[..], Default::default())?;
//! assert_eq!(cache.get(&key)?.as_deref(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

pub mod arc;
pub mod disk;
pub mod entry;
pub mod exporter;
pub mod manager;
pub mod metadata;
pub mod metrics;
pub mod mmap;
pub mod policy;
pub mod replication;

#[cfg(test)]
mod proptest;

pub use arc::{ArcCache, ArcConfig, ArcList, ArcStats};
pub use disk::{DiskCache, DiskConfig, DiskStats};
pub use entry::{AccessStats, CacheKey, CacheTier};
pub use exporter::MetricsExporter;
pub use manager::{metadata_from, ComprehensiveMetrics, TieredCacheManager};
pub use metadata::{Metadata, MetadataFilter};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use mmap::{MmapHandle, MmapRegistry};
pub use policy::PromotionPolicy;
pub use replication::{ReplicationHealth, ReplicationInfo, ReplicationPolicy};
