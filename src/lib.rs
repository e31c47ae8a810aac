//! IPFS Tiered Cache - Two-Tier Content Cache
//!
//! An embeddable cache for content-addressed blobs. A byte-bounded ARC
//! (Adaptive Replacement Cache) memory tier sits over a durable disk tier;
//! per-key metadata carries replication markers from which a redundancy
//! view is derived on read.
//!
//! # Architecture
//!
//! ```text
//! AsyncTieredCache ──▶ TieredCacheManager ──▶ ArcCache  (memory)
//!        │                     │         └──▶ DiskCache (files + index)
//!        ▼                     ▼
//! StorageBackend        ReplicationPolicy
//! ```
//!
//! # Features
//!
//! - ARC admission and eviction by bytes, with ghost lists
//! - Crash-safe disk tier that survives restarts
//! - Promotion of disk hits back into memory
//! - Revocable memory-mapped reads
//! - Metadata queries by dotted path
//! - Replication health derived from tier markers
//! - Prometheus exposition of cache metrics
//!
//! # Modules
//!
//! - [`backend`] - Replication targets supplied by the host
//! - [`cache`] - Memory tier, disk tier and the manager coordinating them
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types
//! - [`service`] - Async facade over the blocking manager
//! - [`telemetry`] - Logging setup

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use backend::{InMemoryBackend, StorageBackend};
pub use cache::{
    CacheKey, CacheTier, Metadata, MetadataFilter, ReplicationHealth, ReplicationInfo,
    TieredCacheManager,
};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use service::AsyncTieredCache;
