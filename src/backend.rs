//! External Storage Backends
//!
//! Replication targets (IPFS pinning, S3, Filecoin, ...) are supplied by the
//! caller as `StorageBackend` implementations chosen at construction time.
//! The cache only records where copies went; it never picks a backend on its
//! own.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::cache::entry::CacheKey;
use crate::error::{Error, Result};

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Tier name this backend replicates to (`"s3"`, `"filecoin"`, ...)
    fn tier(&self) -> &str;

    /// Store a copy; returns the location to record in metadata
    /// (bucket name, CAR CID, deal id, repository, ...)
    async fn store(&self, key: &CacheKey, data: Bytes) -> Result<String>;

    /// Check if a copy exists
    async fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Remove a copy
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Get backend statistics
    fn stats(&self) -> BackendStats;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Total objects stored
    pub object_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
    /// Write operations
    pub writes: u64,
    /// Failed write operations
    pub failed_writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory backend for tests and mock deployments
pub struct InMemoryBackend {
    tier: String,
    location: String,
    storage: DashMap<CacheKey, Bytes>,
    fail_writes: AtomicBool,
    total_bytes: AtomicU64,
    writes: AtomicU64,
    failed_writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryBackend {
    /// Create a backend for `tier`, reporting `mem://<tier>` as its location
    pub fn new(tier: impl Into<String>) -> Self {
        let tier = tier.into();
        let location = format!("mem://{tier}");
        Self::with_location(tier, location)
    }

    /// Create a backend reporting a fixed location
    pub fn with_location(tier: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            location: location.into(),
            storage: DashMap::new(),
            fail_writes: AtomicBool::new(false),
            total_bytes: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Make subsequent writes fail (simulates an unreachable backend)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Stored copy, if any
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.storage.get(key).map(|data| data.value().clone())
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn tier(&self) -> &str {
        &self.tier
    }

    async fn store(&self, key: &CacheKey, data: Bytes) -> Result<String> {
        if self.fail_writes.load(Ordering::Relaxed) {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} backend unavailable", self.tier),
            )));
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        let size = data.len() as u64;
        if let Some(old) = self.storage.insert(key.clone(), data) {
            self.total_bytes
                .fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(self.location.clone())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.storage.contains_key(key))
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        match self.storage.remove(key) {
            Some((_, data)) => {
                self.total_bytes
                    .fetch_sub(data.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            object_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name).unwrap()
    }

    #[test]
    fn test_store_and_remove() {
        let backend = InMemoryBackend::with_location("s3", "bucket-a");

        let location = tokio_test::block_on(backend.store(&key("a"), Bytes::from_static(b"data")))
            .unwrap();
        assert_eq!(location, "bucket-a");
        assert!(tokio_test::block_on(backend.exists(&key("a"))).unwrap());
        assert_eq!(backend.get(&key("a")), Some(Bytes::from_static(b"data")));

        assert!(tokio_test::block_on(backend.remove(&key("a"))).unwrap());
        assert!(!tokio_test::block_on(backend.remove(&key("a"))).unwrap());

        let stats = backend.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.deletes, 2);
        assert_eq!(stats.object_count, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_overwrite_tracks_bytes() {
        let backend = InMemoryBackend::new("filecoin");
        tokio_test::block_on(backend.store(&key("a"), Bytes::from(vec![0u8; 10]))).unwrap();
        tokio_test::block_on(backend.store(&key("a"), Bytes::from(vec![0u8; 4]))).unwrap();

        let stats = backend.stats();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.total_bytes, 4);
    }

    #[test]
    fn test_failing_writes() {
        let backend = InMemoryBackend::new("ipfs");
        backend.set_fail_writes(true);

        let err = tokio_test::block_on(backend.store(&key("a"), Bytes::new())).unwrap_err();
        assert!(err.is_io());
        assert_eq!(backend.stats().failed_writes, 1);
        assert_eq!(backend.tier(), "ipfs");
    }
}
