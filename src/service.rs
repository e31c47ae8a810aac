//! Async Facade
//!
//! `TieredCacheManager` does blocking file I/O. `AsyncTieredCache` moves
//! each call onto tokio's blocking pool so async hosts never stall a
//! worker thread, and drives replication to caller-supplied backends.
//!
//! ```text
//!   async caller ──▶ AsyncTieredCache ──spawn_blocking──▶ TieredCacheManager
//!                          │
//!                          └── replicate ──▶ StorageBackend::store
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{info, warn};

use crate::backend::StorageBackend;
use crate::cache::entry::{CacheKey, CacheTier};
use crate::cache::manager::{ComprehensiveMetrics, TieredCacheManager};
use crate::cache::metadata::{Metadata, MetadataFilter};
use crate::cache::metrics::MetricsSnapshot;
use crate::cache::replication::{marker_for, ReplicationInfo};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Cloneable async handle to a shared cache
#[derive(Clone)]
pub struct AsyncTieredCache {
    inner: Arc<TieredCacheManager>,
}

impl AsyncTieredCache {
    /// Wrap an existing manager
    pub fn new(manager: TieredCacheManager) -> Self {
        Self {
            inner: Arc::new(manager),
        }
    }

    /// Open a cache on the blocking pool
    pub async fn open(config: CacheConfig) -> Result<Self> {
        let manager = tokio::task::spawn_blocking(move || TieredCacheManager::open(config))
            .await
            .map_err(|e| Error::Internal(format!("cache open task failed: {e}")))??;
        Ok(Self::new(manager))
    }

    /// Shared manager, for synchronous callers
    pub fn manager(&self) -> &Arc<TieredCacheManager> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&TieredCacheManager) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| Error::Internal(format!("cache task failed: {e}")))?
    }

    pub async fn put(&self, key: CacheKey, value: impl Into<Bytes>, fields: Metadata) -> Result<CacheTier> {
        let value = value.into();
        self.run(move |cache| cache.put(key, value, fields)).await
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let key = key.clone();
        self.run(move |cache| cache.get(&key)).await
    }

    pub async fn get_metadata(&self, key: &CacheKey) -> Result<Option<Metadata>> {
        let key = key.clone();
        self.run(move |cache| Ok(cache.get_metadata(&key))).await
    }

    pub async fn update_metadata(&self, key: &CacheKey, fields: Metadata) -> Result<bool> {
        let key = key.clone();
        self.run(move |cache| cache.update_metadata(&key, fields)).await
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let key = key.clone();
        self.run(move |cache| cache.delete(&key)).await
    }

    pub async fn query_metadata(&self, filters: Vec<MetadataFilter>) -> Result<Vec<(CacheKey, Metadata)>> {
        self.run(move |cache| Ok(cache.query_metadata(&filters))).await
    }

    /// Clear the given tiers; an empty list clears both
    pub async fn clear(&self, tiers: Vec<CacheTier>) -> Result<()> {
        let tiers = if tiers.is_empty() {
            CacheTier::all().to_vec()
        } else {
            tiers
        };
        self.run(move |cache| cache.clear(&tiers)).await
    }

    pub async fn get_comprehensive_metrics(&self) -> Result<ComprehensiveMetrics> {
        self.run(|cache| Ok(cache.get_comprehensive_metrics())).await
    }

    /// Lock-free counter snapshot; safe to call from async code directly
    pub fn get_stats(&self) -> MetricsSnapshot {
        self.inner.get_stats()
    }

    /// Copy a value to `backend` and record where it went
    ///
    /// The backend's tier is listed as pending while the copy is in flight.
    /// On success its marker field is set; on failure the pending entry is
    /// withdrawn and the backend error returned.
    pub async fn replicate(&self, key: &CacheKey, backend: &dyn StorageBackend) -> Result<ReplicationInfo> {
        let tier = backend.tier().to_string();
        if marker_for(&tier).is_none() {
            return Err(Error::InvalidArgument(format!(
                "tier '{tier}' has no metadata marker"
            )));
        }

        let k = key.clone();
        let value = self
            .run(move |cache| cache.peek(&k))
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let (k, t) = (key.clone(), tier.clone());
        self.run(move |cache| cache.mark_pending(&k, &t)).await?;

        match backend.store(key, value).await {
            Ok(location) => {
                let (k, t) = (key.clone(), tier.clone());
                let recorded = self
                    .run(move |cache| cache.record_replica(&k, &t, &location))
                    .await?;
                if !recorded {
                    return Err(Error::NotFound(key.to_string()));
                }
                info!(key = %key, tier = %tier, "Replicated value");
            }
            Err(e) => {
                warn!(key = %key, tier = %tier, error = %e, "Replication failed");
                let (k, t) = (key.clone(), tier.clone());
                self.run(move |cache| cache.clear_pending(&k, &t)).await?;
                return Err(e);
            }
        }

        let k = key.clone();
        self.run(move |cache| Ok(cache.replication_info(&k)))
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Replicate to every backend whose tier is not yet replicated
    ///
    /// Copies run concurrently. Returns one result per attempted backend,
    /// paired with its tier name.
    pub async fn replicate_all(
        &self,
        key: &CacheKey,
        backends: &[Arc<dyn StorageBackend>],
    ) -> Result<Vec<(String, Result<ReplicationInfo>)>> {
        let k = key.clone();
        let info = self
            .run(move |cache| Ok(cache.replication_info(&k)))
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let targets: Vec<&dyn StorageBackend> = backends
            .iter()
            .map(|b| &**b)
            .filter(|b| !info.replicated_tiers.iter().any(|t| t == b.tier()))
            .collect();

        let results = join_all(targets.iter().map(|backend| self.replicate(key, *backend))).await;
        Ok(targets
            .iter()
            .map(|backend| backend.tier().to_string())
            .zip(results)
            .collect())
    }
}
