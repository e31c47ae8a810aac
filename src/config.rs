//! Cache configuration
//!
//! A single explicit struct handed to `TieredCacheManager::open`. It can be
//! built in code or loaded from YAML/JSON; every field has a default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::arc::{ArcConfig, DEFAULT_MEMORY_CAPACITY};
use crate::cache::disk::{DiskConfig, DEFAULT_DISK_CAPACITY};
use crate::cache::policy::{PromotionPolicy, DEFAULT_MAX_ITEM_SIZE, DEFAULT_MIN_ACCESS_COUNT};
use crate::cache::replication::ReplicationPolicy;
use crate::error::{Error, Result};

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory tier capacity in bytes
    pub memory_cache_size: u64,
    /// Disk tier capacity in bytes
    pub local_cache_size: u64,
    /// Disk tier directory
    pub local_cache_path: PathBuf,
    /// Largest value admitted to the memory tier
    pub max_item_size: u64,
    /// Reads needed before a disk-only value is promoted
    pub min_access_count: u64,
    /// Allow `get_mmap`
    pub enable_memory_mapping: bool,
    /// Fixed ARC ghost list length; derived from the average item size when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ghost_list_capacity: Option<usize>,
    /// Redundancy thresholds and counted tiers
    pub replication_policy: ReplicationPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: DEFAULT_MEMORY_CAPACITY,
            local_cache_size: DEFAULT_DISK_CAPACITY,
            local_cache_path: std::env::temp_dir().join("ipfs_tiered_cache"),
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            min_access_count: DEFAULT_MIN_ACCESS_COUNT,
            enable_memory_mapping: true,
            ghost_list_capacity: None,
            replication_policy: ReplicationPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            local_cache_path: path.into(),
            ..Default::default()
        }
    }

    /// Parse YAML
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw),
            Some("json") => Self::from_json_str(&raw),
            _ => Err(Error::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.memory_cache_size == 0 {
            return Err(Error::Config("memory_cache_size must be greater than zero".into()));
        }
        if self.local_cache_size == 0 {
            return Err(Error::Config("local_cache_size must be greater than zero".into()));
        }
        if self.min_access_count == 0 {
            return Err(Error::Config("min_access_count must be at least 1".into()));
        }
        if self.local_cache_path.as_os_str().is_empty() {
            return Err(Error::Config("local_cache_path must not be empty".into()));
        }
        if self.ghost_list_capacity == Some(0) {
            return Err(Error::Config("ghost_list_capacity must be greater than zero".into()));
        }
        self.replication_policy.validate()
    }

    pub fn arc_config(&self) -> ArcConfig {
        ArcConfig {
            maxsize: self.memory_cache_size,
            ghost_capacity: self.ghost_list_capacity,
        }
    }

    pub fn disk_config(&self) -> DiskConfig {
        DiskConfig {
            capacity: self.local_cache_size,
            cache_dir: self.local_cache_path.clone(),
        }
    }

    pub fn promotion_policy(&self) -> PromotionPolicy {
        PromotionPolicy {
            max_item_size: self.max_item_size,
            min_access_count: self.min_access_count,
        }
    }
}
