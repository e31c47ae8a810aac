//! Cache Entry Types
//!
//! Keys, tier labels, and per-key access statistics shared by every tier.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seconds over which the recency bonus of a repeat access halves
const HEAT_RECENCY_HALF_LIFE_SECS: f64 = 3600.0;

/// Cache key - a content identifier (CID) or any other opaque non-empty string
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Create a new cache key, rejecting empty identifiers
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidArgument("cache key must not be empty".into()));
        }
        Ok(Self(Arc::from(key)))
    }

    /// Get the key as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0.to_string()
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", &*self.0)
    }
}

/// Physical cache tier holding a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process ARC cache
    Memory,
    /// Local disk cache
    Disk,
}

impl CacheTier {
    /// Tier label used in metadata and replication views
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Disk => "disk",
        }
    }

    /// Both physical tiers, fastest first
    pub fn all() -> [CacheTier; 2] {
        [CacheTier::Memory, CacheTier::Disk]
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(CacheTier::Memory),
            "disk" => Ok(CacheTier::Disk),
            other => Err(Error::InvalidArgument(format!("unknown cache tier: {other}"))),
        }
    }
}

/// Per-key access statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessStats {
    /// Number of successful reads
    pub access_count: u64,
    /// Reads served by the memory tier
    pub memory_hits: u64,
    /// Reads served by the disk tier
    pub disk_hits: u64,
    /// Access count plus a recency bonus in (0, 1]
    pub heat_score: f64,
    /// First successful read
    pub first_access: Option<DateTime<Utc>>,
    /// Most recent successful read
    pub last_access: Option<DateTime<Utc>>,
}

impl AccessStats {
    /// Record a read served by `tier` at `now`
    ///
    /// The heat score is `access_count + bonus`, where the bonus decays with
    /// the gap since the previous read. Since the bonus never exceeds 1 the
    /// score can only grow as the access count grows.
    pub fn record(&mut self, tier: CacheTier, now: DateTime<Utc>) {
        let bonus = match self.last_access {
            Some(prev) => {
                let gap_secs = (now - prev).num_milliseconds().max(0) as f64 / 1000.0;
                1.0 / (1.0 + gap_secs / HEAT_RECENCY_HALF_LIFE_SECS)
            }
            None => 1.0,
        };

        self.access_count += 1;
        match tier {
            CacheTier::Memory => self.memory_hits += 1,
            CacheTier::Disk => self.disk_hits += 1,
        }
        self.heat_score = self.access_count as f64 + bonus;
        self.first_access.get_or_insert(now);
        self.last_access = Some(now);
    }
}

/// Fast non-cryptographic content hash (FxHash algorithm)
///
/// Stored in the disk index to detect torn or tampered data files.
pub fn content_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cache_key_creation() {
        let key = CacheKey::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        assert_eq!(key.as_str(), "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(CacheKey::new(""), Err(Error::InvalidArgument(_))));
        assert!(CacheKey::try_from("").is_err());
    }

    #[test]
    fn test_cache_key_serde() {
        let key = CacheKey::new("bafy-key").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"bafy-key\"");
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        let empty: std::result::Result<CacheKey, _> = serde_json::from_str("\"\"");
        assert!(empty.is_err());
    }

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("memory".parse::<CacheTier>().unwrap(), CacheTier::Memory);
        assert_eq!("disk".parse::<CacheTier>().unwrap(), CacheTier::Disk);
        assert!("ipfs".parse::<CacheTier>().is_err());
        assert_eq!(format!("{}", CacheTier::Disk), "disk");
    }

    #[test]
    fn test_access_stats_tracking() {
        let mut stats = AccessStats::default();
        let t0 = Utc::now();

        stats.record(CacheTier::Disk, t0);
        stats.record(CacheTier::Memory, t0 + Duration::seconds(1));

        assert_eq!(stats.access_count, 2);
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.first_access, Some(t0));
        assert_eq!(stats.last_access, Some(t0 + Duration::seconds(1)));
    }

    #[test]
    fn test_heat_score_monotonic_in_access_count() {
        let mut stats = AccessStats::default();
        let mut now = Utc::now();
        let mut previous = 0.0;

        for gap in [0, 10, 86_400, 1, 7 * 86_400] {
            now = now + Duration::seconds(gap);
            stats.record(CacheTier::Memory, now);
            assert!(stats.heat_score >= previous);
            previous = stats.heat_score;
        }
    }

    #[test]
    fn test_heat_score_favours_recent_reads() {
        let t0 = Utc::now();

        let mut quick = AccessStats::default();
        quick.record(CacheTier::Memory, t0);
        quick.record(CacheTier::Memory, t0 + Duration::seconds(1));

        let mut slow = AccessStats::default();
        slow.record(CacheTier::Memory, t0);
        slow.record(CacheTier::Memory, t0 + Duration::days(2));

        assert!(quick.heat_score > slow.heat_score);
    }

    #[test]
    fn test_content_hash_detects_change() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"hellp"));
    }
}
