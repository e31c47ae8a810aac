//! Replication Bookkeeping
//!
//! Derives a replication view for a cached value from its metadata and the
//! physical tiers currently holding it. Nothing here talks to a remote
//! system: external tiers are known only through marker fields that callers
//! record with `update_metadata`.
//!
//! # Tier markers
//!
//! | tier           | metadata field         | present when            |
//! |----------------|------------------------|-------------------------|
//! | `memory`       | (live membership)      | value resident in ARC   |
//! | `disk`         | (live membership)      | value in the disk index |
//! | `ipfs`         | `is_pinned`            | `true`                  |
//! | `ipfs_cluster` | `ipfs_cluster_pinned`  | `true`                  |
//! | `s3`           | `s3_bucket`            | non-empty string        |
//! | `storacha`     | `storacha_car_cid`     | non-empty string        |
//! | `filecoin`     | `filecoin_deal_id`     | any non-null value      |
//! | `huggingface`  | `hf_repo`              | non-empty string        |
//!
//! Only tiers listed in the policy's `backends` count. In-flight copies are
//! listed by tier name under `pending_replication` and count toward
//! redundancy unless that tier is already replicated.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::entry::CacheTier;
use super::metadata::Metadata;
use crate::error::{Error, Result};

/// Metadata field listing tiers with a copy in flight
pub const PENDING_FIELD: &str = "pending_replication";

/// Default tiers counted toward redundancy
pub const DEFAULT_BACKENDS: [&str; 8] = [
    "memory",
    "disk",
    "ipfs",
    "ipfs_cluster",
    "s3",
    "storacha",
    "filecoin",
    "huggingface",
];

/// How a marker field signals presence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Field is boolean `true`
    Flag,
    /// Field is a non-empty string
    Text,
    /// Field is any non-null value
    Present,
}

/// Mapping from an external tier to the metadata field recording it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierMarker {
    /// Tier name as it appears in `replicated_tiers`
    pub tier: &'static str,
    /// Metadata field read for presence
    pub field: &'static str,
    /// Presence rule
    pub kind: MarkerKind,
}

impl TierMarker {
    /// Check whether `metadata` records this tier
    pub fn is_set(&self, metadata: &Metadata) -> bool {
        match (self.kind, metadata.get(self.field)) {
            (MarkerKind::Flag, Some(Value::Bool(flag))) => *flag,
            (MarkerKind::Text, Some(Value::String(text))) => !text.is_empty(),
            (MarkerKind::Present, Some(value)) => !value.is_null(),
            _ => false,
        }
    }

    /// Metadata field/value pair recording a copy at `location`
    pub fn record(&self, location: &str) -> (String, Value) {
        let value = match self.kind {
            MarkerKind::Flag => Value::Bool(true),
            MarkerKind::Text | MarkerKind::Present => Value::String(location.to_string()),
        };
        (self.field.to_string(), value)
    }

    /// Metadata field/value pair clearing this tier
    pub fn clear(&self) -> (String, Value) {
        let value = match self.kind {
            MarkerKind::Flag => Value::Bool(false),
            MarkerKind::Text | MarkerKind::Present => Value::Null,
        };
        (self.field.to_string(), value)
    }
}

/// Marker fields for every external tier
pub const TIER_MARKERS: [TierMarker; 6] = [
    TierMarker {
        tier: "ipfs",
        field: "is_pinned",
        kind: MarkerKind::Flag,
    },
    TierMarker {
        tier: "ipfs_cluster",
        field: "ipfs_cluster_pinned",
        kind: MarkerKind::Flag,
    },
    TierMarker {
        tier: "s3",
        field: "s3_bucket",
        kind: MarkerKind::Text,
    },
    TierMarker {
        tier: "storacha",
        field: "storacha_car_cid",
        kind: MarkerKind::Text,
    },
    TierMarker {
        tier: "filecoin",
        field: "filecoin_deal_id",
        kind: MarkerKind::Present,
    },
    TierMarker {
        tier: "huggingface",
        field: "hf_repo",
        kind: MarkerKind::Text,
    },
];

/// Look up the marker for an external tier name
pub fn marker_for(tier: &str) -> Option<&'static TierMarker> {
    TIER_MARKERS.iter().find(|marker| marker.tier == tier)
}

/// Replication health grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationHealth {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ReplicationHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationHealth::Poor => "poor",
            ReplicationHealth::Fair => "fair",
            ReplicationHealth::Good => "good",
            ReplicationHealth::Excellent => "excellent",
        }
    }
}

impl fmt::Display for ReplicationHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redundancy thresholds and the tiers that count toward them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationPolicy {
    /// Redundancy below this needs replication
    pub min_redundancy: u32,
    /// Redundancy at or above this is always excellent
    pub max_redundancy: u32,
    /// Redundancy below this is poor
    pub critical_redundancy: u32,
    /// Tier names that count toward redundancy
    pub backends: Vec<String>,
    /// Grade exactly `min_redundancy` as excellent rather than good
    pub promote_minimum_to_excellent: bool,
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            min_redundancy: 3,
            max_redundancy: 5,
            critical_redundancy: 1,
            backends: DEFAULT_BACKENDS.iter().map(|b| b.to_string()).collect(),
            promote_minimum_to_excellent: true,
        }
    }
}

impl ReplicationPolicy {
    /// Check threshold ordering and that at least one backend counts
    pub fn validate(&self) -> Result<()> {
        if self.critical_redundancy > self.min_redundancy {
            return Err(Error::Config(format!(
                "critical_redundancy ({}) exceeds min_redundancy ({})",
                self.critical_redundancy, self.min_redundancy
            )));
        }
        if self.min_redundancy > self.max_redundancy {
            return Err(Error::Config(format!(
                "min_redundancy ({}) exceeds max_redundancy ({})",
                self.min_redundancy, self.max_redundancy
            )));
        }
        if self.backends.is_empty() {
            return Err(Error::Config(
                "replication_policy.backends must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Grade a redundancy count
    ///
    /// With the defaults (critical 1, min 3, max 5): 0 is poor, 1-2 fair,
    /// 3 excellent (minimum rule), 4 good, 5 and up excellent.
    pub fn health(&self, redundancy: u32) -> ReplicationHealth {
        if redundancy < self.critical_redundancy {
            ReplicationHealth::Poor
        } else if redundancy < self.min_redundancy {
            ReplicationHealth::Fair
        } else if redundancy == self.min_redundancy && self.promote_minimum_to_excellent {
            ReplicationHealth::Excellent
        } else if redundancy < self.max_redundancy {
            ReplicationHealth::Good
        } else {
            ReplicationHealth::Excellent
        }
    }

    fn counts(&self, tier: &str) -> bool {
        self.backends.iter().any(|backend| backend == tier)
    }

    /// Derive the replication view of one value
    ///
    /// Pure in its inputs: the same metadata and live tiers always give the
    /// same result. Tiers are reported in `backends` order.
    pub fn derive(&self, metadata: &Metadata, live: &[CacheTier]) -> ReplicationInfo {
        let mut present: BTreeSet<&str> = live.iter().map(CacheTier::as_str).collect();
        for marker in TIER_MARKERS.iter().filter(|m| m.is_set(metadata)) {
            present.insert(marker.tier);
        }

        let mut seen = BTreeSet::new();
        let replicated_tiers: Vec<String> = self
            .backends
            .iter()
            .filter(|backend| present.contains(backend.as_str()))
            .filter(|backend| seen.insert(backend.as_str()))
            .cloned()
            .collect();

        let pending_tiers: Vec<String> = pending_list(metadata)
            .into_iter()
            .filter(|tier| self.counts(tier) && !replicated_tiers.iter().any(|r| r == tier))
            .collect();

        let current_redundancy = (replicated_tiers.len() + pending_tiers.len()) as u32;

        ReplicationInfo {
            replicated_tiers,
            pending_tiers,
            current_redundancy,
            min_redundancy: self.min_redundancy,
            max_redundancy: self.max_redundancy,
            critical_redundancy: self.critical_redundancy,
            health: self.health(current_redundancy),
            needs_replication: current_redundancy < self.min_redundancy,
        }
    }
}

/// Distinct tier names from `pending_replication`, sorted
pub fn pending_list(metadata: &Metadata) -> Vec<String> {
    let tiers: BTreeSet<String> = metadata
        .get(PENDING_FIELD)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|tier| !tier.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    tiers.into_iter().collect()
}

/// Derived replication view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationInfo {
    pub replicated_tiers: Vec<String>,
    pub pending_tiers: Vec<String>,
    pub current_redundancy: u32,
    pub min_redundancy: u32,
    pub max_redundancy: u32,
    pub critical_redundancy: u32,
    pub health: ReplicationHealth,
    pub needs_replication: bool,
}

impl ReplicationInfo {
    /// Render as the JSON object injected under `replication`
    pub fn to_value(&self) -> Value {
        json!({
            "replicated_tiers": self.replicated_tiers,
            "pending_tiers": self.pending_tiers,
            "current_redundancy": self.current_redundancy,
            "min_redundancy": self.min_redundancy,
            "max_redundancy": self.max_redundancy,
            "critical_redundancy": self.critical_redundancy,
            "health": self.health.as_str(),
            "needs_replication": self.needs_replication,
        })
    }
}

/// Count of entries per health grade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthHistogram {
    pub poor: u64,
    pub fair: u64,
    pub good: u64,
    pub excellent: u64,
    /// Entries with `needs_replication` set
    pub needs_replication: u64,
}

impl HealthHistogram {
    pub fn record(&mut self, info: &ReplicationInfo) {
        match info.health {
            ReplicationHealth::Poor => self.poor += 1,
            ReplicationHealth::Fair => self.fair += 1,
            ReplicationHealth::Good => self.good += 1,
            ReplicationHealth::Excellent => self.excellent += 1,
        }
        if info.needs_replication {
            self.needs_replication += 1;
        }
    }
}
