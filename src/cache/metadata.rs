//! Entry Metadata
//!
//! Open string-keyed metadata attached to every cached value, plus the
//! equality filters used by `query_metadata`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Error, Result};

/// Metadata mapping (ordered, so rendered views are deterministic)
pub type Metadata = BTreeMap<String, Value>;

/// Field holding the tier label the value was last placed in
pub const STORAGE_TIER_FIELD: &str = "storage_tier";

/// Field holding the value size in bytes
pub const SIZE_FIELD: &str = "size_bytes";

/// Field holding the RFC 3339 timestamp of the first `put`
pub const ADDED_AT_FIELD: &str = "added_at";

/// Derived field injected into metadata views; never stored
pub const REPLICATION_FIELD: &str = "replication";

/// Merge `fields` into `target`: new keys are added, existing keys are
/// overwritten, unspecified keys are kept.
pub fn merge(target: &mut Metadata, fields: Metadata) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

/// Look up a dotted path (`"a.b.c"`) through nested JSON objects
pub fn lookup<'a>(metadata: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = metadata.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality predicate over a (possibly nested) metadata field
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    path: String,
    expected: Value,
}

impl MetadataFilter {
    /// Create a filter matching entries whose `path` equals `expected`
    pub fn equals(path: impl Into<String>, expected: impl Into<Value>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            expected: expected.into(),
        })
    }

    /// Dotted field path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expected value
    pub fn expected(&self) -> &Value {
        &self.expected
    }

    /// Check whether `metadata` satisfies this filter
    pub fn matches(&self, metadata: &Metadata) -> bool {
        lookup(metadata, &self.path) == Some(&self.expected)
    }
}

/// Parses `path=value`; the value is read as JSON when it parses as JSON,
/// otherwise as a plain string (`storage_tier=memory`).
impl FromStr for MetadataFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (path, raw) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("filter '{s}' is missing '='")))?;
        let path = path.trim();
        let raw = raw.trim();
        let expected =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Self::equals(path, expected)
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.path, self.expected)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("filter path must not be empty".into()));
    }
    if path.split('.').any(str::is_empty) {
        return Err(Error::InvalidArgument(format!(
            "filter path '{path}' has an empty segment"
        )));
    }
    Ok(())
}

/// True when every filter matches (an empty filter list matches everything)
pub fn matches_all(metadata: &Metadata, filters: &[MetadataFilter]) -> bool {
    filters.iter().all(|filter| filter.matches(metadata))
}
