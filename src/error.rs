//! Error types for the tiered cache

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache
///
/// Cache misses are not errors: lookups return `Ok(None)` for absent keys.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Key required by the operation is not cached
    #[error("Cache key not found: {0}")]
    NotFound(String),

    /// A single value is larger than the tier's absolute capacity
    #[error("Value of {size} bytes exceeds {tier} capacity of {capacity} bytes")]
    CapacityExceeded {
        tier: &'static str,
        size: u64,
        capacity: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error on a specific cache path
    #[error("I/O error on {}: {source}", path.display())]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed key, filter, or argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index or metadata (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not available with the current configuration
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Attach a path to an I/O error
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoPath {
            path: path.into(),
            source,
        }
    }

    /// True for disk-level failures, as opposed to caller mistakes
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::IoPath { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = Error::CapacityExceeded {
            tier: "memory",
            size: 2048,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Value of 2048 bytes exceeds memory capacity of 1024 bytes"
        );
    }

    #[test]
    fn test_io_classification() {
        let err = Error::io_at(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_io());
        assert!(err.to_string().contains("/tmp/x"));
        assert!(!Error::NotFound("k".into()).is_io());
    }
}
