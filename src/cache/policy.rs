//! Cache Promotion Policy
//!
//! Decides which values may live in the memory tier and when a disk hit is
//! copied up into it.

/// Default largest value admitted to memory (50MB)
pub const DEFAULT_MAX_ITEM_SIZE: u64 = 50 * 1024 * 1024;

/// Default reads required before a disk-only value is promoted
pub const DEFAULT_MIN_ACCESS_COUNT: u64 = 1;

/// Promotion policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// Values larger than this never enter the memory tier
    pub max_item_size: u64,
    /// Reads (including the current one) a key needs before a disk hit
    /// is promoted
    pub min_access_count: u64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            min_access_count: DEFAULT_MIN_ACCESS_COUNT,
        }
    }
}

impl PromotionPolicy {
    /// Promote on the first read of any value that fits in memory
    pub fn eager(max_item_size: u64) -> Self {
        Self {
            max_item_size,
            min_access_count: 1,
        }
    }

    /// Check whether a value of `size` bytes may ever be held in memory
    #[inline]
    pub fn admits(&self, size: u64) -> bool {
        size <= self.max_item_size
    }

    /// Check whether a disk hit should be copied into memory
    ///
    /// `access_count` counts successful reads of the key, including the read
    /// being served. With the default threshold of 1 every read of an
    /// admissible value promotes it.
    pub fn should_promote(&self, size: u64, access_count: u64) -> bool {
        self.admits(size) && access_count >= self.min_access_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = PromotionPolicy::default();
        assert_eq!(policy.max_item_size, 50 * 1024 * 1024);
        assert_eq!(policy.min_access_count, 1);
    }

    #[test]
    fn test_admission_boundary() {
        let policy = PromotionPolicy::eager(100);
        assert!(policy.admits(0));
        assert!(policy.admits(100));
        assert!(!policy.admits(101));
    }

    #[test]
    fn test_promotion_threshold() {
        let policy = PromotionPolicy {
            max_item_size: 100,
            min_access_count: 3,
        };
        assert!(!policy.should_promote(10, 1));
        assert!(!policy.should_promote(10, 2));
        assert!(policy.should_promote(10, 3));
        assert!(!policy.should_promote(101, 10));
    }

    #[test]
    fn test_eager_promotes_first_read() {
        let policy = PromotionPolicy::eager(1024);
        assert!(policy.should_promote(1024, 1));
    }
}
