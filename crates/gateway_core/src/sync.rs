//! Synced-value assertions.
//!
//! Values that feed decisions every client must agree on (positions,
//! facings, ids handed to the engine) are passed through
//! [`SyncChecker::assert_synced`]. With checking enabled each value is
//! folded into a running checksum that hosts compare across clients.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Running checksum of asserted values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncChecker {
    enabled: bool,
    checksum: u64,
    count: u64,
}

impl SyncChecker {
    /// Create a checker.
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            checksum: 0,
            count: 0,
        }
    }

    /// Fold a value into the checksum.
    pub fn assert_synced<T: Hash + ?Sized>(&mut self, what: &'static str, value: &T) {
        if !self.enabled {
            return;
        }
        let mut hasher = DefaultHasher::new();
        self.checksum.hash(&mut hasher);
        what.hash(&mut hasher);
        value.hash(&mut hasher);
        self.checksum = hasher.finish();
        self.count += 1;
        tracing::trace!(what, checksum = self.checksum, "synced assertion");
    }

    /// Whether assertions are recorded.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current checksum.
    #[must_use]
    pub const fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Number of folded assertions.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_sequence_same_checksum() {
        let mut a = SyncChecker::new(true);
        let mut b = SyncChecker::new(true);
        for value in [1u32, 2, 3] {
            a.assert_synced("v", &value);
            b.assert_synced("v", &value);
        }
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.count(), 3);
    }

    #[test]
    fn test_order_matters() {
        let mut a = SyncChecker::new(true);
        let mut b = SyncChecker::new(true);
        a.assert_synced("v", &1u32);
        a.assert_synced("v", &2u32);
        b.assert_synced("v", &2u32);
        b.assert_synced("v", &1u32);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_disabled_is_inert() {
        let mut checker = SyncChecker::new(false);
        checker.assert_synced("v", &7u32);
        assert_eq!(checker.checksum(), 0);
        assert_eq!(checker.count(), 0);
    }
}
