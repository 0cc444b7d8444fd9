//! Reentrancy guard.
//!
//! Script handlers may call back into the gateway from inside an engine
//! callin (for example creating a unit from a `unit_created` handler). Each
//! such category has a depth counter; entering past the configured maximum
//! is a fatal error for the calling script.
//!
//! The counters live behind an `Rc` so a [`GuardToken`] can outlive the
//! mutable borrow of the gateway that created it and still unwind the
//! counter when it is dropped, whichever way the guarded region exits.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Verb categories that can recurse through engine callins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecursionCategory {
    /// Unit creation.
    CreateUnit,
    /// Unit destruction.
    DestroyUnit,
    /// Unit team transfer.
    TransferUnit,
    /// Feature creation.
    CreateFeature,
    /// Feature destruction.
    DestroyFeature,
    /// Order dispatch.
    GiveOrder,
}

impl RecursionCategory {
    /// All categories, in counter order.
    pub const ALL: [Self; 6] = [
        Self::CreateUnit,
        Self::DestroyUnit,
        Self::TransferUnit,
        Self::CreateFeature,
        Self::DestroyFeature,
        Self::GiveOrder,
    ];

    const fn index(self) -> usize {
        match self {
            Self::CreateUnit => 0,
            Self::DestroyUnit => 1,
            Self::TransferUnit => 2,
            Self::CreateFeature => 3,
            Self::DestroyFeature => 4,
            Self::GiveOrder => 5,
        }
    }
}

/// Per-category depth counters.
pub struct RecursionGuard {
    counters: Rc<[Cell<u32>; 6]>,
    max_depth: u32,
}

impl RecursionGuard {
    /// Create a guard with all counters at zero.
    #[must_use]
    pub fn new(max_depth: u32) -> Self {
        Self {
            counters: Rc::new(Default::default()),
            max_depth,
        }
    }

    /// Configured maximum depth.
    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Current depth of a category.
    #[must_use]
    pub fn depth(&self, category: RecursionCategory) -> u32 {
        self.counters[category.index()].get()
    }

    /// Fail if the category is already at its maximum depth, without entering.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RecursionLimitExceeded`] at the limit.
    pub fn check(&self, verb: &'static str, category: RecursionCategory) -> Result<()> {
        if self.depth(category) >= self.max_depth {
            tracing::warn!(verb, ?category, max_depth = self.max_depth, "recursion limit hit");
            return Err(GatewayError::RecursionLimitExceeded {
                verb,
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    /// Enter a guarded region.
    ///
    /// The returned token decrements the counter when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RecursionLimitExceeded`] if the counter is
    /// already at the maximum; the counter is left unchanged.
    pub fn enter(&self, verb: &'static str, category: RecursionCategory) -> Result<GuardToken> {
        self.check(verb, category)?;
        let cell = &self.counters[category.index()];
        cell.set(cell.get() + 1);
        Ok(GuardToken {
            counters: Rc::clone(&self.counters),
            category,
        })
    }
}

impl fmt::Debug for RecursionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let depths: Vec<u32> = self.counters.iter().map(Cell::get).collect();
        f.debug_struct("RecursionGuard")
            .field("depths", &depths)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Proof of being inside a guarded region.
#[must_use = "dropping the token immediately leaves the guarded region"]
#[derive(Debug)]
pub struct GuardToken {
    counters: Rc<[Cell<u32>; 6]>,
    category: RecursionCategory,
}

impl GuardToken {
    /// Category this token guards.
    #[must_use]
    pub const fn category(&self) -> RecursionCategory {
        self.category
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        let cell = &self.counters[self.category.index()];
        cell.set(cell.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_unwind() {
        let guard = RecursionGuard::new(2);
        {
            let _outer = guard.enter("CreateUnit", RecursionCategory::CreateUnit).unwrap();
            let _inner = guard.enter("CreateUnit", RecursionCategory::CreateUnit).unwrap();
            assert_eq!(guard.depth(RecursionCategory::CreateUnit), 2);
        }
        assert_eq!(guard.depth(RecursionCategory::CreateUnit), 0);
    }

    #[test]
    fn test_limit_fails_without_incrementing() {
        let guard = RecursionGuard::new(1);
        let _token = guard.enter("GiveOrderToUnit", RecursionCategory::GiveOrder).unwrap();
        let err = guard
            .enter("GiveOrderToUnit", RecursionCategory::GiveOrder)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(guard.depth(RecursionCategory::GiveOrder), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let guard = RecursionGuard::new(1);
        let _a = guard.enter("CreateUnit", RecursionCategory::CreateUnit).unwrap();
        // A different category still has room
        let _b = guard.enter("DestroyUnit", RecursionCategory::DestroyUnit).unwrap();
        assert_eq!(guard.depth(RecursionCategory::TransferUnit), 0);
    }

    #[test]
    fn test_zero_depth_rejects_everything() {
        let guard = RecursionGuard::new(0);
        for category in RecursionCategory::ALL {
            assert!(guard.enter("X", category).is_err());
        }
    }
}
