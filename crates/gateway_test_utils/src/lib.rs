//! # Gateway Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Fixture worlds and script value helpers
//! - Recording engine services and callins
//! - Determinism harness for script call sequences
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;
pub mod recording;

/// Re-export proptest for convenience.
pub use proptest;
