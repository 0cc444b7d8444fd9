//! Per-ally-team line-of-sight status of a unit.
//!
//! The status and the override mask are kept as two separate bitsets.
//! Automatic recomputation by the engine only writes the bits that are not
//! masked; explicit script writes go through unconditionally.

use serde::{Deserialize, Serialize};

/// A set of visibility bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LosBits(u8);

impl LosBits {
    /// Currently in line of sight.
    pub const IN_LOS: Self = Self(1);
    /// Currently in radar.
    pub const IN_RADAR: Self = Self(2);
    /// Has been in line of sight before.
    pub const PREV_LOS: Self = Self(4);
    /// Continuously in radar since it was last seen.
    pub const CONT_RADAR: Self = Self(8);
    /// No bits.
    pub const EMPTY: Self = Self(0);
    /// All four bits.
    pub const ALL: Self = Self(0x0F);

    /// Build from raw bits; anything above the low nibble is dropped.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear the bits of `other`.
    #[must_use]
    pub const fn with(self, other: Self, set: bool) -> Self {
        if set {
            Self(self.0 | other.0)
        } else {
            Self(self.0 & !other.0)
        }
    }

    /// Look up a bit by its script name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "los" => Some(Self::IN_LOS),
            "radar" => Some(Self::IN_RADAR),
            "prevLos" => Some(Self::PREV_LOS),
            "contRadar" => Some(Self::CONT_RADAR),
            _ => None,
        }
    }
}

/// Live status plus override mask for one ally-team's view of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LosStatus {
    /// Live status bits.
    pub status: LosBits,
    /// Bits frozen against automatic recomputation.
    pub mask: LosBits,
}

impl LosStatus {
    /// Apply an engine recomputation, leaving masked bits untouched.
    pub fn apply_computed(&mut self, computed: LosBits) {
        let mask = self.mask.bits();
        self.status = LosBits::from_bits((self.status.bits() & mask) | (computed.bits() & !mask));
    }

    /// Overwrite the live status.
    pub fn set_state(&mut self, state: LosBits) {
        self.status = state;
    }

    /// Overwrite the mask.
    pub fn set_mask(&mut self, mask: LosBits) {
        self.mask = mask;
    }

    /// Mask in the high nibble, status in the low nibble.
    #[must_use]
    pub const fn packed(self) -> u8 {
        (self.mask.bits() << 4) | self.status.bits()
    }
}
