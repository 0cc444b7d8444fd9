//! Gateway configuration.
//!
//! Loaded from RON by the host. Every field has a default so partial
//! configuration files are accepted.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::math::{fixed_num_serde, Fixed};

/// Tunables shared by all gateway verbs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum nesting depth for each guarded verb category.
    pub max_recursion_depth: u32,
    /// Per-component velocity clamp for units, features and projectiles.
    #[serde(with = "fixed_num_serde")]
    pub max_unit_speed: Fixed,
    /// Per-component clamp for impulses.
    #[serde(with = "fixed_num_serde")]
    pub max_impulse: Fixed,
    /// Frames before a destroyed unit's or feature's id can be reissued.
    pub id_reclaim_delay: u32,
    /// Simulation frames per second.
    pub game_speed: u32,
    /// World units per height-map square.
    pub square_size: u32,
    /// Maximum live units per team.
    pub max_units_per_team: u32,
    /// Fold synced assertions into the running checksum.
    pub sync_checks: bool,
    /// Session is a host-side demo playback.
    pub host_demo: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 16,
            max_unit_speed: Fixed::from_num(1000),
            max_impulse: Fixed::from_num(10_000),
            id_reclaim_delay: 20,
            game_speed: 30,
            square_size: 8,
            max_units_per_team: 2000,
            sync_checks: cfg!(debug_assertions),
            host_demo: false,
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedArgument`] if the text is not valid RON.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text)
            .map_err(|e| GatewayError::malformed("GatewayConfig", format!("invalid config: {e}")))
    }
}
