//! Static unit, feature and weapon definitions.
//!
//! Pure data deserialized from RON. Definitions are addressed by name or by
//! their 1-based position in the definition list.
//!
//! **Note:** This module contains no IO - file loading is handled by the
//! host.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::math::{fixed_num_serde, vec_fixed_num_serde, Fixed};

/// Reference to a definition as passed by scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefKey {
    /// By name.
    Name(String),
    /// By 1-based id.
    Id(u32),
}

/// Weapon definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponDef {
    /// Unique name.
    pub name: String,
    /// Seconds between shots.
    #[serde(with = "fixed_num_serde", default = "default_reload")]
    pub reload_time: Fixed,
    /// Firing range.
    #[serde(with = "fixed_num_serde", default)]
    pub range: Fixed,
    /// Accuracy error.
    #[serde(with = "fixed_num_serde", default)]
    pub accuracy: Fixed,
    /// Spray angle.
    #[serde(with = "fixed_num_serde", default)]
    pub spray_angle: Fixed,
    /// Projectile speed.
    #[serde(with = "fixed_num_serde", default)]
    pub projectile_speed: Fixed,
    /// Shots per salvo.
    #[serde(default = "default_one")]
    pub burst: i32,
    /// Seconds between shots in a salvo.
    #[serde(with = "fixed_num_serde", default)]
    pub burst_rate: Fixed,
    /// Projectiles per shot.
    #[serde(default = "default_one")]
    pub projectiles: i32,
    /// Projectile lifetime in seconds.
    #[serde(with = "fixed_num_serde", default)]
    pub ttl: Fixed,
    /// Damage per armor type.
    #[serde(with = "vec_fixed_num_serde", default)]
    pub damages: Vec<Fixed>,
    /// Area of effect radius.
    #[serde(with = "fixed_num_serde", default)]
    pub area_of_effect: Fixed,
    /// Damage falloff towards the edge of the area of effect.
    #[serde(with = "fixed_num_serde", default)]
    pub edge_effectiveness: Fixed,
}

/// Unit definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    /// Unique name.
    pub name: String,
    /// Maximum health.
    #[serde(with = "fixed_num_serde")]
    pub max_health: Fixed,
    /// Build time.
    #[serde(with = "fixed_num_serde", default = "default_cost")]
    pub build_time: Fixed,
    /// Metal cost.
    #[serde(with = "fixed_num_serde", default = "default_cost")]
    pub metal_cost: Fixed,
    /// Energy cost.
    #[serde(with = "fixed_num_serde", default = "default_cost")]
    pub energy_cost: Fixed,
    /// Metal storage contributed to the team.
    #[serde(with = "fixed_num_serde", default)]
    pub metal_storage: Fixed,
    /// Energy storage contributed to the team.
    #[serde(with = "fixed_num_serde", default)]
    pub energy_storage: Fixed,
    /// Whether the unit can move (immobile units keep no timed orders).
    #[serde(default = "default_true")]
    pub mobile: bool,
    /// Names of mounted weapons.
    #[serde(default)]
    pub weapons: Vec<String>,
    /// Weapon used for the death explosion.
    #[serde(default)]
    pub explode_as: Option<String>,
    /// Weapon used for the self-destruct explosion.
    #[serde(default)]
    pub self_destruct_as: Option<String>,
}

/// Feature definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Unique name.
    pub name: String,
    /// Maximum health.
    #[serde(with = "fixed_num_serde", default = "default_cost")]
    pub max_health: Fixed,
    /// Reclaimable metal.
    #[serde(with = "fixed_num_serde", default)]
    pub metal: Fixed,
    /// Reclaimable energy.
    #[serde(with = "fixed_num_serde", default)]
    pub energy: Fixed,
    /// Reclaim time.
    #[serde(with = "fixed_num_serde", default = "default_cost")]
    pub reclaim_time: Fixed,
}

fn default_reload() -> Fixed {
    Fixed::from_num(1)
}

fn default_cost() -> Fixed {
    Fixed::from_num(1)
}

const fn default_one() -> i32 {
    1
}

const fn default_true() -> bool {
    true
}

/// All definitions available to a game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefRegistry {
    /// Unit definitions.
    #[serde(default)]
    pub units: Vec<UnitDef>,
    /// Feature definitions.
    #[serde(default)]
    pub features: Vec<FeatureDef>,
    /// Weapon definitions.
    #[serde(default)]
    pub weapons: Vec<WeaponDef>,
}

impl DefRegistry {
    /// Parse definitions from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedArgument`] if the text is invalid
    /// or references unknown weapons.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let defs: Self = ron::from_str(text)
            .map_err(|e| GatewayError::malformed("DefRegistry", format!("invalid defs: {e}")))?;
        let problems = defs.validate();
        if let Some(first) = problems.first() {
            return Err(GatewayError::malformed("DefRegistry", first.clone()));
        }
        Ok(defs)
    }

    /// Look up a unit definition, returning its id.
    #[must_use]
    pub fn unit(&self, key: &DefKey) -> Option<(u32, &UnitDef)> {
        lookup(&self.units, key, |def| &def.name)
    }

    /// Look up a feature definition, returning its id.
    #[must_use]
    pub fn feature(&self, key: &DefKey) -> Option<(u32, &FeatureDef)> {
        lookup(&self.features, key, |def| &def.name)
    }

    /// Look up a weapon definition, returning its id.
    #[must_use]
    pub fn weapon(&self, key: &DefKey) -> Option<(u32, &WeaponDef)> {
        lookup(&self.weapons, key, |def| &def.name)
    }

    /// Check cross references, returning a description of each problem.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for unit in &self.units {
            let referenced = unit
                .weapons
                .iter()
                .chain(unit.explode_as.iter())
                .chain(unit.self_destruct_as.iter());
            for weapon in referenced {
                if self.weapon(&DefKey::Name(weapon.clone())).is_none() {
                    errors.push(format!(
                        "unit '{}' references unknown weapon '{}'",
                        unit.name, weapon
                    ));
                }
            }
        }
        errors
    }
}

fn lookup<'a, T>(
    defs: &'a [T],
    key: &DefKey,
    name: impl Fn(&T) -> &String,
) -> Option<(u32, &'a T)> {
    match key {
        DefKey::Name(wanted) => defs
            .iter()
            .enumerate()
            .find(|(_, def)| name(def) == wanted)
            .and_then(|(index, def)| Some((u32::try_from(index + 1).ok()?, def))),
        DefKey::Id(id) => {
            let index = usize::try_from(id.checked_sub(1)?).ok()?;
            defs.get(index).map(|def| (*id, def))
        }
    }
}
