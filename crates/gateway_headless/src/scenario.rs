//! Scenario loading and world setup.
//!
//! Scenarios define the initial world for a headless session: the height
//! field, ally-teams, teams with their starting economy, players, the
//! definitions in play and the units and features placed before the first
//! script call.

use std::path::Path;

use gateway_core::prelude::*;
use std::result::Result;
use gateway_core::gateway::{FeatureSpawn, UnitSpawn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// The scenario describes an impossible world.
    #[error("Invalid scenario: {0}")]
    Invalid(String),
    /// A placement was rejected by the gateway.
    #[error("Failed to place {what}: {reason}")]
    Placement {
        /// What was being placed.
        what: String,
        /// Why it failed.
        reason: String,
    },
}

/// Height field dimensions in squares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSetup {
    /// Squares along x.
    pub width: u32,
    /// Squares along z.
    pub depth: u32,
    /// Initial flat height.
    #[serde(default)]
    pub height: i32,
}

impl Default for MapSetup {
    fn default() -> Self {
        Self {
            width: 64,
            depth: 64,
            height: 0,
        }
    }
}

/// One team and its starting economy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSetup {
    /// Ally-team the team belongs to.
    pub ally_team: u32,
    /// Starting metal.
    #[serde(default)]
    pub metal: i32,
    /// Starting energy.
    #[serde(default)]
    pub energy: i32,
    /// Metal storage.
    #[serde(default = "default_storage")]
    pub metal_storage: i32,
    /// Energy storage.
    #[serde(default = "default_storage")]
    pub energy_storage: i32,
    /// Neutral team.
    #[serde(default)]
    pub gaia: bool,
}

fn default_storage() -> i32 {
    1000
}

/// One player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetup {
    /// Display name.
    pub name: String,
    /// Team the player controls.
    pub team: u32,
    /// Recorded in the demo being played back.
    #[serde(default)]
    pub from_demo: bool,
}

/// A unit placed at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPlacement {
    /// Unit definition name.
    pub def: String,
    /// Owning team.
    pub team: u32,
    /// X position in world units.
    pub x: i32,
    /// Z position in world units.
    pub z: i32,
}

/// A feature placed at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePlacement {
    /// Feature definition name.
    pub def: String,
    /// Owning team; none for map features.
    #[serde(default)]
    pub team: Option<u32>,
    /// X position in world units.
    pub x: i32,
    /// Z position in world units.
    pub z: i32,
}

/// A complete scenario configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Height field.
    #[serde(default)]
    pub map: MapSetup,
    /// Number of ally-teams.
    pub ally_teams: u32,
    /// Teams, in id order.
    pub teams: Vec<TeamSetup>,
    /// Players, in id order.
    #[serde(default)]
    pub players: Vec<PlayerSetup>,
    /// Definitions in play.
    #[serde(default)]
    pub defs: DefRegistry,
    /// Units placed at start.
    #[serde(default)]
    pub units: Vec<UnitPlacement>,
    /// Features placed at start.
    #[serde(default)]
    pub features: Vec<FeaturePlacement>,
}

impl Scenario {
    /// Load a scenario from a RON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or not valid RON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid RON.
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Build a gateway over the scenario's world.
    ///
    /// Units and features are placed with full control, in listed order,
    /// so their ids are stable across runs.
    ///
    /// # Errors
    ///
    /// Returns an error for broken definitions, teams on unknown
    /// ally-teams, players on unknown teams and rejected placements.
    pub fn build_gateway(&self, config: GatewayConfig) -> Result<SyncedGateway, ScenarioError> {
        if let Some(problem) = self.defs.validate().into_iter().next() {
            return Err(ScenarioError::Invalid(problem));
        }

        let mut registry = EntityRegistry::new(self.ally_teams as usize);
        for (id, team) in self.teams.iter().enumerate() {
            let ledger = TeamLedger::new(
                ResourcePack::new(Fixed::from_num(team.metal), Fixed::from_num(team.energy)),
                ResourcePack::new(
                    Fixed::from_num(team.metal_storage),
                    Fixed::from_num(team.energy_storage),
                ),
            );
            if registry.add_team(team.ally_team, ledger, team.gaia).is_none() {
                return Err(ScenarioError::Invalid(format!(
                    "team {id} is on unknown ally-team {}",
                    team.ally_team
                )));
            }
        }
        for player in &self.players {
            if registry
                .add_player(&player.name, player.team, player.from_demo)
                .is_none()
            {
                return Err(ScenarioError::Invalid(format!(
                    "player '{}' is on unknown team {}",
                    player.name, player.team
                )));
            }
        }

        let terrain = HeightMap::flat(
            self.map.width,
            self.map.depth,
            config.square_size,
            Fixed::from_num(self.map.height),
        );
        let mut gateway = SyncedGateway::new(config, self.defs.clone(), registry, terrain);
        let ctx = CallerContext::full();

        for placement in &self.units {
            let spawn = UnitSpawn {
                team: Some(placement.team),
                ..UnitSpawn::new(
                    DefKey::Name(placement.def.clone()),
                    ground(&gateway, placement.x, placement.z),
                )
            };
            match gateway.create_unit(&ctx, spawn) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(placement_error(&placement.def, "no unit id available"));
                }
                Err(err) => return Err(placement_error(&placement.def, err)),
            }
        }
        for placement in &self.features {
            let spawn = FeatureSpawn {
                team: Some(placement.team.map_or(-1, i64::from)),
                ..FeatureSpawn::new(
                    DefKey::Name(placement.def.clone()),
                    ground(&gateway, placement.x, placement.z),
                )
            };
            match gateway.create_feature(&ctx, spawn) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(placement_error(&placement.def, "unknown definition or team"));
                }
                Err(err) => return Err(placement_error(&placement.def, err)),
            }
        }

        tracing::info!(
            scenario = %self.name,
            teams = self.teams.len(),
            units = self.units.len(),
            features = self.features.len(),
            "scenario loaded"
        );
        Ok(gateway)
    }
}

fn ground(gateway: &SyncedGateway, x: i32, z: i32) -> Vec3Fixed {
    let (x, z) = (Fixed::from_num(x), Fixed::from_num(z));
    Vec3Fixed::new(x, gateway.terrain().ground_height(x, z), z)
}

fn placement_error(def: &str, reason: impl ToString) -> ScenarioError {
    ScenarioError::Placement {
        what: def.to_string(),
        reason: reason.to_string(),
    }
}
