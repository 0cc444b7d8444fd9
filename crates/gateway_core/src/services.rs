//! Engine collaborators.
//!
//! [`EngineServices`] are the engine subsystems the gateway pushes changes
//! into (movement, line of sight, effects, pathfinding). [`SyncedCallins`]
//! are the script-side handlers the gateway notifies; they receive the
//! gateway mutably and may call back into it.

use crate::components::{AllyTeamId, Command, FeatureId, ProjectileId, TeamId, UnitId};
use crate::gateway::SyncedGateway;
use crate::ledger::ResourceKind;
use crate::los::LosBits;
use crate::math::{Fixed, Vec3Fixed};
use crate::terrain::HeightRect;

/// Kind of entity a movement request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A unit.
    Unit(UnitId),
    /// A feature.
    Feature(FeatureId),
    /// A projectile.
    Projectile(ProjectileId),
}

/// Engine subsystems the gateway drives.
///
/// Every method has a no-op default so hosts implement only what they need.
pub trait EngineServices {
    /// An entity was teleported.
    fn move_entity(&mut self, _entity: EntityRef, _position: Vec3Fixed) {}

    /// Recompute a unit's visibility for an ally-team.
    ///
    /// Returns the freshly computed status; the gateway applies it through
    /// the unit's mask.
    fn recompute_los(&mut self, _unit: UnitId, _ally_team: AllyTeamId) -> LosBits {
        LosBits::EMPTY
    }

    /// Spawn a purely visual effect.
    fn spawn_visual_effect(&mut self, _name: &str, _position: Vec3Fixed) {}

    /// The height field changed inside `rect`.
    fn terrain_changed(&mut self, _rect: HeightRect) {}
}

/// Services that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullServices;

impl EngineServices for NullServices {}

/// Script handlers notified of gateway-driven events.
///
/// Handlers run inside the guarded region of the verb that triggered them
/// and may re-enter the gateway.
pub trait SyncedCallins {
    /// A unit was created.
    fn unit_created(&self, _gateway: &mut SyncedGateway, _unit: UnitId, _builder: Option<UnitId>) {}

    /// A unit is being destroyed.
    fn unit_destroyed(&self, _gateway: &mut SyncedGateway, _unit: UnitId, _attacker: Option<UnitId>) {}

    /// A unit changed team; `given` is false for captures.
    fn unit_given(
        &self,
        _gateway: &mut SyncedGateway,
        _unit: UnitId,
        _old_team: TeamId,
        _given: bool,
    ) {
    }

    /// A feature was created.
    fn feature_created(&self, _gateway: &mut SyncedGateway, _feature: FeatureId) {}

    /// A feature is being destroyed.
    fn feature_destroyed(&self, _gateway: &mut SyncedGateway, _feature: FeatureId) {}

    /// A command was appended to a unit's queue.
    fn unit_command(&self, _gateway: &mut SyncedGateway, _unit: UnitId, _command: &Command) {}

    /// Policy hook for resource sharing between teams.
    fn allow_resource_transfer(
        &self,
        _from: TeamId,
        _to: TeamId,
        _kind: ResourceKind,
        _amount: Fixed,
    ) -> bool {
        true
    }
}

/// Callins that observe nothing and allow everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallins;

impl SyncedCallins for NoCallins {}
