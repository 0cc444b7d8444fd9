//! Projectile verbs. Projectiles are controlled through their owning
//! ally-team.

use crate::auth::CallerContext;
use crate::components::{Projectile, ProjectileId, TeamId, UnitId};
use crate::defs::DefKey;
use crate::error::Result;
use crate::math::{Fixed, Vec3Fixed};
use crate::services::EntityRef;

use super::SyncedGateway;

/// Parameters of `SpawnProjectile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectileSpawn {
    /// Weapon definition the projectile belongs to.
    pub weapon: DefKey,
    /// Start position.
    pub position: Vec3Fixed,
    /// Start velocity, clamped to the maximum unit speed.
    pub velocity: Vec3Fixed,
    /// Firing unit; ignored unless live.
    pub owner: Option<UnitId>,
    /// Owning team. Defaults to the owner's team, then the caller's team,
    /// then the neutral team.
    pub team: Option<TeamId>,
    /// Lifetime in frames; defaults to the weapon's.
    pub ttl: Option<i32>,
    /// Per-frame gravity; defaults to none.
    pub gravity: Option<Fixed>,
}

impl ProjectileSpawn {
    /// Spawn a projectile of `weapon` at rest at `position`.
    #[must_use]
    pub const fn new(weapon: DefKey, position: Vec3Fixed) -> Self {
        Self {
            weapon,
            position,
            velocity: Vec3Fixed::ZERO,
            owner: None,
            team: None,
            ttl: None,
            gravity: None,
        }
    }
}

impl SyncedGateway {
    /// Spawn a projectile.
    ///
    /// Returns `None` for an unknown weapon or when no valid owning team
    /// can be resolved.
    ///
    /// # Errors
    ///
    /// Silent if the caller does not control the owning team.
    pub fn spawn_projectile(
        &mut self,
        ctx: &CallerContext,
        spawn: ProjectileSpawn,
    ) -> Result<Option<ProjectileId>> {
        const VERB: &str = "SpawnProjectile";
        let Some((weapon_def, def)) = self.defs.weapon(&spawn.weapon) else {
            tracing::debug!(weapon = ?spawn.weapon, "unknown weapon definition");
            return Ok(None);
        };
        let default_ttl = def
            .ttl
            .saturating_mul(Fixed::from_num(self.config.game_speed))
            .saturating_to_num::<i32>()
            .max(1);

        let owner = spawn.owner.and_then(|id| self.registry.unit(id));
        let team = spawn
            .team
            .or_else(|| owner.map(|unit| unit.team))
            .or_else(|| ctx.ctrl_team())
            .or_else(|| self.registry.teams.iter().find(|team| team.gaia).map(|team| team.id));
        let Some(team) = team.filter(|&team| self.registry.team(team).is_some()) else {
            tracing::debug!(team = ?spawn.team, "no owning team for projectile");
            return Ok(None);
        };
        ctx.require_team(VERB, team)?;
        let owner = owner.map(|unit| unit.id);

        let Some(id) = self.registry.projectile_ids.allocate(None) else {
            return Ok(None);
        };
        let projectile = Projectile {
            id,
            weapon_def,
            owner,
            team: Some(team),
            ally_team: self.registry.ally_team_of(team),
            position: spawn.position,
            velocity: spawn.velocity.clamp_components(self.config.max_unit_speed),
            gravity: spawn.gravity.unwrap_or(Fixed::ZERO),
            ttl: spawn.ttl.unwrap_or(default_ttl),
        };
        self.sync.assert_synced("SpawnProjectile", &projectile);
        self.registry.projectiles.insert(id, projectile);
        Ok(Some(id))
    }

    /// Remove a projectile without detonating it.
    ///
    /// # Errors
    ///
    /// Silent for an unknown or uncontrolled projectile.
    pub fn delete_projectile(&mut self, ctx: &CallerContext, id: ProjectileId) -> Result<()> {
        self.controlled_projectile_mut(ctx, "DeleteProjectile", id)?;
        self.registry.projectiles.remove(&id);
        self.registry.projectile_ids.release(id, None);
        Ok(())
    }

    /// Teleport a projectile.
    ///
    /// # Errors
    ///
    /// Silent for an unknown or uncontrolled projectile.
    pub fn set_projectile_position(
        &mut self,
        ctx: &CallerContext,
        id: ProjectileId,
        position: Vec3Fixed,
    ) -> Result<()> {
        let projectile = self.controlled_projectile_mut(ctx, "SetProjectilePosition", id)?;
        projectile.position = position;
        self.services.move_entity(EntityRef::Projectile(id), position);
        Ok(())
    }

    /// Set a projectile's velocity, clamped per component.
    ///
    /// # Errors
    ///
    /// Silent for an unknown or uncontrolled projectile.
    pub fn set_projectile_velocity(
        &mut self,
        ctx: &CallerContext,
        id: ProjectileId,
        velocity: Vec3Fixed,
    ) -> Result<()> {
        let limit = self.config.max_unit_speed;
        let projectile = self.controlled_projectile_mut(ctx, "SetProjectileVelocity", id)?;
        projectile.velocity = velocity.clamp_components(limit);
        Ok(())
    }

    /// Set a projectile's remaining lifetime in frames.
    ///
    /// # Errors
    ///
    /// Silent for an unknown or uncontrolled projectile.
    pub fn set_projectile_time_to_live(
        &mut self,
        ctx: &CallerContext,
        id: ProjectileId,
        ttl: i32,
    ) -> Result<()> {
        self.controlled_projectile_mut(ctx, "SetProjectileTimeToLive", id)?.ttl = ttl;
        Ok(())
    }

    /// Set a projectile's per-frame gravity.
    ///
    /// # Errors
    ///
    /// Silent for an unknown or uncontrolled projectile.
    pub fn set_projectile_gravity(
        &mut self,
        ctx: &CallerContext,
        id: ProjectileId,
        gravity: Fixed,
    ) -> Result<()> {
        self.controlled_projectile_mut(ctx, "SetProjectileGravity", id)?.gravity = gravity;
        Ok(())
    }
}
