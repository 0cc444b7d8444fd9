//! Unit verbs: lifecycle, health, physical state, weapons and visibility.
//!
//! Creation, destruction and transfer run inside their guarded region and
//! notify the callins from within it, so handlers that call back into the
//! gateway count against the recursion limit.

use std::rc::Rc;

use crate::auth::CallerContext;
use crate::components::{
    AllyTeamId, CollisionVolume, Command, DamageProfile, Facing, TeamId, Unit, UnitId, Weapon,
};
use crate::defs::{DefKey, UnitDef};
use crate::error::{GatewayError, Result};
use crate::guard::RecursionCategory;
use crate::ledger::ResourceKind;
use crate::los::LosBits;
use crate::math::{approx_eq, Fixed, Vec3Fixed};
use crate::services::EntityRef;
use crate::terrain::HeightLayer;

use super::{invalid_reference, SyncedGateway};

/// Parameters of `CreateUnit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpawn {
    /// Unit definition.
    pub def: DefKey,
    /// World position.
    pub position: Vec3Fixed,
    /// Building facing.
    pub facing: Facing,
    /// Owning team; defaults to the caller's team.
    pub team: Option<TeamId>,
    /// Spawn as an unfinished nanoframe.
    pub being_built: bool,
    /// Level the ground under immobile units.
    pub flatten_ground: bool,
    /// Requested id.
    pub unit_id: Option<UnitId>,
    /// Builder credited with the unit.
    pub builder: Option<UnitId>,
}

impl UnitSpawn {
    /// Spawn a finished unit of `def` at `position` for the caller's team.
    #[must_use]
    pub const fn new(def: DefKey, position: Vec3Fixed) -> Self {
        Self {
            def,
            position,
            facing: Facing::South,
            team: None,
            being_built: false,
            flatten_ground: true,
            unit_id: None,
            builder: None,
        }
    }
}

/// Parameters of `DestroyUnit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitDeath {
    /// Die as if self-destructed.
    pub self_destruct: bool,
    /// Vanish without an explosion.
    pub reclaimed: bool,
    /// Unit credited with the kill.
    pub attacker: Option<UnitId>,
    /// Return the id to the pool immediately.
    pub recycle_id: bool,
}

/// One field written by `SetUnitHealth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    /// Current health, capped at the maximum.
    Health(Fixed),
    /// Capture progress.
    Capture(Fixed),
    /// Paralyze damage; a negative value also lifts an existing stun.
    Paralyze(Fixed),
    /// Build progress; below 1 the unit turns back into a nanoframe.
    Build(Fixed),
}

/// One field written by `SetUnitWeaponState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponStateChange {
    /// Frame at which the weapon is reloaded.
    ReloadFrame(i32),
    /// Reload time in seconds.
    ReloadTime(Fixed),
    /// Frames between aiming updates.
    ReaimTime(i32),
    /// Accuracy error.
    Accuracy(Fixed),
    /// Spray angle.
    SprayAngle(Fixed),
    /// Range.
    Range(Fixed),
    /// Projectile speed.
    ProjectileSpeed(Fixed),
    /// Shots per salvo.
    Burst(i32),
    /// Seconds between salvo shots.
    BurstRate(Fixed),
    /// Projectiles per shot.
    Projectiles(i32),
    /// Shots left in the current salvo.
    SalvoLeft(i32),
    /// Frame of the next salvo shot.
    NextSalvo(i32),
    /// Whether the weapon is aimed.
    AimReady(bool),
    /// Pull the last aiming frame back, forcing a re-aim. Defaults to the
    /// reaim time.
    ForceAim(Option<i32>),
    /// Projectile lifetime in seconds.
    Ttl(Fixed),
}

impl WeaponStateChange {
    /// Look up a change constructor by its script key.
    ///
    /// Integer fields receive `value` truncated, boolean fields receive
    /// `value != 0`.
    #[must_use]
    pub fn from_key(key: &str, value: Fixed) -> Option<Self> {
        let int = value.saturating_to_num::<i32>();
        Some(match key {
            "reloadState" | "reloadFrame" => Self::ReloadFrame(int),
            "reloadTime" => Self::ReloadTime(value),
            "reaimTime" => Self::ReaimTime(int),
            "accuracy" => Self::Accuracy(value),
            "sprayAngle" => Self::SprayAngle(value),
            "range" => Self::Range(value),
            "projectileSpeed" => Self::ProjectileSpeed(value),
            "burst" => Self::Burst(int),
            "burstRate" => Self::BurstRate(value),
            "projectiles" => Self::Projectiles(int),
            "salvoLeft" => Self::SalvoLeft(int),
            "nextSalvo" => Self::NextSalvo(int),
            "aimReady" => Self::AimReady(value != Fixed::ZERO),
            "forceAim" => Self::ForceAim(Some(int)),
            "ttl" => Self::Ttl(value),
            _ => return None,
        })
    }

    fn apply(self, weapon: &mut Weapon, game_speed: Fixed) {
        let frames = |seconds: Fixed| seconds.saturating_mul(game_speed).saturating_to_num::<i32>();
        match self {
            Self::ReloadFrame(frame) => weapon.reload_frame = frame,
            Self::ReloadTime(seconds) => weapon.reload_time = frames(seconds).max(1),
            Self::ReaimTime(time) => weapon.reaim_time = time.max(1),
            Self::Accuracy(value) => weapon.accuracy = value,
            Self::SprayAngle(value) => weapon.spray_angle = value,
            Self::Range(value) => weapon.range = value,
            Self::ProjectileSpeed(value) => weapon.projectile_speed = value,
            Self::Burst(count) => weapon.salvo_size = count,
            Self::BurstRate(seconds) => weapon.salvo_delay = frames(seconds),
            Self::Projectiles(count) => weapon.projectiles_per_shot = count,
            Self::SalvoLeft(count) => weapon.salvo_left = count,
            Self::NextSalvo(frame) => weapon.next_salvo = frame,
            Self::AimReady(ready) => weapon.aim_ready = ready,
            Self::ForceAim(frames) => {
                let back = frames.unwrap_or(weapon.reaim_time);
                weapon.last_aimed_frame = weapon.last_aimed_frame.saturating_sub(back);
            }
            Self::Ttl(seconds) => weapon.ttl = frames(seconds),
        }
    }
}

/// Damage profile addressed by `SetUnitWeaponDamages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageTarget {
    /// Weapon by 0-based index.
    Weapon(usize),
    /// Death explosion.
    Explode,
    /// Self-destruct explosion.
    SelfDestruct,
}

/// One field written by `SetUnitWeaponDamages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageChange {
    /// Damage against an armor type; ignored past the last type.
    Armor(usize, Fixed),
    /// Paralysis frames per damage point, at least 0.
    ParalyzeDamageTime(i32),
    /// Impulse multiplier.
    ImpulseFactor(Fixed),
    /// Flat impulse.
    ImpulseBoost(Fixed),
    /// Crater multiplier.
    CraterMult(Fixed),
    /// Flat crater depth.
    CraterBoost(Fixed),
    /// Crater radius.
    CraterAreaOfEffect(Fixed),
    /// Damage radius.
    DamageAreaOfEffect(Fixed),
    /// Edge falloff, at most 1.
    EdgeEffectiveness(Fixed),
    /// Explosion propagation speed.
    ExplosionSpeed(Fixed),
}

impl DamageChange {
    /// Look up a named change by its script key.
    #[must_use]
    pub fn from_key(key: &str, value: Fixed) -> Option<Self> {
        Some(match key {
            "paralyzeDamageTime" => Self::ParalyzeDamageTime(value.saturating_to_num::<i32>()),
            "impulseFactor" => Self::ImpulseFactor(value),
            "impulseBoost" => Self::ImpulseBoost(value),
            "craterMult" => Self::CraterMult(value),
            "craterBoost" => Self::CraterBoost(value),
            "craterAreaOfEffect" => Self::CraterAreaOfEffect(value),
            "damageAreaOfEffect" => Self::DamageAreaOfEffect(value),
            "edgeEffectiveness" => Self::EdgeEffectiveness(value),
            "explosionSpeed" => Self::ExplosionSpeed(value),
            _ => return None,
        })
    }

    fn apply(self, damages: &mut DamageProfile) {
        match self {
            Self::Armor(index, value) => {
                if let Some(slot) = damages.per_armor.get_mut(index) {
                    *slot = value;
                }
            }
            Self::ParalyzeDamageTime(frames) => damages.paralyze_damage_time = frames.max(0),
            Self::ImpulseFactor(value) => damages.impulse_factor = value,
            Self::ImpulseBoost(value) => damages.impulse_boost = value,
            Self::CraterMult(value) => damages.crater_mult = value,
            Self::CraterBoost(value) => damages.crater_boost = value,
            Self::CraterAreaOfEffect(value) => damages.crater_area_of_effect = value,
            Self::DamageAreaOfEffect(value) => damages.damage_area_of_effect = value,
            Self::EdgeEffectiveness(value) => {
                damages.edge_effectiveness = value.min(Fixed::from_num(1));
            }
            Self::ExplosionSpeed(value) => damages.explosion_speed = value,
        }
    }
}

/// New line-of-sight bits: either a full replacement or per-bit edits of
/// the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LosSpec {
    /// Replace all bits.
    Bits(LosBits),
    /// Set (`true`) or clear (`false`) individual bits.
    Flags(Vec<(LosBits, bool)>),
}

impl LosSpec {
    /// Resolve against the current bits.
    #[must_use]
    pub fn resolve(&self, old: LosBits) -> LosBits {
        match self {
            Self::Bits(bits) => *bits,
            Self::Flags(flags) => flags
                .iter()
                .fold(old, |bits, &(flag, set)| bits.with(flag, set)),
        }
    }
}

impl SyncedGateway {
    /// Create a unit.
    ///
    /// Returns `None` if the team's unit limit is reached or the requested
    /// id is taken.
    ///
    /// # Errors
    ///
    /// Malformed for an unknown definition, an invalid team or a team the
    /// caller may not create for; [`GatewayError::RecursionLimitExceeded`]
    /// when nested too deeply.
    pub fn create_unit(&mut self, ctx: &CallerContext, spawn: UnitSpawn) -> Result<Option<UnitId>> {
        const VERB: &str = "CreateUnit";
        self.guard.check(VERB, RecursionCategory::CreateUnit)?;

        let (def_id, def) = self
            .defs
            .unit(&spawn.def)
            .map(|(id, def)| (id, def.clone()))
            .ok_or_else(|| GatewayError::malformed(VERB, format!("bad unitDef {:?}", spawn.def)))?;
        let team = spawn.team.or_else(|| ctx.ctrl_team()).ok_or_else(|| {
            GatewayError::malformed(VERB, "invalid team number (none given)")
        })?;
        let ally_team = self
            .registry
            .ally_team_of(team)
            .ok_or_else(|| GatewayError::malformed(VERB, format!("invalid team number ({team})")))?;
        if !ctx.can_control_team(team) {
            return Err(GatewayError::malformed(
                VERB,
                format!("not a controllable team ({team})"),
            ));
        }
        let limit = usize::try_from(self.config.max_units_per_team).unwrap_or(usize::MAX);
        if self.registry.team_unit_count(team) >= limit {
            tracing::debug!(team, limit, "unit limit reached");
            return Ok(None);
        }

        self.sync.assert_synced("CreateUnit.position", &spawn.position);
        self.sync.assert_synced("CreateUnit.facing", &spawn.facing);
        let _token = self.guard.enter(VERB, RecursionCategory::CreateUnit)?;

        let builder = spawn.builder.filter(|&id| self.registry.unit(id).is_some());
        let Some(id) = self.registry.unit_ids.allocate(spawn.unit_id) else {
            tracing::debug!(requested = ?spawn.unit_id, "unit id unavailable");
            return Ok(None);
        };

        let unit = self.build_unit(id, def_id, &def, team, ally_team, &spawn, builder);
        let storage = unit.economy.storage;
        let mobile = unit.mobile;
        self.registry.units.insert(id, unit);
        if let Some(team) = self.registry.team_mut(team) {
            for kind in ResourceKind::ALL {
                team.ledger.adjust_storage(kind, storage.get(kind));
            }
        }
        self.refresh_los(id, ally_team);

        if !mobile && spawn.flatten_ground {
            self.flatten_footprint(spawn.position);
        }

        tracing::debug!(unit = id, team, def = %def.name, "unit created");
        let callins = Rc::clone(&self.callins);
        callins.unit_created(self, id, builder);
        Ok(Some(id))
    }

    /// Destroy a unit.
    ///
    /// The unit is marked dead before the `unit_destroyed` callin runs, so
    /// handlers cannot act on it any more.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit;
    /// [`GatewayError::RecursionLimitExceeded`] when nested too deeply.
    pub fn destroy_unit(&mut self, ctx: &CallerContext, id: UnitId, death: UnitDeath) -> Result<()> {
        const VERB: &str = "DestroyUnit";
        self.controlled_unit(ctx, VERB, id)?;
        let attacker = death
            .attacker
            .filter(|&attacker| self.controlled_unit(ctx, VERB, attacker).is_ok());

        let _token = self.guard.enter(VERB, RecursionCategory::DestroyUnit)?;
        self.sync.assert_synced("DestroyUnit", &id);
        if let Some(unit) = self.registry.units.get_mut(&id) {
            unit.dead = true;
        }

        let callins = Rc::clone(&self.callins);
        callins.unit_destroyed(self, id, attacker);

        let Some(unit) = self.registry.units.remove(&id) else {
            return Ok(());
        };
        if let Some(team) = self.registry.team_mut(unit.team) {
            for kind in ResourceKind::ALL {
                team.ledger.adjust_storage(kind, -unit.economy.storage.get(kind));
            }
        }
        let reusable_at = if death.recycle_id {
            None
        } else {
            Some(self.registry.frame + u64::from(self.config.id_reclaim_delay))
        };
        self.registry.unit_ids.release(id, reusable_at);

        if !death.reclaimed {
            let effect = if death.self_destruct { "selfDestruct" } else { "explode" };
            self.services.spawn_visual_effect(effect, unit.position);
        }
        tracing::debug!(unit = id, ?attacker, "unit destroyed");
        Ok(())
    }

    /// Move a unit to another team.
    ///
    /// `given` distinguishes a gift from a capture and is only honoured for
    /// full-control callers; it defaults to a gift.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit or an invalid team;
    /// [`GatewayError::RecursionLimitExceeded`] when nested too deeply.
    pub fn transfer_unit(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        new_team: TeamId,
        given: Option<bool>,
    ) -> Result<()> {
        const VERB: &str = "TransferUnit";
        let old_team = self.controlled_unit(ctx, VERB, id)?.team;
        let new_ally = self
            .registry
            .ally_team_of(new_team)
            .ok_or_else(|| invalid_reference(VERB, "team", new_team))?;
        let given = if ctx.is_full() { given.unwrap_or(true) } else { true };

        let _token = self.guard.enter(VERB, RecursionCategory::TransferUnit)?;
        self.sync.assert_synced("TransferUnit", &(id, new_team, given));
        if old_team == new_team {
            return Ok(());
        }

        let Some(unit) = self.registry.units.get_mut(&id) else {
            return Err(invalid_reference(VERB, "unit", id));
        };
        unit.team = new_team;
        unit.ally_team = new_ally;
        unit.commands.commands.clear();
        let storage = unit.economy.storage;
        if let Some((from, to)) = self.registry.two_teams_mut(old_team, new_team) {
            for kind in ResourceKind::ALL {
                from.ledger.adjust_storage(kind, -storage.get(kind));
                to.ledger.adjust_storage(kind, storage.get(kind));
            }
        }
        self.refresh_los(id, new_ally);

        tracing::debug!(unit = id, old_team, new_team, given, "unit transferred");
        let callins = Rc::clone(&self.callins);
        callins.unit_given(self, id, old_team, given);
        Ok(())
    }

    /// Apply health, capture, paralysis and build-progress changes in order.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_health(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        changes: &[HealthChange],
    ) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitHealth", id)?;
        for change in changes {
            match *change {
                HealthChange::Health(health) => unit.health = health.min(unit.max_health),
                HealthChange::Capture(progress) => unit.capture_progress = progress,
                HealthChange::Paralyze(damage) => {
                    unit.paralyze_damage = damage.max(Fixed::ZERO);
                    if unit.paralyze_damage > unit.max_health {
                        unit.stunned = true;
                    } else if damage < Fixed::ZERO {
                        unit.stunned = false;
                    }
                }
                HealthChange::Build(progress) => {
                    unit.build_progress = progress;
                    if progress >= Fixed::from_num(1) {
                        unit.finish_building();
                    } else {
                        unit.turn_into_nanoframe();
                    }
                }
            }
        }
        Ok(())
    }

    /// Set a unit's maximum health (at least 0.1), capping its health.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_max_health(&mut self, ctx: &CallerContext, id: UnitId, value: Fixed) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitMaxHealth", id)?;
        unit.max_health = value.max(Fixed::from_num(0.1));
        unit.health = unit.health.min(unit.max_health);
        Ok(())
    }

    /// Set a unit's experience; negative values become zero.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_experience(&mut self, ctx: &CallerContext, id: UnitId, value: Fixed) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitExperience", id)?;
        unit.experience = value.max(Fixed::ZERO);
        Ok(())
    }

    /// Add to a unit's experience; the total never drops below zero.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn add_unit_experience(&mut self, ctx: &CallerContext, id: UnitId, delta: Fixed) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "AddUnitExperience", id)?;
        unit.experience = unit.experience.saturating_add(delta).max(Fixed::ZERO);
        Ok(())
    }

    /// Teleport a unit.
    ///
    /// Without an explicit `height` the unit is placed on the ground, or on
    /// the water surface if `above_water` is set and the ground is below it.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_position(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        x: Fixed,
        z: Fixed,
        height: Option<Fixed>,
        above_water: bool,
    ) -> Result<()> {
        self.controlled_unit(ctx, "SetUnitPosition", id)?;
        let y = height.unwrap_or_else(|| {
            let ground = self.terrain.ground_height(x, z);
            if above_water {
                ground.max(Fixed::ZERO)
            } else {
                ground
            }
        });
        let position = Vec3Fixed::new(x, y, z);
        self.sync.assert_synced("SetUnitPosition", &position);
        if let Some(unit) = self.registry.unit_mut(id) {
            unit.position = position;
        }
        self.services.move_entity(EntityRef::Unit(id), position);
        Ok(())
    }

    /// Set a unit's velocity, clamped per component to the maximum unit speed.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_velocity(&mut self, ctx: &CallerContext, id: UnitId, velocity: Vec3Fixed) -> Result<()> {
        let limit = self.config.max_unit_speed;
        let unit = self.controlled_unit_mut(ctx, "SetUnitVelocity", id)?;
        unit.velocity = velocity.clamp_components(limit);
        Ok(())
    }

    /// Queue an impulse, clamped per component to the maximum impulse.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn add_unit_impulse(&mut self, ctx: &CallerContext, id: UnitId, impulse: Vec3Fixed) -> Result<()> {
        let limit = self.config.max_impulse;
        let unit = self.controlled_unit_mut(ctx, "AddUnitImpulse", id)?;
        unit.impulse = (unit.impulse + impulse.clamp_components(limit)).clamp_components(limit);
        Ok(())
    }

    /// Set a unit's pitch, yaw and roll.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_rotation(&mut self, ctx: &CallerContext, id: UnitId, rotation: Vec3Fixed) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitRotation", id)?;
        unit.rotation = rotation;
        Ok(())
    }

    /// Point a unit along `front`, optionally with an explicit `right` axis.
    ///
    /// Both vectors are normalized. Without `right` it is derived from the
    /// world up axis, keeping the old one when `front` points straight up.
    ///
    /// # Errors
    ///
    /// Malformed for zero-length vectors or a `right` that is not
    /// orthogonal to `front`; silent for a dead or uncontrolled unit.
    pub fn set_unit_direction(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        front: Vec3Fixed,
        right: Option<Vec3Fixed>,
    ) -> Result<()> {
        const VERB: &str = "SetUnitDirection";
        self.controlled_unit(ctx, VERB, id)?;
        let front = unit_direction(VERB, "front", front)?;
        let right = match right {
            Some(right) => {
                let right = unit_direction(VERB, "right", right)?;
                let dp = front.dot(right);
                if !approx_eq(dp, Fixed::ZERO, direction_tolerance()) {
                    return Err(GatewayError::malformed(
                        VERB,
                        format!("front and right vectors are not orthogonal (dp={dp})"),
                    ));
                }
                Some(right)
            }
            None => {
                let up = Vec3Fixed::new(Fixed::ZERO, Fixed::from_num(1), Fixed::ZERO);
                Some(front.cross(up).normalize()).filter(|right| *right != Vec3Fixed::ZERO)
            }
        };
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        unit.front = front;
        if let Some(right) = right {
            unit.right = right;
        }
        Ok(())
    }

    /// Replace a unit's collision volume.
    ///
    /// # Errors
    ///
    /// Malformed for a primary axis other than 0, 1 or 2; silent for a dead
    /// or uncontrolled unit.
    pub fn set_unit_collision_volume(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        volume: CollisionVolume,
    ) -> Result<()> {
        const VERB: &str = "SetUnitCollisionVolumeData";
        if volume.axis > 2 {
            return Err(GatewayError::malformed(
                VERB,
                format!("bad primary axis {}", volume.axis),
            ));
        }
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        unit.collision = volume;
        Ok(())
    }

    /// Apply fire-control changes to one weapon (0-based index).
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit or a weapon index out of range.
    pub fn set_unit_weapon_state(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        weapon: usize,
        changes: &[WeaponStateChange],
    ) -> Result<()> {
        const VERB: &str = "SetUnitWeaponState";
        let game_speed = Fixed::from_num(self.config.game_speed);
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        let weapon = unit
            .weapons
            .get_mut(weapon)
            .ok_or_else(|| invalid_reference(VERB, "weapon", u32::try_from(weapon).unwrap_or(u32::MAX)))?;
        for change in changes {
            change.apply(weapon, game_speed);
        }
        Ok(())
    }

    /// Apply damage changes to a weapon or to one of the unit's explosions.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit or a weapon index out of range.
    pub fn set_unit_weapon_damages(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        target: DamageTarget,
        changes: &[DamageChange],
    ) -> Result<()> {
        const VERB: &str = "SetUnitWeaponDamages";
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        let damages = match target {
            DamageTarget::Explode => &mut unit.explode_damages,
            DamageTarget::SelfDestruct => &mut unit.self_destruct_damages,
            DamageTarget::Weapon(index) => {
                &mut unit
                    .weapons
                    .get_mut(index)
                    .ok_or_else(|| {
                        invalid_reference(VERB, "weapon", u32::try_from(index).unwrap_or(u32::MAX))
                    })?
                    .damages
            }
        };
        for change in changes {
            change.apply(damages);
        }
        Ok(())
    }

    /// Change which bits of a unit's visibility to `ally_team` are frozen,
    /// then re-apply the engine's computed status through the new mask.
    ///
    /// # Errors
    ///
    /// Malformed for an invalid ally-team; silent for a dead or uncontrolled
    /// unit.
    pub fn set_unit_los_mask(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        ally_team: AllyTeamId,
        mask: &LosSpec,
    ) -> Result<()> {
        const VERB: &str = "SetUnitLosMask";
        self.controlled_unit(ctx, VERB, id)?;
        let index = self.ally_index(VERB, ally_team)?;
        let computed = self.services.recompute_los(id, ally_team);
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        let status = unit
            .los
            .get_mut(index)
            .ok_or_else(|| GatewayError::malformed(VERB, "bad allyTeam"))?;
        status.set_mask(mask.resolve(status.mask));
        status.apply_computed(computed);
        Ok(())
    }

    /// Overwrite a unit's visibility status for `ally_team`, masked bits
    /// included.
    ///
    /// # Errors
    ///
    /// Malformed for an invalid ally-team; silent for a dead or uncontrolled
    /// unit.
    pub fn set_unit_los_state(
        &mut self,
        ctx: &CallerContext,
        id: UnitId,
        ally_team: AllyTeamId,
        state: &LosSpec,
    ) -> Result<()> {
        const VERB: &str = "SetUnitLosState";
        self.controlled_unit(ctx, VERB, id)?;
        let index = self.ally_index(VERB, ally_team)?;
        let unit = self.controlled_unit_mut(ctx, VERB, id)?;
        let status = unit
            .los
            .get_mut(index)
            .ok_or_else(|| GatewayError::malformed(VERB, "bad allyTeam"))?;
        status.set_state(state.resolve(status.status));
        Ok(())
    }

    /// Remove the command a unit is currently executing.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn unit_finish_command(&mut self, ctx: &CallerContext, id: UnitId) -> Result<Option<Command>> {
        let unit = self.controlled_unit_mut(ctx, "UnitFinishCommand", id)?;
        Ok(unit.commands.pop())
    }

    fn ally_index(&self, verb: &'static str, ally_team: AllyTeamId) -> Result<usize> {
        if !self.registry.is_valid_ally_team(ally_team) {
            return Err(GatewayError::malformed(verb, format!("bad allyTeam ({ally_team})")));
        }
        usize::try_from(ally_team).map_err(|_| GatewayError::malformed(verb, "bad allyTeam"))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_unit(
        &self,
        id: UnitId,
        def_id: u32,
        def: &UnitDef,
        team: TeamId,
        ally_team: AllyTeamId,
        spawn: &UnitSpawn,
        builder: Option<UnitId>,
    ) -> Unit {
        let mut unit = Unit::from_def(id, def_id, def, team, ally_team, self.registry.num_ally_teams());
        unit.position = spawn.position;
        unit.facing = spawn.facing;
        unit.builder = builder;
        unit.weapons = def
            .weapons
            .iter()
            .filter_map(|name| self.defs.weapon(&DefKey::Name(name.clone())))
            .map(|(weapon_id, weapon)| Weapon::from_def(weapon_id, weapon, self.config.game_speed))
            .collect();
        let explosion = |name: Option<&String>| {
            name.and_then(|name| self.defs.weapon(&DefKey::Name(name.clone())))
                .map(|(_, weapon)| DamageProfile::from_def(weapon))
        };
        unit.explode_damages = explosion(def.explode_as.as_ref()).unwrap_or_default();
        unit.self_destruct_damages = explosion(def.self_destruct_as.as_ref())
            .unwrap_or_else(|| unit.explode_damages.clone());
        if spawn.being_built {
            unit.turn_into_nanoframe();
            unit.build_progress = Fixed::ZERO;
            unit.health = Fixed::from_num(0.1).min(unit.max_health);
        }
        unit
    }

    /// Full visibility for the owner's ally-team, engine status for the rest.
    fn refresh_los(&mut self, id: UnitId, own_ally: AllyTeamId) {
        let Some(unit) = self.registry.units.get_mut(&id) else {
            return;
        };
        for (ally, status) in (0..).zip(unit.los.iter_mut()) {
            if ally == own_ally {
                status.set_state(LosBits::ALL);
            } else {
                status.apply_computed(self.services.recompute_los(id, ally));
            }
        }
    }

    /// Level the square around an immobile unit to the height at its centre.
    fn flatten_footprint(&mut self, position: Vec3Fixed) {
        let half = Fixed::from_num(self.config.square_size);
        let corners = [
            position.x.saturating_sub(half),
            position.z.saturating_sub(half),
            position.x.saturating_add(half),
            position.z.saturating_add(half),
        ];
        let Ok(rect) = self.terrain.world_rect("CreateUnit", &corners) else {
            return;
        };
        let height = self.terrain.ground_height(position.x, position.z);
        self.terrain.level(HeightLayer::Current, rect, height);
        self.services.terrain_changed(rect);
    }
}

fn direction_tolerance() -> Fixed {
    Fixed::from_num(0.001)
}

/// Normalize a direction, rejecting vectors too short to carry one.
fn unit_direction(verb: &'static str, what: &str, vector: Vec3Fixed) -> Result<Vec3Fixed> {
    let largest = vector
        .x
        .saturating_abs()
        .max(vector.y.saturating_abs())
        .max(vector.z.saturating_abs());
    let normalized = if largest > Fixed::ZERO {
        Vec3Fixed::new(vector.x / largest, vector.y / largest, vector.z / largest).normalize()
    } else {
        Vec3Fixed::ZERO
    };
    if !approx_eq(normalized.length(), Fixed::from_num(1), direction_tolerance()) {
        return Err(GatewayError::malformed(
            verb,
            format!("invalid {what}-direction ({}, {}, {})", vector.x, vector.y, vector.z),
        ));
    }
    Ok(normalized)
}
