//! Entity and order data.
//!
//! Units, features and projectiles as the gateway sees them, plus the
//! command queue that order dispatch appends to.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::defs::{FeatureDef, UnitDef, WeaponDef};
use crate::ledger::{ResourcePack, UnitEconomy};
use crate::los::LosStatus;
use crate::math::{fixed_serde, vec_fixed_serde, Fixed, Vec3Fixed};
use crate::rules_params::RulesParams;

/// Unit identity.
pub type UnitId = u32;
/// Feature identity.
pub type FeatureId = u32;
/// Projectile identity.
pub type ProjectileId = u32;
/// Team identity.
pub type TeamId = u32;
/// Ally-team identity.
pub type AllyTeamId = u32;
/// Player identity.
pub type PlayerId = u32;

/// Building facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Facing {
    /// +Z.
    #[default]
    South,
    /// +X.
    East,
    /// -Z.
    North,
    /// -X.
    West,
}

impl Facing {
    /// Parse a numeric facing (0..=3, wrapping).
    #[must_use]
    pub const fn from_index(index: i64) -> Self {
        match index.rem_euclid(4) {
            0 => Self::South,
            1 => Self::East,
            2 => Self::North,
            _ => Self::West,
        }
    }

    /// Parse a facing name (`"s"`, `"south"`, ...), case-insensitive on the first letter.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.as_bytes().first().map(u8::to_ascii_lowercase) {
            Some(b's') => Some(Self::South),
            Some(b'e') => Some(Self::East),
            Some(b'n') => Some(Self::North),
            Some(b'w') => Some(Self::West),
            _ => None,
        }
    }
}

/// Command option bits.
pub mod options {
    /// Meta modifier.
    pub const META: u8 = 4;
    /// Issued by the engine itself.
    pub const INTERNAL: u8 = 8;
    /// Right mouse button.
    pub const RIGHT: u8 = 16;
    /// Shift modifier (queue).
    pub const SHIFT: u8 = 32;
    /// Control modifier.
    pub const CTRL: u8 = 64;
    /// Alt modifier.
    pub const ALT: u8 = 128;

    /// Look up an option bit by its script name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<u8> {
        match name {
            "meta" => Some(META),
            "internal" => Some(INTERNAL),
            "right" => Some(RIGHT),
            "shift" => Some(SHIFT),
            "ctrl" => Some(CTRL),
            "alt" => Some(ALT),
            _ => None,
        }
    }
}

/// A unit order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// Command id; negative ids are build orders.
    pub id: i32,
    /// Ordered parameters.
    #[serde(with = "vec_fixed_serde")]
    pub params: Vec<Fixed>,
    /// Option bitmask.
    pub options: u8,
    /// Absolute frame after which the command is dropped.
    pub timeout: Option<u64>,
}

impl Command {
    /// Create a command without options or timeout.
    #[must_use]
    pub fn new(id: i32, params: Vec<Fixed>) -> Self {
        Self {
            id,
            params,
            options: 0,
            timeout: None,
        }
    }

    /// Whether the command has expired at `frame`.
    #[must_use]
    pub fn is_expired(&self, frame: u64) -> bool {
        self.timeout.is_some_and(|timeout| frame > timeout)
    }
}

/// Queue of commands for a unit to execute.
///
/// Commands are executed in order. Units process the front command
/// until complete, then move to the next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CommandQueue {
    /// The queue of pending commands.
    pub commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Create an empty command queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
        }
    }

    /// Add a command to the back of the queue.
    pub fn push(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Get the current command being executed.
    #[must_use]
    pub fn current(&self) -> Option<&Command> {
        self.commands.front()
    }

    /// Remove and return the current command (when completed).
    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Drop commands whose timeout has passed, returning how many were dropped.
    pub fn prune_expired(&mut self, frame: u64) -> usize {
        let before = self.commands.len();
        self.commands.retain(|command| !command.is_expired(frame));
        before - self.commands.len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Get the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Mutable damage profile of a weapon or explosion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DamageProfile {
    /// Damage per armor type.
    #[serde(with = "vec_fixed_serde")]
    pub per_armor: Vec<Fixed>,
    /// Frames of paralysis per point of paralyze damage.
    pub paralyze_damage_time: i32,
    /// Impulse multiplier.
    #[serde(with = "fixed_serde")]
    pub impulse_factor: Fixed,
    /// Flat impulse.
    #[serde(with = "fixed_serde")]
    pub impulse_boost: Fixed,
    /// Crater multiplier.
    #[serde(with = "fixed_serde")]
    pub crater_mult: Fixed,
    /// Flat crater depth.
    #[serde(with = "fixed_serde")]
    pub crater_boost: Fixed,
    /// Crater radius.
    #[serde(with = "fixed_serde")]
    pub crater_area_of_effect: Fixed,
    /// Damage radius.
    #[serde(with = "fixed_serde")]
    pub damage_area_of_effect: Fixed,
    /// Edge falloff, at most 1.
    #[serde(with = "fixed_serde")]
    pub edge_effectiveness: Fixed,
    /// Explosion propagation speed.
    #[serde(with = "fixed_serde")]
    pub explosion_speed: Fixed,
}

impl DamageProfile {
    /// Profile derived from a weapon definition.
    #[must_use]
    pub fn from_def(def: &WeaponDef) -> Self {
        Self {
            per_armor: def.damages.clone(),
            paralyze_damage_time: 0,
            impulse_factor: Fixed::from_num(1),
            impulse_boost: Fixed::ZERO,
            crater_mult: Fixed::from_num(1),
            crater_boost: Fixed::ZERO,
            crater_area_of_effect: def.area_of_effect,
            damage_area_of_effect: def.area_of_effect,
            edge_effectiveness: def.edge_effectiveness.min(Fixed::from_num(1)),
            explosion_speed: Fixed::from_num(3),
        }
    }
}

/// Fire-control state of one mounted weapon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Weapon {
    /// Definition id.
    pub def_id: u32,
    /// Frames between shots.
    pub reload_time: i32,
    /// Frame at which the weapon is reloaded.
    pub reload_frame: i32,
    /// Frames between aiming updates.
    pub reaim_time: i32,
    /// Frame of the last aiming update.
    pub last_aimed_frame: i32,
    /// Accuracy error.
    #[serde(with = "fixed_serde")]
    pub accuracy: Fixed,
    /// Spray angle.
    #[serde(with = "fixed_serde")]
    pub spray_angle: Fixed,
    /// Range.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
    /// Projectile speed.
    #[serde(with = "fixed_serde")]
    pub projectile_speed: Fixed,
    /// Shots per salvo.
    pub salvo_size: i32,
    /// Frames between shots in a salvo.
    pub salvo_delay: i32,
    /// Projectiles per shot.
    pub projectiles_per_shot: i32,
    /// Shots left in the current salvo.
    pub salvo_left: i32,
    /// Frame of the next salvo shot.
    pub next_salvo: i32,
    /// Whether the weapon is aimed at its target.
    pub aim_ready: bool,
    /// Projectile lifetime in frames.
    pub ttl: i32,
    /// Damage dealt.
    pub damages: DamageProfile,
}

impl Weapon {
    /// Fresh weapon state from a definition.
    #[must_use]
    pub fn from_def(def_id: u32, def: &WeaponDef, game_speed: u32) -> Self {
        let speed = Fixed::from_num(game_speed);
        Self {
            def_id,
            reload_time: def.reload_time.saturating_mul(speed).saturating_to_num::<i32>().max(1),
            reload_frame: 0,
            reaim_time: 15,
            last_aimed_frame: 0,
            accuracy: def.accuracy,
            spray_angle: def.spray_angle,
            range: def.range,
            projectile_speed: def.projectile_speed,
            salvo_size: def.burst,
            salvo_delay: def.burst_rate.saturating_mul(speed).saturating_to_num::<i32>(),
            projectiles_per_shot: def.projectiles,
            salvo_left: 0,
            next_salvo: 0,
            aim_ready: false,
            ttl: def.ttl.saturating_mul(speed).saturating_to_num::<i32>(),
            damages: DamageProfile::from_def(def),
        }
    }
}

/// Shape of a collision volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VolumeShape {
    /// Ellipsoid.
    #[default]
    Ellipsoid,
    /// Cylinder along the primary axis.
    Cylinder,
    /// Box.
    Box,
    /// Sphere.
    Sphere,
}

impl VolumeShape {
    /// Parse the engine's numeric shape code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Ellipsoid),
            1 => Some(Self::Cylinder),
            2 => Some(Self::Box),
            3 => Some(Self::Sphere),
            _ => None,
        }
    }
}

/// Collision volume of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CollisionVolume {
    /// Full extents.
    pub scale: Vec3Fixed,
    /// Offset from the model center.
    pub offset: Vec3Fixed,
    /// Shape.
    pub shape: VolumeShape,
    /// Primary axis (0 = x, 1 = y, 2 = z).
    pub axis: u8,
}

/// Build and cost figures of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitCosts {
    /// Build time.
    #[serde(with = "fixed_serde")]
    pub build_time: Fixed,
    /// Metal cost.
    #[serde(with = "fixed_serde")]
    pub metal: Fixed,
    /// Energy cost.
    #[serde(with = "fixed_serde")]
    pub energy: Fixed,
}

/// A live unit.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Unit {
    /// Identity.
    pub id: UnitId,
    /// Definition id.
    pub def_id: u32,
    /// Owning team.
    pub team: TeamId,
    /// Ally-team of the owning team.
    pub ally_team: AllyTeamId,
    /// Position.
    pub position: Vec3Fixed,
    /// Velocity.
    pub velocity: Vec3Fixed,
    /// Pending impulse not yet applied by physics.
    pub impulse: Vec3Fixed,
    /// Pitch, yaw and roll.
    pub rotation: Vec3Fixed,
    /// Forward direction.
    pub front: Vec3Fixed,
    /// Right direction.
    pub right: Vec3Fixed,
    /// Facing at creation.
    pub facing: Facing,
    /// Current health.
    #[serde(with = "fixed_serde")]
    pub health: Fixed,
    /// Maximum health.
    #[serde(with = "fixed_serde")]
    pub max_health: Fixed,
    /// Accumulated paralyze damage.
    #[serde(with = "fixed_serde")]
    pub paralyze_damage: Fixed,
    /// Whether the unit is stunned.
    pub stunned: bool,
    /// Capture progress.
    #[serde(with = "fixed_serde")]
    pub capture_progress: Fixed,
    /// Build progress in `[0, 1]`.
    #[serde(with = "fixed_serde")]
    pub build_progress: Fixed,
    /// Whether the unit is an unfinished nanoframe.
    pub being_built: bool,
    /// Experience, never negative.
    #[serde(with = "fixed_serde")]
    pub experience: Fixed,
    /// Build and cost figures.
    pub costs: UnitCosts,
    /// Resource footprint.
    pub economy: UnitEconomy,
    /// Mounted weapons.
    pub weapons: Vec<Weapon>,
    /// Death explosion damage.
    pub explode_damages: DamageProfile,
    /// Self-destruct explosion damage.
    pub self_destruct_damages: DamageProfile,
    /// Order queue.
    pub commands: CommandQueue,
    /// Whether timed orders apply.
    pub mobile: bool,
    /// Line-of-sight status per ally-team.
    pub los: Vec<LosStatus>,
    /// Collision volume.
    pub collision: CollisionVolume,
    /// Builder that created this unit.
    pub builder: Option<UnitId>,
    /// Rules params.
    pub rules_params: RulesParams,
    /// Marked for destruction.
    pub dead: bool,
}

impl Unit {
    /// Build a unit from its definition.
    ///
    /// Weapon state is supplied by the caller.
    #[must_use]
    pub fn from_def(
        id: UnitId,
        def_id: u32,
        def: &UnitDef,
        team: TeamId,
        ally_team: AllyTeamId,
        num_ally_teams: usize,
    ) -> Self {
        let one = Fixed::from_num(1);
        Self {
            id,
            def_id,
            team,
            ally_team,
            position: Vec3Fixed::ZERO,
            velocity: Vec3Fixed::ZERO,
            impulse: Vec3Fixed::ZERO,
            rotation: Vec3Fixed::ZERO,
            front: Vec3Fixed::new(Fixed::ZERO, Fixed::ZERO, one),
            right: Vec3Fixed::new(-one, Fixed::ZERO, Fixed::ZERO),
            facing: Facing::South,
            health: def.max_health,
            max_health: def.max_health,
            paralyze_damage: Fixed::ZERO,
            stunned: false,
            capture_progress: Fixed::ZERO,
            build_progress: one,
            being_built: false,
            experience: Fixed::ZERO,
            costs: UnitCosts {
                build_time: def.build_time,
                metal: def.metal_cost,
                energy: def.energy_cost,
            },
            economy: UnitEconomy {
                storage: ResourcePack::new(def.metal_storage, def.energy_storage),
                ..UnitEconomy::default()
            },
            weapons: Vec::new(),
            explode_damages: DamageProfile::default(),
            self_destruct_damages: DamageProfile::default(),
            commands: CommandQueue::new(),
            mobile: def.mobile,
            los: vec![LosStatus::default(); num_ally_teams],
            collision: CollisionVolume::default(),
            builder: None,
            rules_params: RulesParams::new(),
            dead: false,
        }
    }

    /// Put the unit into the unfinished state.
    pub fn turn_into_nanoframe(&mut self) {
        self.being_built = true;
    }

    /// Mark construction as complete.
    pub fn finish_building(&mut self) {
        self.being_built = false;
        self.build_progress = Fixed::from_num(1);
    }
}

/// A live map feature.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Feature {
    /// Identity.
    pub id: FeatureId,
    /// Definition id.
    pub def_id: u32,
    /// Owning team, if any.
    pub team: Option<TeamId>,
    /// Ally-team of the owning team, if any.
    pub ally_team: Option<AllyTeamId>,
    /// Position.
    pub position: Vec3Fixed,
    /// Velocity.
    pub velocity: Vec3Fixed,
    /// Pitch, yaw and roll.
    pub rotation: Vec3Fixed,
    /// Heading in engine units.
    pub heading: i32,
    /// Current health.
    #[serde(with = "fixed_serde")]
    pub health: Fixed,
    /// Maximum health.
    #[serde(with = "fixed_serde")]
    pub max_health: Fixed,
    /// Reclaimable resources left.
    pub resources: ResourcePack,
    /// Reclaimable resources when whole.
    pub def_resources: ResourcePack,
    /// Reclaim time.
    #[serde(with = "fixed_serde")]
    pub reclaim_time: Fixed,
    /// Fraction left to reclaim, in `[0, 1]`.
    #[serde(with = "fixed_serde")]
    pub reclaim_left: Fixed,
    /// Rules params.
    pub rules_params: RulesParams,
    /// Marked for destruction.
    pub dead: bool,
}

impl Feature {
    /// Build a feature from its definition.
    #[must_use]
    pub fn from_def(
        id: FeatureId,
        def_id: u32,
        def: &FeatureDef,
        team: Option<TeamId>,
        ally_team: Option<AllyTeamId>,
    ) -> Self {
        let resources = ResourcePack::new(def.metal, def.energy);
        Self {
            id,
            def_id,
            team,
            ally_team,
            position: Vec3Fixed::ZERO,
            velocity: Vec3Fixed::ZERO,
            rotation: Vec3Fixed::ZERO,
            heading: 0,
            health: def.max_health,
            max_health: def.max_health,
            resources,
            def_resources: resources,
            reclaim_time: def.reclaim_time,
            reclaim_left: Fixed::from_num(1),
            rules_params: RulesParams::new(),
            dead: false,
        }
    }
}

/// A live projectile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projectile {
    /// Identity.
    pub id: ProjectileId,
    /// Weapon definition id.
    pub weapon_def: u32,
    /// Firing unit, if any.
    pub owner: Option<UnitId>,
    /// Owning team, if any.
    pub team: Option<TeamId>,
    /// Ally-team of the owning team, if any.
    pub ally_team: Option<AllyTeamId>,
    /// Position.
    pub position: Vec3Fixed,
    /// Velocity.
    pub velocity: Vec3Fixed,
    /// Gravity applied per frame.
    #[serde(with = "fixed_serde")]
    pub gravity: Fixed,
    /// Frames left to live.
    pub ttl: i32,
}
