//! Script call surface.
//!
//! [`SyncedGateway::call`] is the single entry point for dynamically typed
//! script calls. It looks the verb up, marshals the positional arguments
//! into the typed verb API and folds the outcome back into script values:
//!
//! - success returns the verb's results (`true` for boolean verbs)
//! - [`GatewayError::InsufficientResource`] returns `false`
//! - other silent errors return nothing (`nil`)
//! - malformed arguments and recursion overflow are returned as errors
//!
//! Weapon numbers are 1-based at this layer.

use crate::auth::CallerContext;
use crate::components::{options, CollisionVolume, Command, Facing, UnitId, VolumeShape};
use crate::defs::DefKey;
use crate::error::{GatewayError, Result, ScriptOutcome};
use crate::gateway::{
    CostsChange, DamageChange, DamageTarget, FeatureResources, FeatureSpawn, HealthChange,
    LosSpec, Orders, ParamOwner, ProjectileSpawn, SyncedGateway, TeamResourceField, UnitDeath,
    UnitSpawn, WeaponStateChange,
};
use crate::ledger::{ResourceKind, ResourcePack};
use crate::los::LosBits;
use crate::marshal::{to_fixed, to_int, Args, ScriptTable, ScriptValue, TableKey};
use crate::math::{Fixed, Vec3Fixed};
use crate::rules_params::{LosAccess, RulesParamValue};
use crate::terrain::HeightLayer;

/// Every verb [`SyncedGateway::call`] accepts.
pub const VERBS: &[&str] = &[
    // teams and game
    "SetAlly",
    "KillTeam",
    "AssignPlayerToTeam",
    "GameOver",
    "SetGlobalLos",
    // resources
    "AddTeamResource",
    "UseTeamResource",
    "SetTeamResource",
    "SetTeamShareLevel",
    "ShareTeamResource",
    "AddUnitResource",
    "UseUnitResource",
    "SetUnitResourcing",
    "SetUnitStorage",
    "SetUnitCosts",
    // rules params
    "SetGameRulesParam",
    "SetTeamRulesParam",
    "SetPlayerRulesParam",
    "SetUnitRulesParam",
    "SetFeatureRulesParam",
    "GetGameRulesParam",
    "GetTeamRulesParam",
    "GetPlayerRulesParam",
    "GetUnitRulesParam",
    "GetFeatureRulesParam",
    "GetGameRulesParams",
    "GetTeamRulesParams",
    "GetPlayerRulesParams",
    "GetUnitRulesParams",
    "GetFeatureRulesParams",
    // units
    "CreateUnit",
    "DestroyUnit",
    "TransferUnit",
    "SetUnitHealth",
    "SetUnitMaxHealth",
    "SetUnitExperience",
    "AddUnitExperience",
    "SetUnitPosition",
    "SetUnitVelocity",
    "AddUnitImpulse",
    "SetUnitRotation",
    "SetUnitDirection",
    "SetUnitCollisionVolumeData",
    "SetUnitWeaponState",
    "SetUnitWeaponDamages",
    "SetUnitLosMask",
    "SetUnitLosState",
    "UnitFinishCommand",
    // features
    "CreateFeature",
    "DestroyFeature",
    "TransferFeature",
    "SetFeatureHealth",
    "SetFeatureMaxHealth",
    "SetFeatureResources",
    "SetFeaturePosition",
    "SetFeatureVelocity",
    "SetFeatureRotation",
    // projectiles
    "SpawnProjectile",
    "DeleteProjectile",
    "SetProjectilePosition",
    "SetProjectileVelocity",
    "SetProjectileTimeToLive",
    "SetProjectileGravity",
    // orders
    "GiveOrderToUnit",
    "GiveOrderToUnitMap",
    "GiveOrderToUnitArray",
    "GiveOrderArrayToUnit",
    "GiveOrderArrayToUnitMap",
    "GiveOrderArrayToUnitArray",
    // height field
    "LevelHeightMap",
    "AdjustHeightMap",
    "RevertHeightMap",
    "LevelOriginalHeightMap",
    "AdjustOriginalHeightMap",
    "RevertOriginalHeightMap",
];

type Returns = Vec<ScriptValue>;

fn nothing() -> Result<Returns> {
    Ok(Vec::new())
}

fn one(value: impl Into<ScriptValue>) -> Result<Returns> {
    Ok(vec![value.into()])
}

impl SyncedGateway {
    /// Execute a script call.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: an unknown verb, malformed arguments
    /// or recursion overflow. Silent errors become `nil` or `false`
    /// results.
    pub fn call(&mut self, ctx: &CallerContext, verb: &str, args: &[ScriptValue]) -> Result<Returns> {
        let Some(&verb) = VERBS.iter().find(|&&known| known == verb) else {
            return Err(GatewayError::malformed(
                "SyncedGateway",
                format!("unknown verb '{verb}'"),
            ));
        };
        let result = self.dispatch(ctx, Args::new(verb, args));
        match &result {
            Err(GatewayError::InsufficientResource { .. }) => return one(false),
            Err(err) if err.is_fatal() => tracing::warn!(verb, error = %err, "script call failed"),
            _ => {}
        }
        Ok(result.silent()?.unwrap_or_default())
    }

    fn dispatch(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        match args.verb() {
            "SetAlly" | "KillTeam" | "AssignPlayerToTeam" | "GameOver" | "SetGlobalLos" => {
                self.call_team_verb(ctx, args)
            }
            verb if verb.contains("RulesParam") => self.call_rules_param_verb(ctx, args),
            "AddTeamResource" | "UseTeamResource" | "SetTeamResource" | "SetTeamShareLevel"
            | "ShareTeamResource" | "AddUnitResource" | "UseUnitResource"
            | "SetUnitResourcing" | "SetUnitStorage" | "SetUnitCosts" => {
                self.call_resource_verb(ctx, args)
            }
            "CreateUnit" | "DestroyUnit" | "TransferUnit" | "UnitFinishCommand" => {
                self.call_unit_lifecycle_verb(ctx, args)
            }
            verb if verb.starts_with("SetUnit") || verb.starts_with("AddUnit") => {
                self.call_unit_state_verb(ctx, args)
            }
            verb if verb.contains("Feature") => self.call_feature_verb(ctx, args),
            verb if verb.contains("Projectile") => self.call_projectile_verb(ctx, args),
            verb if verb.starts_with("GiveOrder") => self.call_order_verb(ctx, args),
            verb if verb.ends_with("HeightMap") => self.call_height_map_verb(args),
            verb => Err(GatewayError::malformed(verb, "verb has no handler")),
        }
    }

    fn call_team_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        match args.verb() {
            "SetAlly" => {
                let (first, second) = (ally_id(args, 0)?, ally_id(args, 1)?);
                self.set_ally(ctx, first, second, args.opt_bool(2, false))?;
                nothing()
            }
            "KillTeam" => {
                self.kill_team(ctx, team_id(args, 0)?)?;
                nothing()
            }
            "AssignPlayerToTeam" => {
                let player = entity_id(args, 0, "player")?;
                self.assign_player_to_team(ctx, player, team_id(args, 1)?)?;
                nothing()
            }
            "GameOver" => {
                let winners: Vec<i64> = args
                    .table(0)?
                    .values()
                    .filter_map(ScriptValue::as_number)
                    .map(to_int)
                    .collect();
                one(i64::try_from(self.game_over(ctx, &winners)?).unwrap_or(i64::MAX))
            }
            _ => {
                let ally = u32::try_from(args.int(0)?).map_err(|_| {
                    GatewayError::malformed(args.verb(), "bad allyTeam")
                })?;
                self.set_global_los(ctx, ally, args.opt_bool(1, false))?;
                nothing()
            }
        }
    }

    fn call_resource_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        match args.verb() {
            "AddTeamResource" => {
                let team = team_id(args, 0)?;
                let Some(kind) = resource_kind(args, 1)? else {
                    return nothing();
                };
                self.add_team_resource(ctx, team, kind, args.fixed(2)?)?;
                nothing()
            }
            "UseTeamResource" => {
                let team = team_id(args, 0)?;
                match args.get(1) {
                    ScriptValue::Table(table) => {
                        let pack = resource_pack(args, table)?;
                        self.use_team_resources(ctx, team, pack)?;
                    }
                    _ => {
                        let Some(kind) = resource_kind(args, 1)? else {
                            return nothing();
                        };
                        self.use_team_resource(ctx, team, kind, args.fixed(2)?)?;
                    }
                }
                one(true)
            }
            "SetTeamResource" => {
                let team = team_id(args, 0)?;
                let name = args.string(1)?;
                let field = TeamResourceField::from_name(name).ok_or_else(|| {
                    GatewayError::malformed(args.verb(), format!("unknown resource field '{name}'"))
                })?;
                self.set_team_resource(ctx, team, field, args.fixed(2)?)?;
                nothing()
            }
            "SetTeamShareLevel" => {
                let team = team_id(args, 0)?;
                let Some(kind) = resource_kind(args, 1)? else {
                    return nothing();
                };
                self.set_team_share_level(ctx, team, kind, args.fixed(2)?)?;
                nothing()
            }
            "ShareTeamResource" => {
                let (src, dst) = (team_id(args, 0)?, team_id(args, 1)?);
                let Some(kind) = resource_kind(args, 2)? else {
                    return nothing();
                };
                one(self.share_team_resource(ctx, src, dst, kind, args.fixed(3)?)?)
            }
            "AddUnitResource" => {
                let unit = unit_id(args, 0)?;
                let Some(kind) = resource_kind(args, 1)? else {
                    return nothing();
                };
                self.add_unit_resource(ctx, unit, kind, args.fixed(2)?)?;
                nothing()
            }
            "UseUnitResource" => {
                let unit = unit_id(args, 0)?;
                match args.get(1) {
                    ScriptValue::Table(table) => {
                        let pack = resource_pack(args, table)?;
                        self.use_unit_resources(ctx, unit, pack)?;
                    }
                    _ => {
                        let Some(kind) = resource_kind(args, 1)? else {
                            return nothing();
                        };
                        self.use_unit_resource(ctx, unit, kind, args.fixed(2)?)?;
                    }
                }
                one(true)
            }
            "SetUnitResourcing" => {
                let unit = unit_id(args, 0)?;
                match args.get(1) {
                    ScriptValue::Table(table) => {
                        for (key, value) in string_entries(table) {
                            let value = table_fixed(args, key, value)?;
                            self.set_unit_resourcing(ctx, unit, key, value)?;
                        }
                    }
                    _ => {
                        let key = args.string(1)?;
                        self.set_unit_resourcing(ctx, unit, key, args.fixed(2)?)?;
                    }
                }
                nothing()
            }
            "SetUnitStorage" => {
                let unit = unit_id(args, 0)?;
                match args.get(1) {
                    ScriptValue::Table(table) => {
                        for (key, value) in string_entries(table) {
                            let Some(kind) = ResourceKind::from_name(key) else {
                                continue;
                            };
                            let value = table_fixed(args, key, value)?;
                            self.set_unit_storage(ctx, unit, kind, value)?;
                        }
                    }
                    _ => {
                        let Some(kind) = resource_kind(args, 1)? else {
                            return nothing();
                        };
                        self.set_unit_storage(ctx, unit, kind, args.fixed(2)?)?;
                    }
                }
                nothing()
            }
            _ => {
                let unit = unit_id(args, 0)?;
                let table = args.table(1)?;
                let field = |key: &str| {
                    table
                        .get(key)
                        .map(|value| table_fixed(args, key, value))
                        .transpose()
                };
                let change = CostsChange {
                    build_time: field("buildTime")?,
                    metal: field("metalCost")?,
                    energy: field("energyCost")?,
                };
                self.set_unit_costs(ctx, unit, change)?;
                nothing()
            }
        }
    }

    fn call_rules_param_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        let verb = args.verb();
        let (owner, next) = if verb.contains("Game") {
            (ParamOwner::Game, 0)
        } else if verb.contains("Team") {
            (ParamOwner::Team(team_id(args, 0)?), 1)
        } else if verb.contains("Player") {
            (ParamOwner::Player(entity_id(args, 0, "player")?), 1)
        } else if verb.contains("Unit") {
            (ParamOwner::Unit(unit_id(args, 0)?), 1)
        } else {
            (ParamOwner::Feature(entity_id(args, 0, "feature")?), 1)
        };

        if verb.starts_with("Set") {
            let key = param_key(args, next)?;
            let value = param_value(args, next + 1)?;
            let los = los_access(args, next + 2)?;
            self.set_rules_param(ctx, owner, &key, value, los)?;
            nothing()
        } else if verb.ends_with("Params") {
            let mut table = ScriptTable::new();
            for (key, value) in self.get_rules_params(ctx, owner)? {
                table.insert(key.as_str(), param_to_script(value));
            }
            one(table)
        } else {
            let key = param_key(args, next)?;
            one(self.get_rules_param(ctx, owner, &key)?.map(param_to_script))
        }
    }

    fn call_unit_lifecycle_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        match args.verb() {
            "CreateUnit" => {
                let def = def_key(args, 0)?;
                let position = args.vec3(1)?;
                let facing = match args.get(4) {
                    ScriptValue::String(name) => Facing::from_name(name).ok_or_else(|| {
                        GatewayError::malformed(args.verb(), format!("bad facing '{name}'"))
                    })?,
                    _ => Facing::from_index(args.int(4)?),
                };
                let spawn = UnitSpawn {
                    facing,
                    team: args.opt_int(5)?.map(|team| int_to_id(args, team, "team")).transpose()?,
                    being_built: args.opt_bool(6, false),
                    flatten_ground: args.opt_bool(7, true),
                    unit_id: opt_entity_id(args, 8, "unit")?,
                    builder: opt_entity_id(args, 9, "unit")?,
                    ..UnitSpawn::new(def, position)
                };
                one(self.create_unit(ctx, spawn)?)
            }
            "DestroyUnit" => {
                let unit = unit_id(args, 0)?;
                let death = UnitDeath {
                    self_destruct: args.opt_bool(1, false),
                    reclaimed: args.opt_bool(2, false),
                    attacker: opt_entity_id(args, 3, "unit")?,
                    recycle_id: args.opt_bool(4, false),
                };
                self.destroy_unit(ctx, unit, death)?;
                nothing()
            }
            "TransferUnit" => {
                let unit = unit_id(args, 0)?;
                let team = team_id(args, 1)?;
                let given = match args.get(2) {
                    ScriptValue::Nil => None,
                    value => Some(value.truthy()),
                };
                self.transfer_unit(ctx, unit, team, given)?;
                nothing()
            }
            _ => {
                let unit = unit_id(args, 0)?;
                one(self.unit_finish_command(ctx, unit)?.map(|command| command.id))
            }
        }
    }

    fn call_unit_state_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        let unit = unit_id(args, 0)?;
        match args.verb() {
            "SetUnitHealth" => {
                let changes = match args.get(1) {
                    ScriptValue::Table(table) => health_changes(args, table)?,
                    _ => vec![HealthChange::Health(args.fixed(1)?)],
                };
                self.set_unit_health(ctx, unit, &changes)?;
            }
            "SetUnitMaxHealth" => self.set_unit_max_health(ctx, unit, args.fixed(1)?)?,
            "SetUnitExperience" => self.set_unit_experience(ctx, unit, args.fixed(1)?)?,
            "AddUnitExperience" => self.add_unit_experience(ctx, unit, args.fixed(1)?)?,
            "SetUnitPosition" => {
                let x = args.fixed(1)?;
                if args.get(3).as_number().is_some() {
                    let (y, z) = (args.fixed(2)?, args.fixed(3)?);
                    self.set_unit_position(ctx, unit, x, z, Some(y), false)?;
                } else {
                    let z = args.fixed(2)?;
                    self.set_unit_position(ctx, unit, x, z, None, args.opt_bool(3, false))?;
                }
            }
            "SetUnitVelocity" => self.set_unit_velocity(ctx, unit, args.vec3(1)?)?,
            "AddUnitImpulse" => self.add_unit_impulse(ctx, unit, args.vec3(1)?)?,
            "SetUnitRotation" => self.set_unit_rotation(ctx, unit, args.vec3(1)?)?,
            "SetUnitDirection" => {
                let front = args.vec3(1)?;
                let right = if args.get(4).is_nil() {
                    None
                } else {
                    Some(args.vec3(4)?)
                };
                self.set_unit_direction(ctx, unit, front, right)?;
            }
            "SetUnitCollisionVolumeData" => {
                let code = args.int(7)?;
                let shape = VolumeShape::from_code(code).ok_or_else(|| {
                    GatewayError::malformed(args.verb(), format!("bad volume type {code}"))
                })?;
                let axis = args.opt_int(8)?.unwrap_or(1);
                let volume = CollisionVolume {
                    scale: args.vec3(1)?,
                    offset: args.vec3(4)?,
                    shape,
                    axis: u8::try_from(axis).unwrap_or(u8::MAX),
                };
                self.set_unit_collision_volume(ctx, unit, volume)?;
            }
            "SetUnitWeaponState" => {
                let weapon = weapon_index(args, 1)?;
                let changes = weapon_state_changes(args)?;
                self.set_unit_weapon_state(ctx, unit, weapon, &changes)?;
            }
            "SetUnitWeaponDamages" => {
                let target = match args.get(1) {
                    ScriptValue::String(name) if name == "explode" => DamageTarget::Explode,
                    ScriptValue::String(name) if name == "selfDestruct" => DamageTarget::SelfDestruct,
                    _ => DamageTarget::Weapon(weapon_index(args, 1)?),
                };
                let changes = damage_changes(args)?;
                self.set_unit_weapon_damages(ctx, unit, target, &changes)?;
            }
            "SetUnitLosMask" | "SetUnitLosState" => {
                let ally = u32::try_from(args.int(1)?).map_err(|_| {
                    GatewayError::malformed(args.verb(), "bad allyTeam")
                })?;
                let spec = los_spec(args, 2)?;
                if args.verb() == "SetUnitLosMask" {
                    self.set_unit_los_mask(ctx, unit, ally, &spec)?;
                } else {
                    self.set_unit_los_state(ctx, unit, ally, &spec)?;
                }
            }
            verb => return Err(GatewayError::malformed(verb, "verb has no handler")),
        }
        nothing()
    }

    fn call_feature_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        if args.verb() == "CreateFeature" {
            let spawn = FeatureSpawn {
                heading: args
                    .opt_int(4)?
                    .map_or(0, |heading| i32::try_from(heading).unwrap_or(0)),
                team: args.opt_int(5)?,
                feature_id: opt_entity_id(args, 6, "feature")?,
                ..FeatureSpawn::new(def_key(args, 0)?, args.vec3(1)?)
            };
            return one(self.create_feature(ctx, spawn)?);
        }

        let feature = entity_id(args, 0, "feature")?;
        match args.verb() {
            "DestroyFeature" => self.destroy_feature(ctx, feature)?,
            "TransferFeature" => self.transfer_feature(ctx, feature, team_id(args, 1)?)?,
            "SetFeatureHealth" => {
                let health = args.fixed(1)?;
                self.set_feature_health(ctx, feature, health, args.opt_bool(2, false))?;
            }
            "SetFeatureMaxHealth" => self.set_feature_max_health(ctx, feature, args.fixed(1)?)?,
            "SetFeatureResources" => {
                let optional = |index| -> Result<Option<Fixed>> {
                    args.opt_number(index)?
                        .map(|value| to_fixed(args.verb(), "argument", value))
                        .transpose()
                };
                let resources = FeatureResources {
                    metal: args.fixed(1)?,
                    energy: args.fixed(2)?,
                    reclaim_time: optional(3)?,
                    reclaim_left: optional(4)?,
                    def_metal: optional(5)?,
                    def_energy: optional(6)?,
                };
                self.set_feature_resources(ctx, feature, resources)?;
            }
            "SetFeaturePosition" => self.set_feature_position(ctx, feature, args.vec3(1)?)?,
            "SetFeatureVelocity" => self.set_feature_velocity(ctx, feature, args.vec3(1)?)?,
            "SetFeatureRotation" => self.set_feature_rotation(ctx, feature, args.vec3(1)?)?,
            verb => return Err(GatewayError::malformed(verb, "verb has no handler")),
        }
        nothing()
    }

    fn call_projectile_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        if args.verb() == "SpawnProjectile" {
            let weapon = def_key(args, 0)?;
            let table = args.table(1)?;
            let vector = |key: &str| -> Result<Vec3Fixed> {
                table.get(key).map_or(Ok(Vec3Fixed::ZERO), |value| table_vec3(args, key, value))
            };
            let number = |key: &str| -> Result<Option<Fixed>> {
                table.get(key).map(|value| table_fixed(args, key, value)).transpose()
            };
            let id = |key: &str| -> Result<Option<u32>> {
                Ok(number(key)?.and_then(|value| u32::try_from(value.to_num::<i64>()).ok()))
            };
            let spawn = ProjectileSpawn {
                velocity: vector("speed")?,
                owner: id("owner")?,
                team: id("team")?,
                ttl: number("ttl")?.map(|ttl| ttl.saturating_to_num::<i32>()),
                gravity: number("gravity")?,
                ..ProjectileSpawn::new(weapon, vector("pos")?)
            };
            return one(self.spawn_projectile(ctx, spawn)?);
        }

        let projectile = entity_id(args, 0, "projectile")?;
        let zero = Fixed::ZERO;
        match args.verb() {
            "DeleteProjectile" => self.delete_projectile(ctx, projectile)?,
            "SetProjectilePosition" | "SetProjectileVelocity" => {
                let vector = Vec3Fixed::new(
                    args.opt_fixed(1, zero)?,
                    args.opt_fixed(2, zero)?,
                    args.opt_fixed(3, zero)?,
                );
                if args.verb() == "SetProjectilePosition" {
                    self.set_projectile_position(ctx, projectile, vector)?;
                } else {
                    self.set_projectile_velocity(ctx, projectile, vector)?;
                }
            }
            "SetProjectileTimeToLive" => {
                let ttl = i32::try_from(args.int(1)?).unwrap_or(i32::MAX);
                self.set_projectile_time_to_live(ctx, projectile, ttl)?;
            }
            "SetProjectileGravity" => {
                self.set_projectile_gravity(ctx, projectile, args.opt_fixed(1, zero)?)?;
            }
            verb => return Err(GatewayError::malformed(verb, "verb has no handler")),
        }
        nothing()
    }

    fn call_order_verb(&mut self, ctx: &CallerContext, args: Args<'_>) -> Result<Returns> {
        let verb = args.verb();
        let single = verb.ends_with("ToUnit");
        let units: Vec<UnitId> = if single {
            vec![unit_id(args, 0)?]
        } else if verb.ends_with("Map") {
            unit_map(args.table(0)?)
        } else {
            unit_array(args.table(0)?)
        };

        let orders = if verb.starts_with("GiveOrderArray") {
            let commands = command_array(args, args.table(1)?)?;
            if args.opt_bool(2, false) && !single {
                Orders::Pairwise(commands)
            } else {
                Orders::Many(commands)
            }
        } else {
            Orders::One(parse_command(args, args.get(1), args.get(2), args.get(3), args.get(4))?)
        };

        match (single, orders) {
            (true, Orders::One(command)) => {
                self.give_order_to_unit(ctx, units[0], command)?;
                one(true)
            }
            (true, orders) => {
                let ordered = self.give_orders(ctx, verb, &units, &orders)?;
                if ordered > 0 {
                    one(true)
                } else {
                    nothing()
                }
            }
            (false, orders) => {
                let ordered = self.give_orders(ctx, verb, &units, &orders)?;
                one(i64::try_from(ordered).unwrap_or(i64::MAX))
            }
        }
    }

    fn call_height_map_verb(&mut self, args: Args<'_>) -> Result<Returns> {
        let verb = args.verb();
        let layer = if verb.contains("Original") {
            HeightLayer::Original
        } else {
            HeightLayer::Current
        };
        let count = (0..args.len())
            .rev()
            .find(|&index| !args.get(index).is_nil())
            .map_or(0, |last| last + 1);
        let numbers = (0..count)
            .map(|index| args.fixed(index))
            .collect::<Result<Vec<_>>>()?;

        if verb.starts_with("Revert") && matches!(count, 2 | 4) {
            self.revert_height_map(layer, &numbers, Fixed::from_num(1))?;
            return nothing();
        }
        let Some((&value, coords)) = numbers.split_last() else {
            return Err(GatewayError::malformed(verb, "missing height arguments"));
        };
        if verb.starts_with("Level") {
            self.level_height_map(layer, coords, value)?;
        } else if verb.starts_with("Adjust") {
            self.adjust_height_map(layer, coords, value)?;
        } else {
            self.revert_height_map(layer, coords, value)?;
        }
        nothing()
    }
}

fn int_to_id(args: Args<'_>, value: i64, kind: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| GatewayError::InvalidReference {
        verb: args.verb(),
        kind,
        id: value,
    })
}

/// Required entity id; negative ids are invalid references.
fn entity_id(args: Args<'_>, index: usize, kind: &'static str) -> Result<u32> {
    int_to_id(args, args.int(index)?, kind)
}

fn opt_entity_id(args: Args<'_>, index: usize, kind: &'static str) -> Result<Option<u32>> {
    Ok(args
        .opt_int(index)?
        .and_then(|value| int_to_id(args, value, kind).ok()))
}

fn unit_id(args: Args<'_>, index: usize) -> Result<UnitId> {
    entity_id(args, index, "unit")
}

fn team_id(args: Args<'_>, index: usize) -> Result<u32> {
    entity_id(args, index, "team")
}

fn ally_id(args: Args<'_>, index: usize) -> Result<u32> {
    entity_id(args, index, "ally team")
}

fn def_key(args: Args<'_>, index: usize) -> Result<DefKey> {
    match args.get(index) {
        ScriptValue::String(name) => Ok(DefKey::Name(name.clone())),
        ScriptValue::Number(_) => {
            let id = args.int(index)?;
            Ok(DefKey::Id(u32::try_from(id).unwrap_or(0)))
        }
        _ => Err(args.type_error(index, "number or string")),
    }
}

/// Resource named by a string argument; `None` for names that are neither
/// metal nor energy, which the resource verbs ignore.
fn resource_kind(args: Args<'_>, index: usize) -> Result<Option<ResourceKind>> {
    Ok(ResourceKind::from_name(args.string(index)?))
}

/// `{metal = m, energy = e}`; keys are matched on their first character.
fn resource_pack(args: Args<'_>, table: &ScriptTable) -> Result<ResourcePack> {
    let mut pack = ResourcePack::ZERO;
    for (key, value) in string_entries(table) {
        if let Some(kind) = ResourceKind::from_name(key) {
            *pack.get_mut(kind) = table_fixed(args, key, value)?;
        }
    }
    Ok(pack)
}

/// Entries with string keys; integer keys are skipped.
fn string_entries(table: &ScriptTable) -> impl Iterator<Item = (&str, &ScriptValue)> {
    table.iter().filter_map(|(key, value)| match key {
        TableKey::Str(key) => Some((key.as_str(), value)),
        TableKey::Int(_) => None,
    })
}

fn table_fixed(args: Args<'_>, key: &str, value: &ScriptValue) -> Result<Fixed> {
    match value {
        ScriptValue::Number(number) => to_fixed(args.verb(), key, *number),
        other => Err(GatewayError::malformed(
            args.verb(),
            format!("bad value for '{key}' (number expected, got {})", other.type_name()),
        )),
    }
}

fn table_vec3(args: Args<'_>, key: &str, value: &ScriptValue) -> Result<Vec3Fixed> {
    let table = value.as_table().ok_or_else(|| {
        GatewayError::malformed(args.verb(), format!("bad value for '{key}' (table expected)"))
    })?;
    let component = |index: i64| {
        table
            .get_index(index)
            .map_or(Ok(Fixed::ZERO), |value| table_fixed(args, key, value))
    };
    Ok(Vec3Fixed::new(component(1)?, component(2)?, component(3)?))
}

fn health_changes(args: Args<'_>, table: &ScriptTable) -> Result<Vec<HealthChange>> {
    let mut changes = Vec::new();
    for (key, value) in string_entries(table) {
        let change: fn(Fixed) -> HealthChange = match key {
            "health" => HealthChange::Health,
            "capture" => HealthChange::Capture,
            "paralyze" => HealthChange::Paralyze,
            "build" => HealthChange::Build,
            _ => continue,
        };
        changes.push(change(table_fixed(args, key, value)?));
    }
    Ok(changes)
}

/// 1-based weapon number to index; numbers below 1 are invalid references.
fn weapon_index(args: Args<'_>, index: usize) -> Result<usize> {
    let number = args.int(index)?;
    number
        .checked_sub(1)
        .and_then(|index| usize::try_from(index).ok())
        .ok_or(GatewayError::InvalidReference {
            verb: args.verb(),
            kind: "weapon",
            id: number,
        })
}

/// Either a `{key = value}` table at argument 2 or a key/value pair at 2 and 3.
fn keyed_values(args: Args<'_>) -> Result<Vec<(TableKey, ScriptValue)>> {
    match args.get(2) {
        ScriptValue::Table(table) => Ok(table
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()),
        ScriptValue::String(key) => Ok(vec![(TableKey::Str(key.clone()), args.get(3).clone())]),
        ScriptValue::Number(_) => Ok(vec![(TableKey::Int(args.int(2)?), args.get(3).clone())]),
        _ => Err(args.type_error(2, "table or string")),
    }
}

fn weapon_state_changes(args: Args<'_>) -> Result<Vec<WeaponStateChange>> {
    let mut changes = Vec::new();
    for (key, value) in keyed_values(args)? {
        let TableKey::Str(key) = key else {
            continue;
        };
        let value = match value {
            ScriptValue::Bool(flag) => Fixed::from_num(u8::from(flag)),
            value => table_fixed(args, &key, &value)?,
        };
        changes.extend(WeaponStateChange::from_key(&key, value));
    }
    Ok(changes)
}

fn damage_changes(args: Args<'_>) -> Result<Vec<DamageChange>> {
    let mut changes = Vec::new();
    for (key, value) in keyed_values(args)? {
        match key {
            TableKey::Int(armor) => {
                let value = table_fixed(args, "damage", &value)?;
                if let Ok(armor) = usize::try_from(armor) {
                    changes.push(DamageChange::Armor(armor, value));
                }
            }
            TableKey::Str(key) => {
                let value = table_fixed(args, &key, &value)?;
                changes.extend(DamageChange::from_key(&key, value));
            }
        }
    }
    Ok(changes)
}

/// An integer bit set, or a table of named boolean flags.
fn los_spec(args: Args<'_>, index: usize) -> Result<LosSpec> {
    let ScriptValue::Table(table) = args.get(index) else {
        let bits = args.int(index)?;
        return Ok(LosSpec::Bits(LosBits::from_bits(
            u8::try_from(bits & 0x0F).unwrap_or(0),
        )));
    };
    let mut flags = Vec::new();
    for (key, value) in table.iter() {
        let TableKey::Str(name) = key else {
            return Err(GatewayError::malformed(args.verb(), "bad key type"));
        };
        let Some(set) = value.as_bool() else {
            return Err(GatewayError::malformed(
                args.verb(),
                format!("bad value type for '{name}'"),
            ));
        };
        if let Some(bit) = LosBits::from_name(name) {
            flags.push((bit, set));
        }
    }
    Ok(LosSpec::Flags(flags))
}

fn param_key(args: Args<'_>, index: usize) -> Result<String> {
    match args.get(index) {
        ScriptValue::String(key) => Ok(key.clone()),
        ScriptValue::Number(_) => Ok(args.int(index)?.to_string()),
        _ => Err(args.type_error(index, "string")),
    }
}

fn param_value(args: Args<'_>, index: usize) -> Result<Option<RulesParamValue>> {
    match args.get(index) {
        ScriptValue::Nil => Ok(None),
        ScriptValue::Number(number) => Ok(Some(RulesParamValue::Number(*number))),
        ScriptValue::Bool(flag) => Ok(Some(RulesParamValue::Bool(*flag))),
        ScriptValue::String(text) => Ok(Some(RulesParamValue::String(text.clone()))),
        ScriptValue::Table(_) => Err(args.type_error(index, "number, boolean or string")),
    }
}

fn param_to_script(value: RulesParamValue) -> ScriptValue {
    match value {
        RulesParamValue::Number(number) => ScriptValue::Number(number),
        RulesParamValue::Bool(flag) => ScriptValue::Bool(flag),
        RulesParamValue::String(text) => ScriptValue::String(text),
    }
}

/// A visibility bitmask, or a table of named flags merged onto `private`.
fn los_access(args: Args<'_>, index: usize) -> Result<Option<LosAccess>> {
    match args.get(index) {
        ScriptValue::Nil => Ok(None),
        ScriptValue::Number(_) => {
            let bits = args.int(index)?;
            Ok(Some(LosAccess::from_bits(u8::try_from(bits & 0xFF).unwrap_or(0))))
        }
        ScriptValue::Table(table) => {
            let mut access = LosAccess::PRIVATE;
            for (key, value) in table.iter() {
                let TableKey::Str(name) = key else {
                    continue;
                };
                if !value.truthy() {
                    continue;
                }
                if let Some(flag) = LosAccess::from_name(name) {
                    access = access.union(flag);
                }
            }
            Ok(Some(access))
        }
        _ => Err(args.type_error(index, "number or table")),
    }
}

/// Keys of a `{[unitID] = anything}` table; non-integer keys are skipped.
fn unit_map(table: &ScriptTable) -> Vec<UnitId> {
    table
        .iter()
        .filter_map(|(key, _)| match key {
            TableKey::Int(id) => u32::try_from(*id).ok(),
            TableKey::Str(_) => None,
        })
        .collect()
}

/// Values of a `{unitID, ...}` array; non-numbers are skipped.
fn unit_array(table: &ScriptTable) -> Vec<UnitId> {
    table
        .values()
        .filter_map(ScriptValue::as_number)
        .filter_map(|id| u32::try_from(to_int(id)).ok())
        .collect()
}

/// `{{cmdID, params, options, timeout?}, ...}`.
fn command_array(args: Args<'_>, table: &ScriptTable) -> Result<Vec<Command>> {
    table
        .values()
        .map(|entry| {
            let entry = entry
                .as_table()
                .ok_or_else(|| GatewayError::malformed(args.verb(), "command entries must be tables"))?;
            let field = |index: i64| entry.get_index(index).unwrap_or(&ScriptValue::Nil);
            parse_command(args, field(1), field(2), field(3), field(4))
        })
        .collect()
}

fn parse_command(
    args: Args<'_>,
    id: &ScriptValue,
    params: &ScriptValue,
    opts: &ScriptValue,
    timeout: &ScriptValue,
) -> Result<Command> {
    let verb = args.verb();
    let id = id
        .as_number()
        .ok_or_else(|| GatewayError::malformed(verb, "bad command ID"))?;
    let params = match params {
        ScriptValue::Nil => Vec::new(),
        ScriptValue::Number(number) => vec![to_fixed(verb, "command parameter", *number)?],
        ScriptValue::Table(table) => table
            .values()
            .map(|value| table_fixed(args, "command parameter", value))
            .collect::<Result<_>>()?,
        other => {
            return Err(GatewayError::malformed(
                verb,
                format!("bad command parameters ({})", other.type_name()),
            ))
        }
    };
    let mut command = Command::new(i32::try_from(to_int(id)).unwrap_or(0), params);
    command.options = match opts {
        ScriptValue::Nil => 0,
        ScriptValue::Number(bits) => u8::try_from(to_int(*bits) & 0xFF).unwrap_or(0),
        ScriptValue::Table(table) => table.iter().fold(0, |bits, (key, value)| {
            let name = match (key, value) {
                (TableKey::Str(name), value) if value.truthy() => Some(name.as_str()),
                (TableKey::Int(_), ScriptValue::String(name)) => Some(name.as_str()),
                _ => None,
            };
            bits | name.and_then(options::from_name).unwrap_or(0)
        }),
        other => {
            return Err(GatewayError::malformed(
                verb,
                format!("bad command options ({})", other.type_name()),
            ))
        }
    };
    command.timeout = timeout
        .as_number()
        .and_then(|frame| u64::try_from(to_int(frame)).ok());
    Ok(command)
}
