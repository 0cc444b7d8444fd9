//! Test fixtures and helpers.
//!
//! Pre-built worlds and script values for consistent testing.

use fixed::types::I32F32;
use gateway_core::prelude::*;

/// Definitions shared by fixture worlds.
pub const DEFS: &str = r#"(
    units: [
        (
            name: "tank",
            max_health: 200,
            metal_cost: 100,
            energy_cost: 50,
            build_time: 10,
            metal_storage: 50,
            weapons: ["cannon"],
            explode_as: Some("blast"),
        ),
        (name: "tower", max_health: 500, mobile: false, energy_storage: 100),
        (name: "scout", max_health: 40),
    ],
    features: [
        (name: "rock", max_health: 50, metal: 20, reclaim_time: 5),
        (name: "tree", max_health: 10, energy: 15),
    ],
    weapons: [
        (name: "cannon", reload_time: 2, range: 300, ttl: 2, damages: [40, 20]),
        (name: "blast", damages: [100, 100], area_of_effect: 48),
    ],
)"#;

/// Team 0 (ally-team 0).
pub const RED: TeamId = 0;
/// Team 1 (ally-team 1).
pub const BLUE: TeamId = 1;
/// Team 2, the neutral team (ally-team 2).
pub const GAIA: TeamId = 2;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Starting stock and storage of every fixture team.
#[derive(Debug, Clone, Copy)]
pub struct Funds {
    /// Metal stock.
    pub metal: i32,
    /// Energy stock.
    pub energy: i32,
    /// Storage for both resources.
    pub storage: i32,
}

impl Default for Funds {
    fn default() -> Self {
        Self {
            metal: 500,
            energy: 500,
            storage: 1000,
        }
    }
}

/// World with two opposing teams, a neutral team and one player per
/// playing team, over a flat 32x32 height field.
#[must_use]
pub fn two_team_world(config: GatewayConfig, funds: Funds) -> SyncedGateway {
    let mut registry = EntityRegistry::new(3);
    let stock = ResourcePack::new(fixed(funds.metal), fixed(funds.energy));
    let storage = ResourcePack::new(fixed(funds.storage), fixed(funds.storage));
    for (ally_team, gaia) in [(0, false), (1, false), (2, true)] {
        registry.add_team(ally_team, TeamLedger::new(stock, storage), gaia);
    }
    registry.add_player("red", RED, false);
    registry.add_player("blue", BLUE, false);

    let defs = match DefRegistry::from_ron_str(DEFS) {
        Ok(defs) => defs,
        Err(err) => panic!("fixture definitions are invalid: {err}"),
    };
    SyncedGateway::new(config, defs, registry, HeightMap::flat(32, 32, 8, fixed(10)))
}

/// [`two_team_world`] with default configuration and funds.
#[must_use]
pub fn default_world() -> SyncedGateway {
    two_team_world(GatewayConfig::default(), Funds::default())
}

/// Create a finished unit for `team` at `(x, z)` with full control.
///
/// # Panics
///
/// Panics if the unit cannot be created.
pub fn spawn_unit(gateway: &mut SyncedGateway, def: &str, team: TeamId, x: i32, z: i32) -> UnitId {
    let result = gateway.call(
        &CallerContext::full(),
        "CreateUnit",
        &[
            s(def),
            n(f64::from(x)),
            n(10.0),
            n(f64::from(z)),
            n(0.0),
            n(f64::from(team)),
        ],
    );
    match result.as_deref() {
        Ok([ScriptValue::Number(id)]) => unit_id(*id),
        other => panic!("CreateUnit({def}) failed: {other:?}"),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unit_id(id: f64) -> UnitId {
    id as UnitId
}

/// Script number.
#[must_use]
pub fn n(value: f64) -> ScriptValue {
    ScriptValue::Number(value)
}

/// Script string.
#[must_use]
pub fn s(value: &str) -> ScriptValue {
    ScriptValue::from(value)
}

/// Script boolean.
#[must_use]
pub fn b(value: bool) -> ScriptValue {
    ScriptValue::Bool(value)
}

/// Keyed script table.
#[must_use]
pub fn table(entries: &[(&str, ScriptValue)]) -> ScriptValue {
    let mut table = ScriptTable::new();
    for (key, value) in entries {
        table.insert(*key, value.clone());
    }
    ScriptValue::Table(table)
}

/// 1-based script array.
#[must_use]
pub fn array(values: &[ScriptValue]) -> ScriptValue {
    ScriptValue::Table(ScriptTable::array(values.iter().cloned()))
}

/// Script array of unit ids.
#[must_use]
pub fn unit_array(units: &[UnitId]) -> ScriptValue {
    ScriptValue::Table(ScriptTable::array(units.iter().map(|&id| ScriptValue::from(id))))
}
