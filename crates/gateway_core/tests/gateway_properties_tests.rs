//! Gateway contract tests.
//!
//! Each test drives the gateway through the script call surface the way a
//! synced script would, and checks one law of the gateway's behaviour.

use std::cell::RefCell;
use std::rc::Rc;

use gateway_core::guard::RecursionCategory;
use gateway_core::prelude::*;
use gateway_test_utils::fixtures::{
    array, default_world, fixed, n, s, spawn_unit, table, two_team_world, unit_array, Funds, BLUE,
    GAIA, RED,
};

fn metal(gateway: &SyncedGateway, team: TeamId) -> Fixed {
    gateway.registry().team(team).unwrap().ledger.current.metal
}

fn energy(gateway: &SyncedGateway, team: TeamId) -> Fixed {
    gateway.registry().team(team).unwrap().ledger.current.energy
}

// ============================================================================
// Resource ledger
// ============================================================================

#[test]
fn successful_use_subtracts_exactly_the_amount() {
    let mut gateway = default_world();
    let ctx = CallerContext::full();

    let result = gateway
        .call(&ctx, "UseTeamResource", &[n(0.0), s("metal"), n(120.0)])
        .unwrap();
    assert_eq!(result, vec![ScriptValue::Bool(true)]);
    assert_eq!(metal(&gateway, RED), fixed(380));

    let result = gateway
        .call(&ctx, "UseTeamResource", &[n(0.0), s("metal"), n(381.0)])
        .unwrap();
    assert_eq!(result, vec![ScriptValue::Bool(false)]);
    assert_eq!(metal(&gateway, RED), fixed(380));
}

#[test]
fn multi_resource_unit_use_is_all_or_nothing() {
    let funds = Funds {
        metal: 3,
        energy: 10,
        storage: 1000,
    };
    let mut gateway = two_team_world(GatewayConfig::default(), funds);
    let scout = spawn_unit(&mut gateway, "scout", RED, 32, 32);

    let pack = table(&[("m", n(5.0)), ("e", n(5.0))]);
    let result = gateway
        .call(&CallerContext::full(), "UseUnitResource", &[n(f64::from(scout)), pack])
        .unwrap();

    assert_eq!(result, vec![ScriptValue::Bool(false)]);
    assert_eq!(metal(&gateway, RED), fixed(3));
    assert_eq!(energy(&gateway, RED), fixed(10));
    let unit = gateway.registry().unit(scout).unwrap();
    assert_eq!(unit.economy.used, ResourcePack::ZERO);
}

#[test]
fn restricted_caller_cannot_touch_another_team() {
    let mut gateway = default_world();
    let before = gateway.state_hash();

    let result = gateway
        .call(
            &CallerContext::team(GAIA),
            "AddTeamResource",
            &[n(f64::from(BLUE)), s("metal"), n(250.0)],
        )
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(metal(&gateway, BLUE), fixed(500));
    assert_eq!(gateway.state_hash(), before);
}

#[test]
fn restricted_caller_may_use_its_own_team() {
    let mut gateway = default_world();
    let result = gateway
        .call(
            &CallerContext::team(BLUE),
            "UseTeamResource",
            &[n(f64::from(BLUE)), s("energy"), n(100.0)],
        )
        .unwrap();
    assert_eq!(result, vec![ScriptValue::Bool(true)]);
    assert_eq!(energy(&gateway, BLUE), fixed(400));
}

#[test]
fn vetoed_share_moves_nothing() {
    let callins = gateway_test_utils::recording::RecordingCallins::denying_transfers();
    let mut gateway = default_world().with_callins(callins);
    let result = gateway
        .call(
            &CallerContext::full(),
            "ShareTeamResource",
            &[n(0.0), n(1.0), s("metal"), n(100.0)],
        )
        .unwrap();
    assert_eq!(result, vec![n(0.0)]);
    assert_eq!(metal(&gateway, RED), fixed(500));
    assert_eq!(metal(&gateway, BLUE), fixed(500));
}

// ============================================================================
// Rules params
// ============================================================================

#[test]
fn nil_value_deletes_for_every_observer() {
    let mut gateway = default_world();
    let full = CallerContext::full();
    gateway
        .call(&full, "SetGameRulesParam", &[s("phase"), n(3.0), table(&[("public", ScriptValue::Bool(true))])])
        .unwrap();
    gateway
        .call(&full, "SetGameRulesParam", &[s("phase"), ScriptValue::Nil])
        .unwrap();

    for ctx in [
        CallerContext::full(),
        CallerContext::team(RED),
        CallerContext::team(BLUE),
        CallerContext::none(),
    ] {
        let result = gateway.call(&ctx, "GetGameRulesParam", &[s("phase")]).unwrap();
        assert!(result.iter().all(ScriptValue::is_nil), "{ctx:?} still sees {result:?}");
        let all = gateway.call(&ctx, "GetGameRulesParams", &[]).unwrap();
        assert_eq!(all, vec![ScriptValue::Table(ScriptTable::new())]);
    }
}

#[test]
fn visibility_lattice_for_team_params() {
    let mut gateway = default_world();
    let full = CallerContext::full();
    let red = n(f64::from(RED));
    gateway
        .call(
            &full,
            "SetTeamRulesParam",
            &[red.clone(), s("score"), n(1.0), table(&[("public", ScriptValue::Bool(true))])],
        )
        .unwrap();
    gateway
        .call(
            &full,
            "SetTeamRulesParam",
            &[red.clone(), s("plan"), s("rush"), table(&[("allied", ScriptValue::Bool(true))])],
        )
        .unwrap();

    let read = |gateway: &mut SyncedGateway, team: TeamId, key: &str| {
        gateway
            .call(&CallerContext::team(team), "GetTeamRulesParam", &[red.clone(), s(key)])
            .unwrap()
    };

    for team in [RED, BLUE, GAIA] {
        assert_eq!(read(&mut gateway, team, "score"), vec![n(1.0)]);
    }
    assert_eq!(read(&mut gateway, RED, "plan"), vec![s("rush")]);
    assert_eq!(read(&mut gateway, BLUE, "plan"), vec![ScriptValue::Nil]);
    assert_eq!(read(&mut gateway, GAIA, "plan"), vec![ScriptValue::Nil]);

    // BLUE's ally-team declares RED's ally-team an ally
    gateway
        .call(&full, "SetAlly", &[n(1.0), n(0.0), ScriptValue::Bool(true)])
        .unwrap();
    assert_eq!(read(&mut gateway, BLUE, "plan"), vec![s("rush")]);
    assert_eq!(read(&mut gateway, GAIA, "plan"), vec![ScriptValue::Nil]);
}

#[test]
fn private_params_need_full_control() {
    let mut gateway = default_world();
    let full = CallerContext::full();
    gateway
        .call(&full, "SetGameRulesParam", &[s("seed"), n(42.0)])
        .unwrap();

    assert_eq!(
        gateway.call(&full, "GetGameRulesParam", &[s("seed")]).unwrap(),
        vec![n(42.0)]
    );
    assert_eq!(
        gateway
            .call(&CallerContext::team(RED), "GetGameRulesParam", &[s("seed")])
            .unwrap(),
        vec![ScriptValue::Nil]
    );
}

#[test]
fn owner_ally_team_reads_its_private_params() {
    let mut gateway = default_world();
    let tank = spawn_unit(&mut gateway, "tank", RED, 64, 64);
    let id = n(f64::from(tank));
    let red = CallerContext::team(RED);
    gateway
        .call(&red, "SetUnitRulesParam", &[id.clone(), s("ammo"), n(7.0)])
        .unwrap();
    gateway
        .call(&red, "SetTeamRulesParam", &[n(f64::from(RED)), s("plan"), s("rush")])
        .unwrap();

    assert_eq!(
        gateway.call(&red, "GetUnitRulesParam", &[id.clone(), s("ammo")]).unwrap(),
        vec![n(7.0)]
    );
    assert_eq!(
        gateway
            .call(&red, "GetTeamRulesParam", &[n(f64::from(RED)), s("plan")])
            .unwrap(),
        vec![s("rush")]
    );

    let blue = CallerContext::team(BLUE);
    gateway
        .call(&CallerContext::full(), "SetAlly", &[n(1.0), n(0.0), ScriptValue::Bool(true)])
        .unwrap();
    assert_eq!(
        gateway.call(&blue, "GetUnitRulesParam", &[id, s("ammo")]).unwrap(),
        vec![ScriptValue::Nil]
    );
}

#[test]
fn unit_params_follow_line_of_sight() {
    let mut gateway = default_world();
    let full = CallerContext::full();
    let tank = spawn_unit(&mut gateway, "tank", RED, 64, 64);
    let id = n(f64::from(tank));
    gateway
        .call(
            &full,
            "SetUnitRulesParam",
            &[id.clone(), s("ammo"), n(7.0), table(&[("inlos", ScriptValue::Bool(true))])],
        )
        .unwrap();

    let blue = CallerContext::team(BLUE);
    assert_eq!(
        gateway.call(&blue, "GetUnitRulesParam", &[id.clone(), s("ammo")]).unwrap(),
        vec![ScriptValue::Nil]
    );

    gateway
        .call(&full, "SetUnitLosState", &[id.clone(), n(1.0), table(&[("los", ScriptValue::Bool(true))])])
        .unwrap();
    assert_eq!(
        gateway.call(&blue, "GetUnitRulesParam", &[id, s("ammo")]).unwrap(),
        vec![n(7.0)]
    );
}

// ============================================================================
// Recursion guard
// ============================================================================

/// Destroys the next queued unit from inside every destruction callin.
#[derive(Default)]
struct ChainDestroyer {
    queue: RefCell<Vec<UnitId>>,
    failures: RefCell<Vec<GatewayError>>,
    deepest: RefCell<u32>,
}

impl SyncedCallins for ChainDestroyer {
    fn unit_destroyed(&self, gateway: &mut SyncedGateway, _unit: UnitId, _attacker: Option<UnitId>) {
        let depth = gateway.guard().depth(RecursionCategory::DestroyUnit);
        let deepest = *self.deepest.borrow();
        *self.deepest.borrow_mut() = deepest.max(depth);

        let next = self.queue.borrow_mut().pop();
        if let Some(next) = next {
            if let Err(err) = gateway.call(&CallerContext::full(), "DestroyUnit", &[n(f64::from(next))]) {
                self.failures.borrow_mut().push(err);
            }
        }
    }
}

fn chained_world(max_depth: u32, chain_len: usize) -> (SyncedGateway, Rc<ChainDestroyer>, Vec<UnitId>) {
    let config = GatewayConfig {
        max_recursion_depth: max_depth,
        ..GatewayConfig::default()
    };
    let mut gateway = two_team_world(config, Funds::default());
    let units: Vec<UnitId> = (0..chain_len)
        .map(|i| spawn_unit(&mut gateway, "scout", RED, 16 + 8 * i32::try_from(i).unwrap(), 16))
        .collect();
    let chain = Rc::new(ChainDestroyer::default());
    // popped from the back: units[1] is destroyed second
    chain.queue.borrow_mut().extend(units[1..].iter().rev());
    let gateway = gateway.with_callins(chain.clone());
    (gateway, chain, units)
}

#[test]
fn destroy_chain_at_max_depth_succeeds() {
    let (mut gateway, chain, units) = chained_world(4, 4);

    let result = gateway.call(&CallerContext::full(), "DestroyUnit", &[n(f64::from(units[0]))]);

    assert_eq!(result.unwrap(), Vec::<ScriptValue>::new());
    assert!(chain.failures.borrow().is_empty());
    assert_eq!(*chain.deepest.borrow(), 4);
    assert!(gateway.registry().units.is_empty());
    assert_eq!(gateway.guard().depth(RecursionCategory::DestroyUnit), 0);
}

#[test]
fn destroy_chain_past_max_depth_fails_on_the_extra_entry() {
    let (mut gateway, chain, units) = chained_world(4, 5);

    let result = gateway.call(&CallerContext::full(), "DestroyUnit", &[n(f64::from(units[0]))]);

    // the outer call itself completes; the fifth entry fails inside the chain
    assert!(result.is_ok());
    let failures = chain.failures.borrow();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        GatewayError::RecursionLimitExceeded {
            verb: "DestroyUnit",
            max_depth: 4
        }
    ));
    assert!(failures[0].is_fatal());
    assert_eq!(*chain.deepest.borrow(), 4);
    assert_eq!(gateway.registry().units.len(), 1);
    assert!(gateway.registry().unit(units[4]).is_some());
    assert_eq!(gateway.guard().depth(RecursionCategory::DestroyUnit), 0);
}

/// Gives a new order to the same unit from every order callin.
struct OrderEcho;

impl SyncedCallins for OrderEcho {
    fn unit_command(&self, gateway: &mut SyncedGateway, unit: UnitId, command: &Command) {
        let _ = gateway.give_order_to_unit(
            &CallerContext::full(),
            unit,
            Command::new(command.id + 1, Vec::new()),
        );
    }
}

#[test]
fn order_cascade_is_bounded_and_unwinds() {
    let config = GatewayConfig {
        max_recursion_depth: 3,
        ..GatewayConfig::default()
    };
    let mut gateway = two_team_world(config, Funds::default());
    let scout = spawn_unit(&mut gateway, "scout", RED, 16, 16);
    let mut gateway = gateway.with_callins(Rc::new(OrderEcho));

    let result = gateway
        .call(&CallerContext::full(), "GiveOrderToUnit", &[n(f64::from(scout)), n(1.0), table(&[])])
        .unwrap();

    assert_eq!(result, vec![ScriptValue::Bool(true)]);
    let ids: Vec<i32> = gateway
        .registry()
        .unit(scout)
        .unwrap()
        .commands
        .commands
        .iter()
        .map(|command| command.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(gateway.guard().depth(RecursionCategory::GiveOrder), 0);
}

// ============================================================================
// Order dispatch
// ============================================================================

#[test]
fn pairwise_dispatch_orders_two_of_three_units() {
    let mut gateway = default_world();
    let units: Vec<UnitId> = (0..3).map(|i| spawn_unit(&mut gateway, "scout", RED, 16 + 16 * i, 16)).collect();
    let commands = array(&[
        array(&[n(10.0), array(&[n(100.0), n(0.0), n(100.0)]), table(&[])]),
        array(&[n(20.0), table(&[]), table(&[])]),
    ]);

    let result = gateway
        .call(
            &CallerContext::full(),
            "GiveOrderArrayToUnitArray",
            &[unit_array(&units), commands, ScriptValue::Bool(true)],
        )
        .unwrap();

    assert_eq!(result, vec![n(2.0)]);
    let queue_len = |id: UnitId| gateway.registry().unit(id).unwrap().commands.len();
    assert_eq!(queue_len(units[0]), 1);
    assert_eq!(queue_len(units[1]), 1);
    assert_eq!(queue_len(units[2]), 0);
}

#[test]
fn batch_dispatch_skips_uncontrolled_units() {
    let mut gateway = default_world();
    let mine = spawn_unit(&mut gateway, "scout", RED, 16, 16);
    let theirs = spawn_unit(&mut gateway, "scout", BLUE, 48, 16);

    let result = gateway
        .call(
            &CallerContext::team(RED),
            "GiveOrderToUnitArray",
            &[unit_array(&[mine, theirs, 99]), n(5.0), table(&[])],
        )
        .unwrap();

    assert_eq!(result, vec![n(1.0)]);
    assert_eq!(gateway.registry().unit(mine).unwrap().commands.len(), 1);
    assert!(gateway.registry().unit(theirs).unwrap().commands.is_empty());
}

// ============================================================================
// Marshaling
// ============================================================================

#[test]
fn health_table_round_trips() {
    let mut gateway = default_world();
    let tank = spawn_unit(&mut gateway, "tank", RED, 16, 16);
    let scout = spawn_unit(&mut gateway, "scout", RED, 32, 16);
    let changes = table(&[("health", n(50.0)), ("paralyze", n(10.0))]);

    for id in [tank, scout] {
        gateway
            .call(&CallerContext::full(), "SetUnitHealth", &[n(f64::from(id)), changes.clone()])
            .unwrap();
    }

    let tank = gateway.registry().unit(tank).unwrap();
    assert_eq!((tank.health, tank.paralyze_damage), (fixed(50), fixed(10)));
    // scouts only have 40 health
    let scout = gateway.registry().unit(scout).unwrap();
    assert_eq!((scout.health, scout.paralyze_damage), (fixed(40), fixed(10)));
}

#[test]
fn wrong_argument_type_is_fatal() {
    let mut gateway = default_world();
    let err = gateway
        .call(&CallerContext::full(), "AddTeamResource", &[s("red"), s("metal"), n(1.0)])
        .unwrap_err();
    assert!(matches!(err, GatewayError::MalformedArgument { verb: "AddTeamResource", .. }));
}

#[test]
fn dead_unit_reference_is_silent() {
    let mut gateway = default_world();
    let scout = spawn_unit(&mut gateway, "scout", RED, 16, 16);
    gateway
        .call(&CallerContext::full(), "DestroyUnit", &[n(f64::from(scout))])
        .unwrap();

    let result = gateway
        .call(&CallerContext::full(), "SetUnitHealth", &[n(f64::from(scout)), n(10.0)])
        .unwrap();
    assert!(result.is_empty());
}

#[test]
fn unknown_resource_name_is_ignored() {
    let mut gateway = default_world();
    let scout = spawn_unit(&mut gateway, "scout", RED, 16, 16);
    let before = gateway.state_hash();
    let full = CallerContext::full();
    let red = n(f64::from(RED));

    for (verb, args) in [
        ("AddTeamResource", vec![red.clone(), s("gold"), n(5.0)]),
        ("UseTeamResource", vec![red.clone(), s("gold"), n(5.0)]),
        ("SetTeamShareLevel", vec![red, s("gold"), n(0.5)]),
        ("AddUnitResource", vec![n(f64::from(scout)), s("gold"), n(5.0)]),
        ("UseUnitResource", vec![n(f64::from(scout)), s("gold"), n(5.0)]),
    ] {
        let result = gateway.call(&full, verb, &args).unwrap();
        assert!(result.is_empty(), "{verb} returned {result:?}");
    }

    assert_eq!(metal(&gateway, RED), fixed(500));
    assert_eq!(gateway.state_hash(), before);
}

// ============================================================================
// Numeric limits
// ============================================================================

#[test]
fn huge_storage_saturates_when_a_unit_adds_more() {
    let mut gateway = default_world();
    gateway
        .call(&CallerContext::full(), "SetTeamResource", &[n(0.0), s("ms"), n(1e30)])
        .unwrap();

    spawn_unit(&mut gateway, "tank", RED, 16, 16);

    let ledger = &gateway.registry().team(RED).unwrap().ledger;
    assert_eq!(ledger.storage.metal, Fixed::MAX);
    assert!(ledger.is_consistent());
}

#[test]
fn repeated_huge_experience_saturates() {
    let mut gateway = default_world();
    let scout = spawn_unit(&mut gateway, "scout", RED, 16, 16);
    for _ in 0..2 {
        gateway
            .call(&CallerContext::full(), "AddUnitExperience", &[n(f64::from(scout)), n(1e30)])
            .unwrap();
    }
    assert_eq!(gateway.registry().unit(scout).unwrap().experience, Fixed::MAX);

    gateway
        .call(&CallerContext::full(), "AddUnitExperience", &[n(f64::from(scout)), n(-1e30)])
        .unwrap();
    assert_eq!(gateway.registry().unit(scout).unwrap().experience, Fixed::ZERO);
}

#[test]
fn huge_projectile_gravity_keeps_ticking() {
    let mut gateway = default_world();
    let spawn = table(&[
        ("pos", array(&[n(100.0), n(20.0), n(100.0)])),
        ("speed", array(&[n(1.0), n(0.0), n(0.0)])),
        ("ttl", n(10.0)),
    ]);
    let result = gateway
        .call(&CallerContext::full(), "SpawnProjectile", &[s("cannon"), spawn])
        .unwrap();
    let id = result[0].clone();
    gateway
        .call(&CallerContext::full(), "SetProjectileGravity", &[id, n(1e30)])
        .unwrap();

    for _ in 0..3 {
        gateway.tick();
    }

    let projectile = gateway.registry().projectiles.values().next().unwrap();
    assert!(projectile.velocity.y <= -Fixed::MAX);
    assert!(projectile.position.y < Fixed::ZERO);
    assert_eq!(projectile.position.x, fixed(103));
}

#[test]
fn huge_height_adjustments_saturate() {
    let mut gateway = default_world();
    let region = [n(0.0), n(0.0), n(16.0), n(16.0)];
    for delta in [1e30, 1e30] {
        let mut args = region.to_vec();
        args.push(n(delta));
        gateway.call(&CallerContext::none(), "AdjustHeightMap", &args).unwrap();
    }
    assert_eq!(gateway.terrain().height(HeightLayer::Current, 1, 1), Some(Fixed::MAX));

    let mut args = region.to_vec();
    args.push(n(-1e30));
    gateway.call(&CallerContext::none(), "LevelHeightMap", &args).unwrap();
    assert_eq!(gateway.terrain().height(HeightLayer::Current, 1, 1), Some(-Fixed::MAX));
}
