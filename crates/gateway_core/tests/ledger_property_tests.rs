//! Property tests for resource accounting and param visibility.

use gateway_core::prelude::*;
use gateway_core::rules_params::LosAccess;
use gateway_test_utils::fixtures::{default_world, fixed, n, s, spawn_unit, two_team_world, Funds, BLUE, GAIA, RED};
use proptest::prelude::*;

fn stock(gateway: &SyncedGateway, team: TeamId) -> ResourcePack {
    gateway.registry().team(team).unwrap().ledger.current
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A use either subtracts exactly its amount or changes nothing.
    #[test]
    fn prop_team_use_is_check_then_use(
        amounts in prop::collection::vec((0i32..400, prop::bool::ANY), 1..12),
    ) {
        let mut gateway = default_world();
        let ctx = CallerContext::full();
        for (amount, is_metal) in amounts {
            let (name, kind) = if is_metal {
                ("metal", ResourceKind::Metal)
            } else {
                ("energy", ResourceKind::Energy)
            };
            let before = stock(&gateway, RED).get(kind);
            let result = gateway
                .call(&ctx, "UseTeamResource", &[n(0.0), s(name), n(f64::from(amount))])
                .unwrap();
            let after = stock(&gateway, RED).get(kind);

            if result == vec![ScriptValue::Bool(true)] {
                prop_assert_eq!(after, before - fixed(amount));
            } else {
                prop_assert_eq!(&result, &vec![ScriptValue::Bool(false)]);
                prop_assert_eq!(after, before);
                prop_assert!(fixed(amount) > before);
            }
            prop_assert!(after >= Fixed::ZERO);
        }
    }

    /// Multi-resource unit use spends both kinds or neither.
    #[test]
    fn prop_unit_pack_use_is_all_or_nothing(
        metal in 0i32..20,
        energy in 0i32..20,
        want_metal in 0i32..20,
        want_energy in 0i32..20,
    ) {
        let funds = Funds { metal, energy, storage: 100 };
        let mut gateway = two_team_world(GatewayConfig::default(), funds);
        let scout = spawn_unit(&mut gateway, "scout", BLUE, 16, 16);
        let mut pack = ScriptTable::new();
        pack.insert("metal", f64::from(want_metal));
        pack.insert("energy", f64::from(want_energy));

        let result = gateway
            .call(
                &CallerContext::team(BLUE),
                "UseUnitResource",
                &[n(f64::from(scout)), ScriptValue::Table(pack)],
            )
            .unwrap();

        let after = stock(&gateway, BLUE);
        let affordable = want_metal <= metal && want_energy <= energy;
        prop_assert_eq!(result, vec![ScriptValue::Bool(affordable)]);
        if affordable {
            prop_assert_eq!(after, ResourcePack::new(fixed(metal - want_metal), fixed(energy - want_energy)));
        } else {
            prop_assert_eq!(after, ResourcePack::new(fixed(metal), fixed(energy)));
        }
    }

    /// Sharing conserves the total and never leaves a stock outside storage.
    #[test]
    fn prop_share_conserves_resources(amount in 0i32..800, receiver_storage in 500i32..1500) {
        let mut gateway = default_world();
        let ctx = CallerContext::full();
        gateway
            .call(&ctx, "SetTeamResource", &[n(1.0), s("ms"), n(f64::from(receiver_storage))])
            .unwrap();
        let total_before = stock(&gateway, RED).metal + stock(&gateway, BLUE).metal;

        gateway
            .call(&ctx, "ShareTeamResource", &[n(0.0), n(1.0), s("metal"), n(f64::from(amount))])
            .unwrap();

        let red = &gateway.registry().team(RED).unwrap().ledger;
        let blue = &gateway.registry().team(BLUE).unwrap().ledger;
        prop_assert!(red.is_consistent());
        prop_assert!(blue.is_consistent());
        prop_assert_eq!(red.current.metal + blue.current.metal + blue.excess.metal, total_before);
    }

    /// A reader sees a game param exactly when the mask grants its level.
    #[test]
    fn prop_game_param_mask_isolation(bits in 0u8..64, reader in prop::sample::select(vec![RED, BLUE, GAIA])) {
        let mut gateway = default_world();
        gateway
            .call(&CallerContext::full(), "SetGameRulesParam", &[s("k"), n(1.0), n(f64::from(bits))])
            .unwrap();

        let seen = gateway
            .call(&CallerContext::team(reader), "GetGameRulesParam", &[s("k")])
            .unwrap();
        // game params have no owner ally-team, so teams read them as the public
        let visible = LosAccess::from_bits(bits).intersects(LosAccess::PUBLIC);
        prop_assert_eq!(seen, vec![if visible { n(1.0) } else { ScriptValue::Nil }]);
    }
}
