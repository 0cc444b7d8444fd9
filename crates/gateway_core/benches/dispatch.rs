//! Dispatch benchmarks for gateway_core.
//!
//! Run with: `cargo bench -p gateway_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use gateway_core::prelude::*;
use gateway_test_utils::fixtures::{array, default_world, n, s, spawn_unit, table, unit_array, RED};

fn world_with_units(count: i32) -> (SyncedGateway, Vec<UnitId>) {
    let mut gateway = default_world();
    let units = (0..count)
        .map(|i| spawn_unit(&mut gateway, "scout", RED, 8 * (i % 32), 8 * (i / 32)))
        .collect();
    (gateway, units)
}

/// Batched order dispatch through the script surface.
pub fn order_dispatch_benchmark(c: &mut Criterion) {
    let ctx = CallerContext::team(RED);
    let commands = array(&[
        array(&[n(10.0), array(&[n(100.0), n(0.0), n(100.0)]), table(&[])]),
        array(&[n(20.0), table(&[]), array(&[s("shift")])]),
    ]);

    c.bench_function("give_order_array_to_200_units", |b| {
        b.iter_batched(
            || world_with_units(200),
            |(mut gateway, units)| {
                let args = [unit_array(&units), commands.clone()];
                black_box(gateway.call(&ctx, "GiveOrderArrayToUnitArray", &args))
            },
            BatchSize::SmallInput,
        );
    });
}

/// Single-resource ledger traffic.
pub fn ledger_benchmark(c: &mut Criterion) {
    let ctx = CallerContext::full();
    let (mut gateway, _) = world_with_units(0);

    c.bench_function("use_then_add_team_resource", |b| {
        b.iter(|| {
            let used = gateway.call(&ctx, "UseTeamResource", &[n(0.0), s("metal"), n(5.0)]);
            let added = gateway.call(&ctx, "AddTeamResource", &[n(0.0), s("metal"), n(5.0)]);
            black_box((used, added))
        });
    });
}

criterion_group!(benches, order_dispatch_benchmark, ledger_benchmark);
criterion_main!(benches);
