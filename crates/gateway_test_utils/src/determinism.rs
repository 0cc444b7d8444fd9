//! Determinism testing utilities.
//!
//! Provides a harness for verifying that identical script call sequences
//! produce identical replicated state.
//!
//! # Testing Strategy
//!
//! Every client runs the same synced script calls in the same order, so the
//! gateway must be a pure function of its inputs. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: script numbers are converted to fixed-point
//!   at the marshaling boundary and never stored as floats.
//!
//! - **HashMap iteration order**: entities live in ordered maps and script
//!   tables iterate in key order.
//!
//! - **Callin side effects**: handlers re-enter the gateway in a fixed,
//!   documented order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use gateway_core::prelude::*;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of steps executed per run.
    pub steps: usize,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic gateway).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the runs were deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Gateway is non-deterministic!\n\
                 Runs: {}\n\
                 Steps: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.steps,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// One input to a gateway run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A script call.
    Call {
        /// Caller identity.
        ctx: CallerContext,
        /// Verb name.
        verb: String,
        /// Positional arguments.
        args: Vec<ScriptValue>,
    },
    /// Advance one frame.
    Tick,
}

impl Step {
    /// Shorthand for a script call.
    #[must_use]
    pub fn call(ctx: CallerContext, verb: &str, args: Vec<ScriptValue>) -> Self {
        Self::Call {
            ctx,
            verb: verb.to_owned(),
            args,
        }
    }
}

/// Apply one step, discarding its result.
///
/// Fatal script errors are part of the deterministic outcome, so they are
/// ignored here rather than aborting the run.
pub fn apply_step(gateway: &mut SyncedGateway, step: &Step) {
    match step {
        Step::Call { ctx, verb, args } => {
            if let Err(err) = gateway.call(ctx, verb, args) {
                tracing::trace!(%err, "step failed");
            }
        }
        Step::Tick => {
            gateway.tick();
        }
    }
}

/// Run `setup` multiple times, apply the same steps and compare hashes.
///
/// # Arguments
///
/// * `runs` - Number of independent runs
/// * `setup` - Function creating the initial gateway
/// * `steps` - Inputs applied in order on every run
///
/// # Example
///
/// ```ignore
/// use gateway_test_utils::determinism::{verify_determinism, Step};
/// use gateway_test_utils::fixtures::default_world;
///
/// let steps = vec![Step::Tick, Step::Tick];
/// verify_determinism(3, default_world, &steps).assert_deterministic();
/// ```
pub fn verify_determinism<Setup>(runs: usize, setup: Setup, steps: &[Step]) -> DeterminismResult
where
    Setup: Fn() -> SyncedGateway,
{
    let hashes: Vec<u64> = (0..runs)
        .map(|_| {
            let mut gateway = setup();
            for step in steps {
                apply_step(&mut gateway, step);
            }
            gateway.state_hash()
        })
        .collect();

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        steps: steps.len(),
    }
}

/// Run two gateways step by step, finding the first divergence.
///
/// Useful for debugging non-determinism by finding exactly which input
/// makes runs differ.
///
/// # Returns
///
/// `None` if the runs agree throughout, `Some(index)` of the first step
/// after which their hashes differ.
pub fn find_first_divergence<Setup>(setup: Setup, steps: &[Step]) -> Option<usize>
where
    Setup: Fn() -> SyncedGateway,
{
    let mut first = setup();
    let mut second = setup();
    for (index, step) in steps.iter().enumerate() {
        apply_step(&mut first, step);
        apply_step(&mut second, step);
        if first.state_hash() != second.state_hash() {
            return Some(index);
        }
    }
    None
}

/// Verify that a snapshot taken after `steps` restores to an identical
/// state in a fresh gateway.
///
/// # Panics
///
/// Panics if the snapshot cannot be taken or restored.
pub fn verify_snapshot_determinism<Setup>(setup: Setup, steps: &[Step]) -> bool
where
    Setup: Fn() -> SyncedGateway,
{
    let mut gateway = setup();
    for step in steps {
        apply_step(&mut gateway, step);
    }
    let bytes = gateway.snapshot().expect("snapshot failed");

    let mut restored = setup();
    restored.restore(&bytes).expect("restore failed");
    restored.state_hash() == gateway.state_hash()
}

/// Compute a deterministic hash of any hashable value.
#[must_use]
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Property-based testing strategies for gateway inputs.
pub mod strategies {
    use proptest::prelude::*;

    use gateway_core::prelude::*;

    use super::Step;
    use crate::fixtures::{array, n, s, table, BLUE, GAIA, RED};

    /// Amounts in script form, including some out of range.
    pub fn arb_amount() -> impl Strategy<Value = f64> {
        prop_oneof![0.0..200.0f64, Just(0.0), -50.0..0.0f64, Just(1e12)]
    }

    /// Resource names as scripts spell them.
    pub fn arb_resource_name() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["metal", "energy", "m", "e", "mana"])
    }

    /// Fixture team ids, plus one that does not exist.
    pub fn arb_team() -> impl Strategy<Value = u32> {
        prop::sample::select(vec![RED, BLUE, GAIA, 9])
    }

    /// Caller contexts.
    pub fn arb_ctx() -> impl Strategy<Value = CallerContext> {
        prop_oneof![
            Just(CallerContext::full()),
            Just(CallerContext::team(RED)),
            Just(CallerContext::team(BLUE)),
            Just(CallerContext::none()),
        ]
    }

    /// Unit ids, most of which exist in a world with a few spawned units.
    pub fn arb_unit() -> impl Strategy<Value = u32> {
        0u32..8
    }

    /// A command as a script table `{cmdID, params, options}`.
    pub fn arb_command() -> impl Strategy<Value = ScriptValue> {
        (1i32..40, prop::collection::vec(0.0..512.0f64, 0..3), prop::bool::ANY).prop_map(
            |(id, params, shift)| {
                let params: Vec<ScriptValue> = params.into_iter().map(n).collect();
                let options = if shift { array(&[s("shift")]) } else { table(&[]) };
                array(&[n(f64::from(id)), array(&params), options])
            },
        )
    }

    /// One input step over the resource, unit, order and terrain verbs.
    pub fn arb_step() -> impl Strategy<Value = Step> {
        let team = || arb_team().prop_map(|t| n(f64::from(t)));
        let unit = || arb_unit().prop_map(|u| n(f64::from(u)));
        prop_oneof![
            (arb_ctx(), team(), arb_resource_name(), arb_amount()).prop_map(|(ctx, t, r, a)| {
                Step::call(ctx, "AddTeamResource", vec![t, s(r), n(a)])
            }),
            (arb_ctx(), team(), arb_resource_name(), arb_amount()).prop_map(|(ctx, t, r, a)| {
                Step::call(ctx, "UseTeamResource", vec![t, s(r), n(a)])
            }),
            (arb_ctx(), team(), team(), arb_amount()).prop_map(|(ctx, from, to, a)| {
                Step::call(ctx, "ShareTeamResource", vec![from, to, s("metal"), n(a)])
            }),
            (arb_ctx(), unit(), arb_amount(), arb_amount()).prop_map(|(ctx, u, m, e)| {
                Step::call(ctx, "UseUnitResource", vec![u, table(&[("m", n(m)), ("e", n(e))])])
            }),
            (arb_ctx(), unit(), arb_command()).prop_map(|(ctx, u, command)| {
                Step::call(ctx, "GiveOrderArrayToUnit", vec![u, array(&[command])])
            }),
            (arb_ctx(), unit(), team()).prop_map(|(ctx, u, t)| {
                Step::call(ctx, "TransferUnit", vec![u, t])
            }),
            (arb_ctx(), team(), 0.0..256.0f64, 0.0..256.0f64).prop_map(|(ctx, t, x, z)| {
                Step::call(ctx, "CreateUnit", vec![s("scout"), n(x), n(0.0), n(z), n(0.0), t])
            }),
            (arb_ctx(), unit()).prop_map(|(ctx, u)| Step::call(ctx, "DestroyUnit", vec![u])),
            (0.0..256.0f64, 0.0..256.0f64, -5.0..5.0f64).prop_map(|(x, z, d)| {
                Step::call(CallerContext::full(), "AdjustHeightMap", vec![n(x), n(z), n(d)])
            }),
            Just(Step::Tick),
        ]
    }

    /// Sequences of steps.
    pub fn arb_steps(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
        prop::collection::vec(arb_step(), 0..max_len)
    }
}
