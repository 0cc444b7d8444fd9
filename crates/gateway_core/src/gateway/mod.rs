//! The synced control gateway.
//!
//! [`SyncedGateway`] owns the replicated world (entity registry and height
//! field) together with the machinery every verb goes through: the caller's
//! authorization, the reentrancy guard, synced-value assertions and the
//! engine collaborators. The verbs themselves live in the submodules, one
//! per subsystem, as inherent methods on the gateway.
//!
//! Every verb follows the same shape: validate arguments, authorize the
//! target (silent rejection), enter the guard where one applies (hard
//! rejection), then mutate.

mod features;
mod orders;
mod params;
mod projectiles;
mod resources;
mod teams;
mod terrain;
mod units;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

pub use features::{FeatureResources, FeatureSpawn};
pub use orders::Orders;
pub use params::ParamOwner;
pub use projectiles::ProjectileSpawn;
pub use resources::{CostsChange, TeamResourceField};
pub use units::{
    DamageChange, DamageTarget, HealthChange, LosSpec, UnitDeath, UnitSpawn, WeaponStateChange,
};

use crate::auth::CallerContext;
use crate::components::{
    AllyTeamId, Feature, FeatureId, Projectile, ProjectileId, TeamId, Unit, UnitId,
};
use crate::config::GatewayConfig;
use crate::defs::DefRegistry;
use crate::error::{GatewayError, Result};
use crate::guard::RecursionGuard;
use crate::registry::{EntityRegistry, Team};
use crate::services::{EngineServices, NoCallins, NullServices, SyncedCallins};
use crate::sync::SyncChecker;
use crate::terrain::HeightMap;

/// Housekeeping performed by one [`SyncedGateway::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Unit and feature ids returned to their pools.
    pub reclaimed_ids: usize,
    /// Timed-out commands dropped from unit queues.
    pub expired_commands: usize,
    /// Projectiles whose lifetime ran out.
    pub expired_projectiles: usize,
}

/// Replicated state captured by [`SyncedGateway::snapshot`].
#[derive(Serialize, Deserialize)]
struct Snapshot {
    registry: EntityRegistry,
    terrain: HeightMap,
}

/// Authoritative mutation gateway over the replicated simulation state.
///
/// Single-threaded: all verbs run synchronously within a simulation step,
/// and callins re-enter through the same `&mut` borrow.
pub struct SyncedGateway {
    registry: EntityRegistry,
    terrain: HeightMap,
    defs: DefRegistry,
    config: GatewayConfig,
    guard: RecursionGuard,
    sync: SyncChecker,
    services: Box<dyn EngineServices>,
    callins: Rc<dyn SyncedCallins>,
}

impl SyncedGateway {
    /// Create a gateway over an existing world with no-op collaborators.
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        defs: DefRegistry,
        registry: EntityRegistry,
        terrain: HeightMap,
    ) -> Self {
        Self {
            registry,
            terrain,
            defs,
            guard: RecursionGuard::new(config.max_recursion_depth),
            sync: SyncChecker::new(config.sync_checks),
            config,
            services: Box::new(NullServices),
            callins: Rc::new(NoCallins),
        }
    }

    /// Replace the engine collaborators.
    #[must_use]
    pub fn with_services(mut self, services: Box<dyn EngineServices>) -> Self {
        self.services = services;
        self
    }

    /// Replace the script callin handlers.
    #[must_use]
    pub fn with_callins(mut self, callins: Rc<dyn SyncedCallins>) -> Self {
        self.callins = callins;
        self
    }

    /// The entity registry.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The entity registry, mutably, for world setup by the host.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// The height field.
    #[must_use]
    pub const fn terrain(&self) -> &HeightMap {
        &self.terrain
    }

    /// The height field, mutably, for map setup by the host.
    pub fn terrain_mut(&mut self) -> &mut HeightMap {
        &mut self.terrain
    }

    /// Loaded definitions.
    #[must_use]
    pub const fn defs(&self) -> &DefRegistry {
        &self.defs
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The reentrancy guard.
    #[must_use]
    pub const fn guard(&self) -> &RecursionGuard {
        &self.guard
    }

    /// Synced-value checksum.
    #[must_use]
    pub const fn sync(&self) -> &SyncChecker {
        &self.sync
    }

    /// Current simulation frame.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.registry.frame
    }

    /// Advance one simulation frame.
    ///
    /// Runs the gateway's per-frame housekeeping in a fixed order:
    /// 1. reclaim unit and feature ids whose delay has elapsed
    /// 2. drop expired commands from mobile units
    /// 3. age projectiles and remove the expired ones
    /// 4. roll every team's resource pull over
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.registry.frame += 1;
        let frame = self.registry.frame;

        report.reclaimed_ids = self.registry.unit_ids.reclaim(frame)
            + self.registry.feature_ids.reclaim(frame);

        report.expired_commands = self
            .registry
            .units
            .values_mut()
            .filter(|unit| unit.mobile)
            .map(|unit| unit.commands.prune_expired(frame))
            .sum();

        let mut expired = Vec::new();
        for (id, projectile) in &mut self.registry.projectiles {
            projectile.ttl = projectile.ttl.saturating_sub(1);
            projectile.velocity.y = projectile.velocity.y.saturating_sub(projectile.gravity);
            projectile.position = projectile.position + projectile.velocity;
            if projectile.ttl <= 0 {
                expired.push(*id);
            }
        }
        for id in &expired {
            self.registry.projectiles.remove(id);
            self.registry.projectile_ids.release(*id, None);
        }
        report.expired_projectiles = expired.len();

        for team in &mut self.registry.teams {
            team.ledger.start_frame();
        }

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(frame, state_hash = hash, "Gateway state hash");
        }

        report
    }

    /// Hash of the replicated state (registry and height field).
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.registry.state_hash().hash(&mut hasher);
        self.terrain.hash(&mut hasher);
        hasher.finish()
    }

    /// Serialize the replicated state (registry and height field).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            registry: &'a EntityRegistry,
            terrain: &'a HeightMap,
        }
        bincode::serialize(&SnapshotRef {
            registry: &self.registry,
            terrain: &self.terrain,
        })
        .map_err(|e| GatewayError::malformed("Snapshot", format!("failed to serialize: {e}")))
    }

    /// Replace the replicated state with a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot; the current
    /// state is left untouched.
    pub fn restore(&mut self, data: &[u8]) -> Result<()> {
        let snapshot: Snapshot = bincode::deserialize(data)
            .map_err(|e| GatewayError::malformed("Snapshot", format!("failed to deserialize: {e}")))?;
        self.registry = snapshot.registry;
        self.terrain = snapshot.terrain;
        Ok(())
    }

    // Reference resolution shared by the verb modules. Dead or unknown
    // references are InvalidReference, denied control is Unauthorized.

    pub(crate) fn own_ally_team(&self, ctx: &CallerContext) -> Option<AllyTeamId> {
        ctx.ctrl_team()
            .and_then(|team| self.registry.ally_team_of(team))
    }

    pub(crate) fn live_unit(&self, verb: &'static str, id: UnitId) -> Result<&Unit> {
        self.registry
            .unit(id)
            .ok_or_else(|| invalid_reference(verb, "unit", id))
    }

    pub(crate) fn controlled_unit(
        &self,
        ctx: &CallerContext,
        verb: &'static str,
        id: UnitId,
    ) -> Result<&Unit> {
        let unit = self.live_unit(verb, id)?;
        ctx.require_team(verb, unit.team)?;
        Ok(unit)
    }

    pub(crate) fn controlled_unit_mut(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        id: UnitId,
    ) -> Result<&mut Unit> {
        self.controlled_unit(ctx, verb, id)?;
        self.registry
            .unit_mut(id)
            .ok_or_else(|| invalid_reference(verb, "unit", id))
    }

    pub(crate) fn controlled_feature_mut(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        id: FeatureId,
    ) -> Result<&mut Feature> {
        let own_ally = self.own_ally_team(ctx);
        let feature = self
            .registry
            .feature_mut(id)
            .ok_or_else(|| invalid_reference(verb, "feature", id))?;
        if !ctx.can_control_ally_team(feature.ally_team, own_ally) {
            tracing::debug!(verb, feature = id, "feature control denied");
            return Err(GatewayError::Unauthorized { verb });
        }
        Ok(feature)
    }

    pub(crate) fn controlled_projectile_mut(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        id: ProjectileId,
    ) -> Result<&mut Projectile> {
        let own_ally = self.own_ally_team(ctx);
        let projectile = self
            .registry
            .projectiles
            .get_mut(&id)
            .ok_or_else(|| invalid_reference(verb, "projectile", id))?;
        if !ctx.can_control_ally_team(projectile.ally_team, own_ally) {
            tracing::debug!(verb, projectile = id, "projectile control denied");
            return Err(GatewayError::Unauthorized { verb });
        }
        Ok(projectile)
    }

    pub(crate) fn controlled_team_mut(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        team: TeamId,
    ) -> Result<&mut Team> {
        ctx.require_team(verb, team)?;
        self.registry
            .team_mut(team)
            .ok_or_else(|| invalid_reference(verb, "team", team))
    }

    pub(crate) fn require_full(ctx: &CallerContext, verb: &'static str) -> Result<()> {
        if ctx.is_full() {
            Ok(())
        } else {
            tracing::debug!(verb, scope = ?ctx.scope, "full control required");
            Err(GatewayError::Unauthorized { verb })
        }
    }
}

impl fmt::Debug for SyncedGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedGateway")
            .field("frame", &self.registry.frame)
            .field("units", &self.registry.units.len())
            .field("features", &self.registry.features.len())
            .field("projectiles", &self.registry.projectiles.len())
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

pub(crate) fn invalid_reference(verb: &'static str, kind: &'static str, id: u32) -> GatewayError {
    tracing::debug!(verb, kind, id, "invalid reference");
    GatewayError::InvalidReference {
        verb,
        kind,
        id: i64::from(id),
    }
}
