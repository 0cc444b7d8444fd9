//! Feature verbs.
//!
//! Features are controlled through their ally-team; ownerless features
//! (team -1) need full control.

use std::rc::Rc;

use crate::auth::CallerContext;
use crate::components::{Feature, FeatureId, TeamId};
use crate::defs::DefKey;
use crate::error::{GatewayError, Result};
use crate::guard::RecursionCategory;
use crate::math::{Fixed, Vec3Fixed};
use crate::services::EntityRef;

use super::{invalid_reference, SyncedGateway};

/// Team id meaning "no owner".
const NO_TEAM: i64 = -1;

/// Parameters of `CreateFeature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpawn {
    /// Feature definition.
    pub def: DefKey,
    /// World position.
    pub position: Vec3Fixed,
    /// Heading in engine angle units.
    pub heading: i32,
    /// Owning team; -1 for none. Defaults to the caller's team, or none for
    /// callers without one.
    pub team: Option<i64>,
    /// Requested id.
    pub feature_id: Option<FeatureId>,
}

impl FeatureSpawn {
    /// Spawn `def` at `position` with default heading and owner.
    #[must_use]
    pub const fn new(def: DefKey, position: Vec3Fixed) -> Self {
        Self {
            def,
            position,
            heading: 0,
            team: None,
            feature_id: None,
        }
    }
}

/// Arguments of `SetFeatureResources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureResources {
    /// Reclaimable metal, clamped to the definition value.
    pub metal: Fixed,
    /// Reclaimable energy, clamped to the definition value.
    pub energy: Fixed,
    /// Reclaim time, clamped to `[1, 1e6]`.
    pub reclaim_time: Option<Fixed>,
    /// Fraction left to reclaim, clamped to `[0, 1]`.
    pub reclaim_left: Option<Fixed>,
    /// Replacement definition metal.
    pub def_metal: Option<Fixed>,
    /// Replacement definition energy.
    pub def_energy: Option<Fixed>,
}

impl FeatureResources {
    fn apply(self, feature: &mut Feature) {
        if let Some(metal) = self.def_metal {
            feature.def_resources.metal = metal.max(Fixed::ZERO);
        }
        if let Some(energy) = self.def_energy {
            feature.def_resources.energy = energy.max(Fixed::ZERO);
        }
        feature.resources.metal = self.metal.clamp(Fixed::ZERO, feature.def_resources.metal);
        feature.resources.energy = self.energy.clamp(Fixed::ZERO, feature.def_resources.energy);
        if let Some(time) = self.reclaim_time {
            feature.reclaim_time = time.clamp(Fixed::from_num(1), Fixed::from_num(1_000_000));
        }
        if let Some(left) = self.reclaim_left {
            feature.reclaim_left = left.clamp(Fixed::ZERO, Fixed::from_num(1));
        }
    }
}

impl SyncedGateway {
    /// Create a feature.
    ///
    /// Returns `None` for an unknown definition, a team id past the last
    /// team or a requested id that is taken.
    ///
    /// # Errors
    ///
    /// Malformed if the caller may not create for the resolved owner;
    /// [`GatewayError::RecursionLimitExceeded`] when nested too deeply.
    pub fn create_feature(
        &mut self,
        ctx: &CallerContext,
        spawn: FeatureSpawn,
    ) -> Result<Option<FeatureId>> {
        const VERB: &str = "CreateFeature";
        let Some((def_id, def)) = self
            .defs
            .feature(&spawn.def)
            .map(|(id, def)| (id, def.clone()))
        else {
            tracing::debug!(def = ?spawn.def, "unknown feature definition");
            return Ok(None);
        };

        let requested = spawn
            .team
            .or_else(|| ctx.ctrl_team().map(i64::from))
            .unwrap_or(NO_TEAM)
            .max(NO_TEAM);
        let team = if requested == NO_TEAM {
            None
        } else {
            match TeamId::try_from(requested) {
                Ok(team) if self.registry.team(team).is_some() => Some(team),
                _ => return Ok(None),
            }
        };
        let ally_team = team.and_then(|team| self.registry.ally_team_of(team));
        if !ctx.can_control_ally_team(ally_team, self.own_ally_team(ctx)) {
            return Err(GatewayError::malformed(
                VERB,
                format!("bad team permission ({requested})"),
            ));
        }

        let _token = self.guard.enter(VERB, RecursionCategory::CreateFeature)?;
        self.sync.assert_synced("CreateFeature", &(spawn.position, spawn.heading, requested));
        let Some(id) = self.registry.feature_ids.allocate(spawn.feature_id) else {
            tracing::debug!(requested = ?spawn.feature_id, "feature id unavailable");
            return Ok(None);
        };
        let mut feature = Feature::from_def(id, def_id, &def, team, ally_team);
        feature.position = spawn.position;
        feature.heading = spawn.heading;
        self.registry.features.insert(id, feature);

        tracing::debug!(feature = id, ?team, def = %def.name, "feature created");
        let callins = Rc::clone(&self.callins);
        callins.feature_created(self, id);
        Ok(Some(id))
    }

    /// Destroy a feature.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature;
    /// [`GatewayError::RecursionLimitExceeded`] when nested too deeply.
    pub fn destroy_feature(&mut self, ctx: &CallerContext, id: FeatureId) -> Result<()> {
        const VERB: &str = "DestroyFeature";
        self.controlled_feature_mut(ctx, VERB, id)?;
        let _token = self.guard.enter(VERB, RecursionCategory::DestroyFeature)?;
        self.sync.assert_synced("DestroyFeature", &id);
        if let Some(feature) = self.registry.features.get_mut(&id) {
            feature.dead = true;
        }

        let callins = Rc::clone(&self.callins);
        callins.feature_destroyed(self, id);

        if self.registry.features.remove(&id).is_some() {
            let reusable_at = self.registry.frame + u64::from(self.config.id_reclaim_delay);
            self.registry.feature_ids.release(id, Some(reusable_at));
            tracing::debug!(feature = id, "feature destroyed");
        }
        Ok(())
    }

    /// Give a feature to another team.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature or an invalid team.
    pub fn transfer_feature(&mut self, ctx: &CallerContext, id: FeatureId, team: TeamId) -> Result<()> {
        const VERB: &str = "TransferFeature";
        let ally_team = self
            .registry
            .ally_team_of(team)
            .ok_or_else(|| invalid_reference(VERB, "team", team))?;
        let feature = self.controlled_feature_mut(ctx, VERB, id)?;
        feature.team = Some(team);
        feature.ally_team = Some(ally_team);
        Ok(())
    }

    /// Set a feature's health, capped at its maximum.
    ///
    /// With `check_destruction` a feature left without health is destroyed.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_health(
        &mut self,
        ctx: &CallerContext,
        id: FeatureId,
        health: Fixed,
        check_destruction: bool,
    ) -> Result<()> {
        let feature = self.controlled_feature_mut(ctx, "SetFeatureHealth", id)?;
        feature.health = health.min(feature.max_health);
        if check_destruction && feature.health <= Fixed::ZERO {
            self.destroy_feature(ctx, id)?;
        }
        Ok(())
    }

    /// Set a feature's maximum health (at least 0.1), capping its health.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_max_health(&mut self, ctx: &CallerContext, id: FeatureId, value: Fixed) -> Result<()> {
        let feature = self.controlled_feature_mut(ctx, "SetFeatureMaxHealth", id)?;
        feature.max_health = value.max(Fixed::from_num(0.1));
        feature.health = feature.health.min(feature.max_health);
        Ok(())
    }

    /// Set a feature's reclaimable resources.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_resources(
        &mut self,
        ctx: &CallerContext,
        id: FeatureId,
        resources: FeatureResources,
    ) -> Result<()> {
        let feature = self.controlled_feature_mut(ctx, "SetFeatureResources", id)?;
        resources.apply(feature);
        Ok(())
    }

    /// Teleport a feature.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_position(
        &mut self,
        ctx: &CallerContext,
        id: FeatureId,
        position: Vec3Fixed,
    ) -> Result<()> {
        let feature = self.controlled_feature_mut(ctx, "SetFeaturePosition", id)?;
        feature.position = position;
        self.sync.assert_synced("SetFeaturePosition", &position);
        self.services.move_entity(EntityRef::Feature(id), position);
        Ok(())
    }

    /// Set a feature's velocity, clamped per component to the maximum unit
    /// speed.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_velocity(
        &mut self,
        ctx: &CallerContext,
        id: FeatureId,
        velocity: Vec3Fixed,
    ) -> Result<()> {
        let limit = self.config.max_unit_speed;
        let feature = self.controlled_feature_mut(ctx, "SetFeatureVelocity", id)?;
        feature.velocity = velocity.clamp_components(limit);
        Ok(())
    }

    /// Set a feature's pitch, yaw and roll.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled feature.
    pub fn set_feature_rotation(
        &mut self,
        ctx: &CallerContext,
        id: FeatureId,
        rotation: Vec3Fixed,
    ) -> Result<()> {
        let feature = self.controlled_feature_mut(ctx, "SetFeatureRotation", id)?;
        feature.rotation = rotation;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::defs::DefRegistry;
    use crate::ledger::TeamLedger;
    use crate::registry::EntityRegistry;
    use crate::services::SyncedCallins;
    use crate::terrain::HeightMap;

    fn fx(v: i32) -> Fixed {
        Fixed::from_num(v)
    }

    fn gateway() -> SyncedGateway {
        let mut registry = EntityRegistry::new(2);
        registry.add_team(0, TeamLedger::default(), false);
        registry.add_team(1, TeamLedger::default(), false);
        let defs = DefRegistry::from_ron_str(
            r#"(features: [(name: "rock", max_health: 50, metal: 30, energy: 10)])"#,
        )
        .unwrap();
        SyncedGateway::new(
            GatewayConfig::default(),
            defs,
            registry,
            HeightMap::flat(4, 4, 8, Fixed::ZERO),
        )
    }

    fn rock(team: Option<i64>) -> FeatureSpawn {
        FeatureSpawn {
            team,
            ..FeatureSpawn::new(DefKey::Name("rock".into()), Vec3Fixed::ZERO)
        }
    }

    #[test]
    fn test_create_feature_owner_rules() {
        let mut gateway = gateway();
        let full = CallerContext::full();

        let id = gateway.create_feature(&full, rock(None)).unwrap().unwrap();
        assert_eq!(gateway.registry().feature(id).unwrap().team, None);

        let clamped = gateway.create_feature(&full, rock(Some(-7))).unwrap().unwrap();
        assert_eq!(gateway.registry().feature(clamped).unwrap().ally_team, None);

        assert_eq!(gateway.create_feature(&full, rock(Some(2))), Ok(None));

        let unknown = FeatureSpawn::new(DefKey::Name("tree".into()), Vec3Fixed::ZERO);
        assert_eq!(gateway.create_feature(&full, unknown), Ok(None));
    }

    #[test]
    fn test_create_feature_for_foreign_team_is_fatal() {
        let mut gateway = gateway();
        let ctx = CallerContext::team(0);
        let own = gateway.create_feature(&ctx, rock(None)).unwrap().unwrap();
        assert_eq!(gateway.registry().feature(own).unwrap().team, Some(0));

        assert!(gateway.create_feature(&ctx, rock(Some(1))).unwrap_err().is_fatal());
        assert!(gateway.create_feature(&ctx, rock(Some(-1))).unwrap_err().is_fatal());
    }

    #[derive(Default)]
    struct Recorder {
        destroyed: RefCell<Vec<(FeatureId, bool)>>,
    }

    impl SyncedCallins for Recorder {
        fn feature_destroyed(&self, gateway: &mut SyncedGateway, feature: FeatureId) {
            let visible = gateway.registry().feature(feature).is_some();
            self.destroyed.borrow_mut().push((feature, visible));
        }
    }

    #[test]
    fn test_destroy_feature_notifies_after_marking_dead() {
        let recorder = Rc::new(Recorder::default());
        let mut gateway = gateway().with_callins(recorder.clone());
        let full = CallerContext::full();
        let id = gateway.create_feature(&full, rock(None)).unwrap().unwrap();
        gateway.destroy_feature(&full, id).unwrap();
        assert_eq!(*recorder.destroyed.borrow(), vec![(id, false)]);
        assert!(gateway.destroy_feature(&full, id).is_err());
    }

    #[test]
    fn test_health_destruction_check() {
        let mut gateway = gateway();
        let full = CallerContext::full();
        let id = gateway.create_feature(&full, rock(None)).unwrap().unwrap();
        gateway.set_feature_health(&full, id, fx(500), false).unwrap();
        assert_eq!(gateway.registry().feature(id).unwrap().health, fx(50));
        gateway.set_feature_health(&full, id, fx(0), false).unwrap();
        assert!(gateway.registry().feature(id).is_some());
        gateway.set_feature_health(&full, id, fx(-1), true).unwrap();
        assert!(gateway.registry().feature(id).is_none());
    }

    #[test]
    fn test_resources_clamped_to_def() {
        let mut gateway = gateway();
        let full = CallerContext::full();
        let id = gateway.create_feature(&full, rock(None)).unwrap().unwrap();
        let resources = FeatureResources {
            metal: fx(100),
            energy: fx(-5),
            reclaim_time: Some(Fixed::ZERO),
            reclaim_left: Some(fx(3)),
            def_metal: None,
            def_energy: Some(fx(-2)),
        };
        gateway.set_feature_resources(&full, id, resources).unwrap();
        let feature = gateway.registry().feature(id).unwrap();
        assert_eq!(feature.resources.metal, fx(30));
        assert_eq!(feature.resources.energy, Fixed::ZERO);
        assert_eq!(feature.def_resources.energy, Fixed::ZERO);
        assert_eq!(feature.reclaim_time, fx(1));
        assert_eq!(feature.reclaim_left, fx(1));
    }

    #[test]
    fn test_transfer_and_control() {
        let mut gateway = gateway();
        let id = gateway
            .create_feature(&CallerContext::team(0), rock(None))
            .unwrap()
            .unwrap();
        let enemy = CallerContext::team(1);
        assert!(!gateway.set_feature_max_health(&enemy, id, fx(5)).unwrap_err().is_fatal());

        gateway.transfer_feature(&CallerContext::team(0), id, 1).unwrap();
        gateway.set_feature_max_health(&enemy, id, fx(5)).unwrap();
        assert_eq!(gateway.registry().feature(id).unwrap().health, fx(5));
        assert!(gateway.transfer_feature(&enemy, id, 9).is_err());
    }
}
