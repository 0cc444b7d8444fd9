//! Resource ledger verbs.
//!
//! Team verbs act on a team's [`TeamLedger`](crate::ledger::TeamLedger)
//! directly; unit verbs go through the unit's
//! [`UnitEconomy`](crate::ledger::UnitEconomy) so its share of the traffic
//! is recorded. A failed use reports [`GatewayError::InsufficientResource`]
//! and leaves the stock untouched.

use crate::auth::CallerContext;
use crate::components::{TeamId, UnitId};
use crate::error::{GatewayError, Result};
use crate::ledger::{self, ResourceKind, ResourcePack};
use crate::math::Fixed;

use super::{invalid_reference, SyncedGateway};

/// Ledger field addressed by `SetTeamResource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamResourceField {
    /// Current stock of a resource.
    Current(ResourceKind),
    /// Storage cap of a resource.
    Storage(ResourceKind),
}

impl TeamResourceField {
    /// Parse a script field name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "m" | "metal" => Some(Self::Current(ResourceKind::Metal)),
            "e" | "energy" => Some(Self::Current(ResourceKind::Energy)),
            "ms" | "metalStorage" => Some(Self::Storage(ResourceKind::Metal)),
            "es" | "energyStorage" => Some(Self::Storage(ResourceKind::Energy)),
            _ => None,
        }
    }
}

/// Replacement build figures for `SetUnitCosts`; absent fields are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostsChange {
    /// New build time.
    pub build_time: Option<Fixed>,
    /// New metal cost.
    pub metal: Option<Fixed>,
    /// New energy cost.
    pub energy: Option<Fixed>,
}

impl SyncedGateway {
    /// Give a team resources; overflow beyond storage becomes excess.
    ///
    /// # Errors
    ///
    /// Silent for an invalid or uncontrolled team.
    pub fn add_team_resource(
        &mut self,
        ctx: &CallerContext,
        team: TeamId,
        kind: ResourceKind,
        amount: Fixed,
    ) -> Result<()> {
        let team = self.controlled_team_mut(ctx, "AddTeamResource", team)?;
        team.ledger.add(kind, amount);
        Ok(())
    }

    /// Spend one resource from a team if it has enough.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InsufficientResource`] if the stock does not cover
    /// the amount; silent for an invalid or uncontrolled team.
    pub fn use_team_resource(
        &mut self,
        ctx: &CallerContext,
        team: TeamId,
        kind: ResourceKind,
        amount: Fixed,
    ) -> Result<()> {
        const VERB: &str = "UseTeamResource";
        let team = self.controlled_team_mut(ctx, VERB, team)?;
        if team.ledger.use_single(kind, amount) {
            Ok(())
        } else {
            Err(GatewayError::InsufficientResource { verb: VERB })
        }
    }

    /// Spend metal and energy from a team, both or neither.
    ///
    /// # Errors
    ///
    /// As [`Self::use_team_resource`].
    pub fn use_team_resources(
        &mut self,
        ctx: &CallerContext,
        team: TeamId,
        amount: ResourcePack,
    ) -> Result<()> {
        const VERB: &str = "UseTeamResource";
        let team = self.controlled_team_mut(ctx, VERB, team)?;
        if team.ledger.use_pack(amount) {
            Ok(())
        } else {
            Err(GatewayError::InsufficientResource { verb: VERB })
        }
    }

    /// Overwrite a team's stock or storage cap.
    ///
    /// Negative values are treated as zero; the stock always ends up within
    /// `[0, storage]`.
    ///
    /// # Errors
    ///
    /// Silent for an invalid or uncontrolled team.
    pub fn set_team_resource(
        &mut self,
        ctx: &CallerContext,
        team: TeamId,
        field: TeamResourceField,
        value: Fixed,
    ) -> Result<()> {
        let team = self.controlled_team_mut(ctx, "SetTeamResource", team)?;
        let value = value.max(Fixed::ZERO);
        match field {
            TeamResourceField::Current(kind) => team.ledger.set(kind, value),
            TeamResourceField::Storage(kind) => team.ledger.set_storage(kind, value),
        }
        Ok(())
    }

    /// Set the level above which a team shares a resource with its allies.
    ///
    /// # Errors
    ///
    /// Silent for an invalid or uncontrolled team.
    pub fn set_team_share_level(
        &mut self,
        ctx: &CallerContext,
        team: TeamId,
        kind: ResourceKind,
        level: Fixed,
    ) -> Result<()> {
        let team = self.controlled_team_mut(ctx, "SetTeamShareLevel", team)?;
        team.ledger.set_share_level(kind, level);
        Ok(())
    }

    /// Move resources from one team to another.
    ///
    /// The amount is clamped to the source's stock and the transfer only
    /// happens if the `allow_resource_transfer` callin approves. Returns the
    /// amount moved.
    ///
    /// # Errors
    ///
    /// Malformed for invalid teams; silent if the caller does not control
    /// the source team.
    pub fn share_team_resource(
        &mut self,
        ctx: &CallerContext,
        src: TeamId,
        dst: TeamId,
        kind: ResourceKind,
        amount: Fixed,
    ) -> Result<Fixed> {
        const VERB: &str = "ShareTeamResource";
        for team in [src, dst] {
            if self.registry.team(team).is_none() {
                return Err(GatewayError::malformed(VERB, format!("invalid team {team}")));
            }
        }
        ctx.require_team(VERB, src)?;
        if src == dst {
            return Ok(Fixed::ZERO);
        }

        let amount = self
            .registry
            .team(src)
            .map_or(Fixed::ZERO, |team| team.ledger.shareable(kind, amount));
        let callins = std::rc::Rc::clone(&self.callins);
        if !callins.allow_resource_transfer(src, dst, kind, amount) {
            tracing::debug!(src, dst, ?kind, "resource transfer vetoed");
            return Ok(Fixed::ZERO);
        }

        self.sync.assert_synced("ShareTeamResource", &(src, dst, amount.to_bits()));
        let (from, to) = self
            .registry
            .two_teams_mut(src, dst)
            .ok_or_else(|| invalid_reference(VERB, "team", dst))?;
        ledger::transfer(&mut from.ledger, &mut to.ledger, kind, amount);
        Ok(amount)
    }

    /// Produce resources on behalf of a unit.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn add_unit_resource(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        kind: ResourceKind,
        amount: Fixed,
    ) -> Result<()> {
        const VERB: &str = "AddUnitResource";
        self.controlled_unit(ctx, VERB, unit)?;
        let (unit, team) = self
            .registry
            .unit_and_ledger_mut(unit)
            .ok_or_else(|| invalid_reference(VERB, "unit", unit))?;
        unit.economy.add(team, kind, amount.max(Fixed::ZERO));
        Ok(())
    }

    /// Spend one resource on behalf of a unit.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InsufficientResource`] if the team's stock does not
    /// cover the amount; silent for a dead or uncontrolled unit.
    pub fn use_unit_resource(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        kind: ResourceKind,
        amount: Fixed,
    ) -> Result<()> {
        const VERB: &str = "UseUnitResource";
        self.controlled_unit(ctx, VERB, unit)?;
        let (unit, team) = self
            .registry
            .unit_and_ledger_mut(unit)
            .ok_or_else(|| invalid_reference(VERB, "unit", unit))?;
        if unit.economy.use_single(team, kind, amount.max(Fixed::ZERO)) {
            Ok(())
        } else {
            Err(GatewayError::InsufficientResource { verb: VERB })
        }
    }

    /// Spend metal and energy on behalf of a unit, both or neither.
    ///
    /// Demand is always recorded in the team's pull, whether or not the use
    /// succeeds.
    ///
    /// # Errors
    ///
    /// As [`Self::use_unit_resource`].
    pub fn use_unit_resources(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        amount: ResourcePack,
    ) -> Result<()> {
        const VERB: &str = "UseUnitResource";
        self.controlled_unit(ctx, VERB, unit)?;
        let (unit, team) = self
            .registry
            .unit_and_ledger_mut(unit)
            .ok_or_else(|| invalid_reference(VERB, "unit", unit))?;
        if unit.economy.use_pack(team, amount) {
            Ok(())
        } else {
            Err(GatewayError::InsufficientResource { verb: VERB })
        }
    }

    /// Set one passive resourcing rate of a unit by its `[u|c][u|m][m|e]` key.
    ///
    /// Unknown keys are ignored. Returns whether the key was recognised.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_resourcing(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        key: &str,
        value: Fixed,
    ) -> Result<bool> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitResourcing", unit)?;
        Ok(unit.economy.resourcing.set_by_key(key, value))
    }

    /// Change the storage a unit contributes to its team.
    ///
    /// The team's cap moves by the difference and its stock is re-clamped.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_storage(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        kind: ResourceKind,
        value: Fixed,
    ) -> Result<()> {
        const VERB: &str = "SetUnitStorage";
        self.controlled_unit(ctx, VERB, unit)?;
        let (unit, team) = self
            .registry
            .unit_and_ledger_mut(unit)
            .ok_or_else(|| invalid_reference(VERB, "unit", unit))?;
        let value = value.max(Fixed::ZERO);
        let slot = unit.economy.storage.get_mut(kind);
        let delta = value - *slot;
        *slot = value;
        team.adjust_storage(kind, delta);
        Ok(())
    }

    /// Change a unit's build time and costs; each is at least 1.
    ///
    /// # Errors
    ///
    /// Silent for a dead or uncontrolled unit.
    pub fn set_unit_costs(
        &mut self,
        ctx: &CallerContext,
        unit: UnitId,
        change: CostsChange,
    ) -> Result<()> {
        let unit = self.controlled_unit_mut(ctx, "SetUnitCosts", unit)?;
        let one = Fixed::from_num(1);
        if let Some(build_time) = change.build_time {
            unit.costs.build_time = build_time.max(one);
        }
        if let Some(metal) = change.metal {
            unit.costs.metal = metal.max(one);
        }
        if let Some(energy) = change.energy {
            unit.costs.energy = energy.max(one);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::components::Unit;
    use crate::config::GatewayConfig;
    use crate::defs::{DefRegistry, UnitDef};
    use crate::ledger::TeamLedger;
    use crate::registry::EntityRegistry;
    use crate::services::SyncedCallins;
    use crate::terrain::HeightMap;

    fn fx(v: i32) -> Fixed {
        Fixed::from_num(v)
    }

    fn gateway() -> SyncedGateway {
        let mut registry = EntityRegistry::new(2);
        for ally in [0, 1] {
            registry.add_team(
                ally,
                TeamLedger::new(ResourcePack::new(fx(100), fx(50)), ResourcePack::new(fx(1000), fx(1000))),
                false,
            );
        }
        let def: UnitDef = ron::from_str(r#"(name: "silo", max_health: 10, metal_storage: 200)"#).unwrap();
        let mut unit = Unit::from_def(0, 1, &def, 0, 0, 2);
        unit.economy.storage = ResourcePack::new(fx(200), Fixed::ZERO);
        registry.units.insert(0, unit);
        registry.unit_ids.allocate(Some(0));
        SyncedGateway::new(
            GatewayConfig::default(),
            DefRegistry::default(),
            registry,
            HeightMap::flat(4, 4, 8, Fixed::ZERO),
        )
    }

    fn ledger(gateway: &SyncedGateway, team: TeamId) -> &TeamLedger {
        &gateway.registry().team(team).unwrap().ledger
    }

    #[test]
    fn test_use_team_resource_check_then_use() {
        let mut gateway = gateway();
        let ctx = CallerContext::full();
        gateway
            .use_team_resource(&ctx, 0, ResourceKind::Metal, fx(60))
            .unwrap();
        let err = gateway
            .use_team_resource(&ctx, 0, ResourceKind::Metal, fx(60))
            .unwrap_err();
        assert_eq!(err, GatewayError::InsufficientResource { verb: "UseTeamResource" });
        assert_eq!(ledger(&gateway, 0).current.metal, fx(40));
        assert_eq!(ledger(&gateway, 0).pull.metal, fx(120));
    }

    #[test]
    fn test_set_team_resource_fields() {
        let mut gateway = gateway();
        let ctx = CallerContext::full();
        let storage = TeamResourceField::from_name("metalStorage").unwrap();
        gateway.set_team_resource(&ctx, 0, storage, fx(30)).unwrap();
        assert_eq!(ledger(&gateway, 0).current.metal, fx(30));

        let current = TeamResourceField::from_name("e").unwrap();
        gateway.set_team_resource(&ctx, 0, current, fx(-5)).unwrap();
        assert_eq!(ledger(&gateway, 0).current.energy, Fixed::ZERO);
        assert!(TeamResourceField::from_name("x").is_none());
    }

    #[test]
    fn test_restricted_caller_cannot_touch_other_team() {
        let mut gateway = gateway();
        let ctx = CallerContext::team(1);
        let err = gateway
            .add_team_resource(&ctx, 0, ResourceKind::Metal, fx(10))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(ledger(&gateway, 0).current.metal, fx(100));
    }

    #[test]
    fn test_share_clamps_to_stock() {
        let mut gateway = gateway();
        let ctx = CallerContext::team(0);
        let moved = gateway
            .share_team_resource(&ctx, 0, 1, ResourceKind::Metal, fx(500))
            .unwrap();
        assert_eq!(moved, fx(100));
        assert_eq!(ledger(&gateway, 0).sent.metal, fx(100));
        assert_eq!(ledger(&gateway, 1).received.metal, fx(100));
        assert_eq!(ledger(&gateway, 1).current.metal, fx(200));
    }

    #[test]
    fn test_share_invalid_team_is_fatal() {
        let mut gateway = gateway();
        let err = gateway
            .share_team_resource(&CallerContext::full(), 0, 9, ResourceKind::Energy, fx(1))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_share_vetoed_by_callin() {
        struct Veto(Cell<u32>);
        impl SyncedCallins for Veto {
            fn allow_resource_transfer(&self, _: TeamId, _: TeamId, _: ResourceKind, _: Fixed) -> bool {
                self.0.set(self.0.get() + 1);
                false
            }
        }

        let veto = Rc::new(Veto(Cell::new(0)));
        let mut gateway = gateway().with_callins(veto.clone());
        let moved = gateway
            .share_team_resource(&CallerContext::full(), 0, 1, ResourceKind::Metal, fx(10))
            .unwrap();
        assert_eq!(moved, Fixed::ZERO);
        assert_eq!(veto.0.get(), 1);
        assert_eq!(ledger(&gateway, 0).current.metal, fx(100));
    }

    #[test]
    fn test_unit_pack_is_all_or_nothing() {
        let mut gateway = gateway();
        let ctx = CallerContext::full();
        let err = gateway
            .use_unit_resources(&ctx, 0, ResourcePack::new(fx(10), fx(60)))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientResource { .. }));
        assert_eq!(ledger(&gateway, 0).current, ResourcePack::new(fx(100), fx(50)));
        assert_eq!(ledger(&gateway, 0).pull, ResourcePack::new(fx(10), fx(60)));

        gateway
            .use_unit_resources(&ctx, 0, ResourcePack::new(fx(10), fx(20)))
            .unwrap();
        assert_eq!(ledger(&gateway, 0).current, ResourcePack::new(fx(90), fx(30)));
        assert_eq!(gateway.registry().units[&0].economy.used.energy, fx(20));
    }

    #[test]
    fn test_unit_storage_moves_team_cap() {
        let mut gateway = gateway();
        let ctx = CallerContext::full();
        gateway
            .set_unit_storage(&ctx, 0, ResourceKind::Metal, fx(50))
            .unwrap();
        assert_eq!(ledger(&gateway, 0).storage.metal, fx(850));
        assert_eq!(gateway.registry().units[&0].economy.storage.metal, fx(50));
    }

    #[test]
    fn test_unit_costs_floor_at_one() {
        let mut gateway = gateway();
        let change = CostsChange {
            build_time: Some(fx(0)),
            metal: Some(fx(75)),
            energy: None,
        };
        gateway.set_unit_costs(&CallerContext::full(), 0, change).unwrap();
        let costs = gateway.registry().units[&0].costs;
        assert_eq!(costs.build_time, fx(1));
        assert_eq!(costs.metal, fx(75));
        assert_eq!(costs.energy, fx(1));
    }

    #[test]
    fn test_unit_resourcing_halves() {
        let mut gateway = gateway();
        let ctx = CallerContext::full();
        assert!(gateway.set_unit_resourcing(&ctx, 0, "ume", fx(10)).unwrap());
        assert!(!gateway.set_unit_resourcing(&ctx, 0, "xyz", fx(10)).unwrap());
        let rates = gateway.registry().units[&0].economy.resourcing;
        assert_eq!(rates.uncond_make.energy, fx(5));
    }
}
