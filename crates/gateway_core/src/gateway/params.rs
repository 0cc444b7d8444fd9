//! Rules param verbs.
//!
//! Writes need control of the owner. Reads are filtered by how the reader
//! relates to the owner: full-control readers and the owner's own ally-team
//! see everything, allies see `allied` params, and everyone else sees what
//! the owner's visibility to their ally-team allows.

use crate::auth::{is_player_synced, CallerContext};
use crate::components::{AllyTeamId, FeatureId, PlayerId, TeamId, UnitId};
use crate::error::{GatewayError, Result};
use crate::los::LosBits;
use crate::rules_params::{LosAccess, Observer, RulesParamValue, RulesParams};

use super::{invalid_reference, SyncedGateway};

/// Owner of a rules param store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamOwner {
    /// Game-wide params.
    Game,
    /// A team.
    Team(TeamId),
    /// A player.
    Player(PlayerId),
    /// A unit.
    Unit(UnitId),
    /// A feature.
    Feature(FeatureId),
}

impl ParamOwner {
    const fn set_verb(self) -> &'static str {
        match self {
            Self::Game => "SetGameRulesParam",
            Self::Team(_) => "SetTeamRulesParam",
            Self::Player(_) => "SetPlayerRulesParam",
            Self::Unit(_) => "SetUnitRulesParam",
            Self::Feature(_) => "SetFeatureRulesParam",
        }
    }

    const fn get_verb(self) -> &'static str {
        match self {
            Self::Game => "GetGameRulesParam",
            Self::Team(_) => "GetTeamRulesParam",
            Self::Player(_) => "GetPlayerRulesParam",
            Self::Unit(_) => "GetUnitRulesParam",
            Self::Feature(_) => "GetFeatureRulesParam",
        }
    }
}

impl SyncedGateway {
    /// Set, update or delete (`value = None`) a rules param.
    ///
    /// `los = None` keeps an existing entry's visibility, and new entries
    /// default to private.
    ///
    /// # Errors
    ///
    /// Malformed for an invalid team id; silent for other invalid owners
    /// and owners the caller does not control.
    pub fn set_rules_param(
        &mut self,
        ctx: &CallerContext,
        owner: ParamOwner,
        key: &str,
        value: Option<RulesParamValue>,
        los: Option<LosAccess>,
    ) -> Result<()> {
        let verb = owner.set_verb();
        let params = self.params_for_write(ctx, verb, owner)?;
        params.set(key, value, los);
        Ok(())
    }

    /// Read a rules param as the caller sees it.
    ///
    /// Returns `None` for missing keys and params hidden from the caller.
    ///
    /// # Errors
    ///
    /// Silent for an invalid owner.
    pub fn get_rules_param(
        &self,
        ctx: &CallerContext,
        owner: ParamOwner,
        key: &str,
    ) -> Result<Option<RulesParamValue>> {
        let (params, observer) = self.params_for_read(ctx, owner)?;
        Ok(params.get(key, observer).cloned())
    }

    /// All rules params of an owner visible to the caller, in key order.
    ///
    /// # Errors
    ///
    /// Silent for an invalid owner.
    pub fn get_rules_params(
        &self,
        ctx: &CallerContext,
        owner: ParamOwner,
    ) -> Result<Vec<(String, RulesParamValue)>> {
        let (params, observer) = self.params_for_read(ctx, owner)?;
        Ok(params
            .visible(observer)
            .map(|(key, value)| (key.to_owned(), value.clone()))
            .collect())
    }

    fn params_for_write(
        &mut self,
        ctx: &CallerContext,
        verb: &'static str,
        owner: ParamOwner,
    ) -> Result<&mut RulesParams> {
        match owner {
            ParamOwner::Game => {
                Self::require_full(ctx, verb)?;
                Ok(&mut self.registry.game_rules)
            }
            ParamOwner::Team(team) => {
                if self.registry.team(team).is_none() {
                    return Err(GatewayError::malformed(verb, format!("Bad teamID: {team}")));
                }
                Ok(&mut self.controlled_team_mut(ctx, verb, team)?.rules_params)
            }
            ParamOwner::Player(player) => {
                let host_demo = self.config.host_demo;
                let entry = self
                    .registry
                    .player_mut(player)
                    .filter(|p| is_player_synced(host_demo, p.from_demo))
                    .ok_or_else(|| invalid_reference(verb, "player", player))?;
                ctx.require_team(verb, entry.team)?;
                Ok(&mut entry.rules_params)
            }
            ParamOwner::Unit(unit) => {
                Ok(&mut self.controlled_unit_mut(ctx, verb, unit)?.rules_params)
            }
            ParamOwner::Feature(feature) => {
                Ok(&mut self.controlled_feature_mut(ctx, verb, feature)?.rules_params)
            }
        }
    }

    fn params_for_read(
        &self,
        ctx: &CallerContext,
        owner: ParamOwner,
    ) -> Result<(&RulesParams, Observer)> {
        let verb = owner.get_verb();
        let reader = self.own_ally_team(ctx);
        match owner {
            ParamOwner::Game => Ok((&self.registry.game_rules, self.observer(ctx, None, None))),
            ParamOwner::Team(team) => {
                let entry = self
                    .registry
                    .team(team)
                    .ok_or_else(|| invalid_reference(verb, "team", team))?;
                Ok((&entry.rules_params, self.observer(ctx, Some(entry.ally_team), None)))
            }
            ParamOwner::Player(player) => {
                let entry = self
                    .registry
                    .player(player)
                    .ok_or_else(|| invalid_reference(verb, "player", player))?;
                let ally = self.registry.ally_team_of(entry.team);
                Ok((&entry.rules_params, self.observer(ctx, ally, None)))
            }
            ParamOwner::Unit(unit) => {
                let entry = self.live_unit(verb, unit)?;
                let los = reader.and_then(|ally| {
                    let index = usize::try_from(ally).ok()?;
                    entry.los.get(index).map(|status| status.status)
                });
                Ok((&entry.rules_params, self.observer(ctx, Some(entry.ally_team), los)))
            }
            ParamOwner::Feature(feature) => {
                let entry = self
                    .registry
                    .feature(feature)
                    .ok_or_else(|| invalid_reference(verb, "feature", feature))?;
                Ok((&entry.rules_params, self.observer(ctx, entry.ally_team, None)))
            }
        }
    }

    /// Relation of the caller to an owner on `owner_ally` whose status in
    /// the caller's line of sight is `los`.
    fn observer(
        &self,
        ctx: &CallerContext,
        owner_ally: Option<AllyTeamId>,
        los: Option<LosBits>,
    ) -> Observer {
        if ctx.is_full() {
            return Observer::Private;
        }
        let Some(reader) = self.own_ally_team(ctx) else {
            return Observer::Public;
        };
        if owner_ally == Some(reader) {
            return Observer::Private;
        }
        if owner_ally.is_some_and(|owner| self.registry.allies.allied(reader, owner)) {
            return Observer::Allied;
        }
        let global = usize::try_from(reader)
            .ok()
            .and_then(|index| self.registry.global_los.get(index).copied())
            .unwrap_or(false);
        if global {
            return Observer::InLos;
        }
        match los {
            Some(bits) if bits.contains(LosBits::IN_LOS) => Observer::InLos,
            Some(bits) if bits.contains(LosBits::PREV_LOS.with(LosBits::CONT_RADAR, true)) => {
                Observer::Typed
            }
            Some(bits) if bits.contains(LosBits::IN_RADAR) => Observer::InRadar,
            _ => Observer::Public,
        }
    }
}
