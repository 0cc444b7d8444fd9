//! Team, alliance and game-state verbs.
//!
//! These act on the game as a whole and need full control.

use crate::auth::{is_player_synced, CallerContext};
use crate::components::{AllyTeamId, PlayerId, TeamId};
use crate::error::{GatewayError, Result};

use super::{invalid_reference, SyncedGateway};

impl SyncedGateway {
    /// Set whether `first` considers `second` an ally.
    ///
    /// # Errors
    ///
    /// Silent for callers without full control or invalid ally-teams.
    pub fn set_ally(
        &mut self,
        ctx: &CallerContext,
        first: AllyTeamId,
        second: AllyTeamId,
        allied: bool,
    ) -> Result<()> {
        const VERB: &str = "SetAlly";
        Self::require_full(ctx, VERB)?;
        for ally in [first, second] {
            if !self.registry.is_valid_ally_team(ally) {
                return Err(invalid_reference(VERB, "ally team", ally));
            }
        }
        self.sync.assert_synced("SetAlly", &(first, second, allied));
        self.registry.allies.set(first, second, allied);
        tracing::debug!(first, second, allied, "alliance changed");
        Ok(())
    }

    /// Mark a team dead. The neutral team cannot be killed.
    ///
    /// # Errors
    ///
    /// Silent for callers without full control or an invalid team.
    pub fn kill_team(&mut self, ctx: &CallerContext, team: TeamId) -> Result<()> {
        const VERB: &str = "KillTeam";
        Self::require_full(ctx, VERB)?;
        let entry = self
            .registry
            .team_mut(team)
            .ok_or_else(|| invalid_reference(VERB, "team", team))?;
        if entry.gaia || entry.dead {
            return Ok(());
        }
        entry.dead = true;
        tracing::info!(team, "team killed");
        Ok(())
    }

    /// Move a player to another team.
    ///
    /// During host-side demo playback only players recorded in the demo
    /// can be moved.
    ///
    /// # Errors
    ///
    /// Silent for callers without full control, unknown or unsynced
    /// players, and invalid teams.
    pub fn assign_player_to_team(
        &mut self,
        ctx: &CallerContext,
        player: PlayerId,
        team: TeamId,
    ) -> Result<()> {
        const VERB: &str = "AssignPlayerToTeam";
        Self::require_full(ctx, VERB)?;
        if self.registry.team(team).is_none() {
            return Err(invalid_reference(VERB, "team", team));
        }
        let host_demo = self.config.host_demo;
        let entry = self
            .registry
            .player_mut(player)
            .ok_or_else(|| invalid_reference(VERB, "player", player))?;
        if !is_player_synced(host_demo, entry.from_demo) {
            return Err(invalid_reference(VERB, "player", player));
        }
        entry.team = team;
        entry.spectator = false;
        Ok(())
    }

    /// End the game with the given winning ally-teams.
    ///
    /// Invalid ids are skipped. Returns how many winners were accepted.
    ///
    /// # Errors
    ///
    /// Silent for callers without full control.
    pub fn game_over(&mut self, ctx: &CallerContext, winners: &[i64]) -> Result<usize> {
        Self::require_full(ctx, "GameOver")?;
        let accepted: Vec<AllyTeamId> = winners
            .iter()
            .filter_map(|&id| AllyTeamId::try_from(id).ok())
            .filter(|&id| self.registry.is_valid_ally_team(id))
            .collect();
        let count = accepted.len();
        tracing::info!(?accepted, frame = self.registry.frame, "game over");
        self.registry.winners = Some(accepted);
        Ok(count)
    }

    /// Grant or revoke global line of sight for an ally-team.
    ///
    /// # Errors
    ///
    /// Malformed for an invalid ally-team; silent for callers without full
    /// control.
    pub fn set_global_los(
        &mut self,
        ctx: &CallerContext,
        ally_team: AllyTeamId,
        enabled: bool,
    ) -> Result<()> {
        const VERB: &str = "SetGlobalLos";
        Self::require_full(ctx, VERB)?;
        let slot = usize::try_from(ally_team)
            .ok()
            .and_then(|index| self.registry.global_los.get_mut(index))
            .ok_or_else(|| {
                GatewayError::malformed(VERB, format!("bad allyTeam ({ally_team})"))
            })?;
        *slot = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::CallerContext;
    use crate::config::GatewayConfig;
    use crate::defs::DefRegistry;
    use crate::gateway::SyncedGateway;
    use crate::ledger::TeamLedger;
    use crate::math::Fixed;
    use crate::registry::EntityRegistry;
    use crate::terrain::HeightMap;

    fn gateway(host_demo: bool) -> SyncedGateway {
        let mut registry = EntityRegistry::new(3);
        registry.add_team(0, TeamLedger::default(), false);
        registry.add_team(1, TeamLedger::default(), false);
        registry.add_team(2, TeamLedger::default(), true);
        registry.add_player("alice", 0, true);
        registry.add_player("bob", 1, false);
        let config = GatewayConfig {
            host_demo,
            ..GatewayConfig::default()
        };
        SyncedGateway::new(
            config,
            DefRegistry::default(),
            registry,
            HeightMap::flat(4, 4, 8, Fixed::ZERO),
        )
    }

    #[test]
    fn test_game_verbs_need_full_control() {
        let mut gateway = gateway(false);
        let ctx = CallerContext::team(0);
        assert!(gateway.set_ally(&ctx, 0, 1, true).is_err());
        assert!(!gateway.registry().allies.allied(0, 1));
        assert!(gateway.kill_team(&ctx, 1).is_err());
        assert!(gateway.game_over(&ctx, &[0]).is_err());
    }

    #[test]
    fn test_set_ally_one_sided() {
        let mut gateway = gateway(false);
        let ctx = CallerContext::full();
        gateway.set_ally(&ctx, 0, 1, true).unwrap();
        assert!(gateway.registry().allies.allied(0, 1));
        assert!(!gateway.registry().allies.allied(1, 0));
        assert!(!gateway.set_ally(&ctx, 0, 7, true).unwrap_err().is_fatal());
    }

    #[test]
    fn test_gaia_cannot_be_killed() {
        let mut gateway = gateway(false);
        let ctx = CallerContext::full();
        gateway.kill_team(&ctx, 2).unwrap();
        gateway.kill_team(&ctx, 1).unwrap();
        assert!(!gateway.registry().team(2).unwrap().dead);
        assert!(gateway.registry().team(1).unwrap().dead);
    }

    #[test]
    fn test_assign_player_respects_demo_rule() {
        let mut gateway = gateway(true);
        let ctx = CallerContext::full();
        // bob is not part of the demo being played back
        assert!(gateway.assign_player_to_team(&ctx, 1, 0).is_err());
        gateway.assign_player_to_team(&ctx, 0, 1).unwrap();
        assert_eq!(gateway.registry().player(0).unwrap().team, 1);
    }

    #[test]
    fn test_game_over_counts_valid_winners() {
        let mut gateway = gateway(false);
        let count = gateway.game_over(&CallerContext::full(), &[0, 2, 9, -1]).unwrap();
        assert_eq!(count, 2);
        assert_eq!(gateway.registry().winners, Some(vec![0, 2]));
    }

    #[test]
    fn test_global_los_bad_ally_is_fatal() {
        let mut gateway = gateway(false);
        let ctx = CallerContext::full();
        gateway.set_global_los(&ctx, 1, true).unwrap();
        assert!(gateway.registry().global_los[1]);
        assert!(gateway.set_global_los(&ctx, 5, true).unwrap_err().is_fatal());
    }
}
