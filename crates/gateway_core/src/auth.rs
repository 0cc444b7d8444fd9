//! Authorization model.
//!
//! Every script call runs under a [`CallerContext`]. A full-control caller
//! (the game's own synced logic) may act on anything; a restricted caller
//! may only act on its own team, and on features and projectiles belonging
//! to its team's ally-team. A caller without access can act on nothing.
//!
//! Denials are ordinary outcomes: callers see a silent no-op.

use serde::{Deserialize, Serialize};

use crate::components::{AllyTeamId, TeamId};
use crate::error::{GatewayError, Result};

/// What a caller is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlScope {
    /// Any team.
    Full,
    /// A single team.
    Team(TeamId),
    /// Nothing.
    None,
}

/// Identity of the script making a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerContext {
    /// Control scope of the calling handler.
    pub scope: ControlScope,
}

impl CallerContext {
    /// Context with full control.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            scope: ControlScope::Full,
        }
    }

    /// Context restricted to one team.
    #[must_use]
    pub const fn team(team: TeamId) -> Self {
        Self {
            scope: ControlScope::Team(team),
        }
    }

    /// Context that may control nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            scope: ControlScope::None,
        }
    }

    /// Whether the caller has full control.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self.scope, ControlScope::Full)
    }

    /// The caller's own team, if restricted to one.
    #[must_use]
    pub const fn ctrl_team(&self) -> Option<TeamId> {
        match self.scope {
            ControlScope::Team(team) => Some(team),
            ControlScope::Full | ControlScope::None => None,
        }
    }

    /// Whether the caller may act on entities of `team`.
    #[must_use]
    pub fn can_control_team(&self, team: TeamId) -> bool {
        match self.scope {
            ControlScope::Full => true,
            ControlScope::Team(own) => own == team,
            ControlScope::None => false,
        }
    }

    /// Whether the caller may act on something owned by an ally-team.
    ///
    /// `own_ally` is the ally-team of the caller's team. Objects without an
    /// ally-team can only be controlled with full control.
    #[must_use]
    pub fn can_control_ally_team(
        &self,
        target: Option<AllyTeamId>,
        own_ally: Option<AllyTeamId>,
    ) -> bool {
        match self.scope {
            ControlScope::Full => true,
            ControlScope::None => false,
            ControlScope::Team(_) => target.is_some() && target == own_ally,
        }
    }

    /// [`Self::can_control_team`] as a result.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] on denial.
    pub fn require_team(&self, verb: &'static str, team: TeamId) -> Result<()> {
        if self.can_control_team(team) {
            Ok(())
        } else {
            tracing::debug!(verb, team, scope = ?self.scope, "control denied");
            Err(GatewayError::Unauthorized { verb })
        }
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::full()
    }
}

/// Whether a player's actions count in this session.
///
/// During host-side demo playback only players recorded in the demo act.
#[must_use]
pub const fn is_player_synced(host_demo: bool, player_from_demo: bool) -> bool {
    !host_demo || player_from_demo
}
