//! Entity registry.
//!
//! Owns every unit, feature and projectile plus the teams, players and
//! alliance matrix. Collections are ordered maps so iteration, hashing and
//! serialization are identical on every client.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::components::{
    AllyTeamId, Feature, FeatureId, PlayerId, Projectile, ProjectileId, TeamId, Unit, UnitId,
};
use crate::ledger::TeamLedger;
use crate::rules_params::RulesParams;

/// Issues and reclaims integer identities for one entity category.
///
/// Released ids either return to the free set immediately or wait in a
/// pending queue until a given frame, so a just-destroyed id is not reused
/// while other systems may still refer to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdPool {
    next: u32,
    free: BTreeSet<u32>,
    pending: VecDeque<(u32, u64)>,
    in_use: BTreeSet<u32>,
}

impl IdPool {
    /// Create an empty pool; ids start at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the lowest free id, or `requested` if it is available.
    ///
    /// Returns `None` if the requested id is live or still pending reclamation.
    pub fn allocate(&mut self, requested: Option<u32>) -> Option<u32> {
        let id = match requested {
            Some(id) => {
                if self.in_use.contains(&id) || self.pending.iter().any(|(p, _)| *p == id) {
                    return None;
                }
                if id >= self.next {
                    self.free.extend(self.next..id);
                    self.next = id.checked_add(1)?;
                } else {
                    self.free.remove(&id);
                }
                id
            }
            None => match self.free.pop_first() {
                Some(id) => id,
                None => {
                    let id = self.next;
                    self.next = id.checked_add(1)?;
                    id
                }
            },
        };
        self.in_use.insert(id);
        Some(id)
    }

    /// Release an id, freeing it now or once `frame` has been reached.
    pub fn release(&mut self, id: u32, reusable_at: Option<u64>) {
        if !self.in_use.remove(&id) {
            return;
        }
        match reusable_at {
            Some(frame) => self.pending.push_back((id, frame)),
            None => {
                self.free.insert(id);
            }
        }
    }

    /// Return pending ids whose frame has been reached to the free set.
    ///
    /// Returns how many ids were reclaimed.
    pub fn reclaim(&mut self, frame: u64) -> usize {
        let mut reclaimed = 0;
        while let Some(&(id, due)) = self.pending.front() {
            if due > frame {
                break;
            }
            self.pending.pop_front();
            self.free.insert(id);
            reclaimed += 1;
        }
        reclaimed
    }

    /// Whether an id is live.
    #[must_use]
    pub fn is_live(&self, id: u32) -> bool {
        self.in_use.contains(&id)
    }
}

/// A team: the unit of resource ownership and control.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Team {
    /// Identity.
    pub id: TeamId,
    /// Ally-team, fixed at setup.
    pub ally_team: AllyTeamId,
    /// Resource ledger.
    pub ledger: TeamLedger,
    /// Rules params.
    pub rules_params: RulesParams,
    /// Whether the team has been killed.
    pub dead: bool,
    /// Whether this is the neutral team.
    pub gaia: bool,
}

/// A player controlling a team.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Player {
    /// Identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Controlled team.
    pub team: TeamId,
    /// Whether the player only spectates.
    pub spectator: bool,
    /// Whether the player was recorded in the demo being played back.
    pub from_demo: bool,
    /// Rules params.
    pub rules_params: RulesParams,
}

/// One-sided alliance relations between ally-teams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllyMatrix {
    size: usize,
    allied: Vec<bool>,
}

impl AllyMatrix {
    /// Matrix where every ally-team is allied only with itself.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let mut allied = vec![false; size * size];
        for i in 0..size {
            allied[i * size + i] = true;
        }
        Self { size, allied }
    }

    /// Number of ally-teams.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether `a` considers `b` an ally.
    #[must_use]
    pub fn allied(&self, a: AllyTeamId, b: AllyTeamId) -> bool {
        self.index(a, b).is_some_and(|i| self.allied[i])
    }

    /// Set whether `a` considers `b` an ally. Returns `false` for invalid ids.
    pub fn set(&mut self, a: AllyTeamId, b: AllyTeamId, allied: bool) -> bool {
        match self.index(a, b) {
            Some(i) => {
                self.allied[i] = allied;
                true
            }
            None => false,
        }
    }

    fn index(&self, a: AllyTeamId, b: AllyTeamId) -> Option<usize> {
        let a = usize::try_from(a).ok()?;
        let b = usize::try_from(b).ok()?;
        (a < self.size && b < self.size).then(|| a * self.size + b)
    }
}

/// Authoritative store of all replicated entities.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct EntityRegistry {
    /// Current simulation frame.
    pub frame: u64,
    /// Live units.
    pub units: BTreeMap<UnitId, Unit>,
    /// Live features.
    pub features: BTreeMap<FeatureId, Feature>,
    /// Live projectiles.
    pub projectiles: BTreeMap<ProjectileId, Projectile>,
    /// Unit ids.
    pub unit_ids: IdPool,
    /// Feature ids.
    pub feature_ids: IdPool,
    /// Projectile ids.
    pub projectile_ids: IdPool,
    /// Teams, indexed by id.
    pub teams: Vec<Team>,
    /// Players, indexed by id.
    pub players: Vec<Player>,
    /// Alliance relations.
    pub allies: AllyMatrix,
    /// Ally-teams with global line of sight.
    pub global_los: Vec<bool>,
    /// Game-wide rules params.
    pub game_rules: RulesParams,
    /// Winning ally-teams, once the game is over.
    pub winners: Option<Vec<AllyTeamId>>,
}

impl EntityRegistry {
    /// Create a registry with `num_ally_teams` ally-teams and no teams.
    #[must_use]
    pub fn new(num_ally_teams: usize) -> Self {
        Self {
            frame: 0,
            units: BTreeMap::new(),
            features: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            unit_ids: IdPool::new(),
            feature_ids: IdPool::new(),
            projectile_ids: IdPool::new(),
            teams: Vec::new(),
            players: Vec::new(),
            allies: AllyMatrix::new(num_ally_teams),
            global_los: vec![false; num_ally_teams],
            game_rules: RulesParams::new(),
            winners: None,
        }
    }

    /// Add a team; ids are assigned in order.
    ///
    /// Returns `None` if the ally-team does not exist.
    pub fn add_team(&mut self, ally_team: AllyTeamId, ledger: TeamLedger, gaia: bool) -> Option<TeamId> {
        if !self.is_valid_ally_team(ally_team) {
            return None;
        }
        let id = TeamId::try_from(self.teams.len()).ok()?;
        self.teams.push(Team {
            id,
            ally_team,
            ledger,
            rules_params: RulesParams::new(),
            dead: false,
            gaia,
        });
        Some(id)
    }

    /// Add a player; ids are assigned in order.
    ///
    /// Returns `None` if the team does not exist.
    pub fn add_player(&mut self, name: &str, team: TeamId, from_demo: bool) -> Option<PlayerId> {
        self.team(team)?;
        let id = PlayerId::try_from(self.players.len()).ok()?;
        self.players.push(Player {
            id,
            name: name.to_owned(),
            team,
            spectator: false,
            from_demo,
            rules_params: RulesParams::new(),
        });
        Some(id)
    }

    /// Number of ally-teams.
    #[must_use]
    pub const fn num_ally_teams(&self) -> usize {
        self.allies.size()
    }

    /// Whether an ally-team id is valid.
    #[must_use]
    pub fn is_valid_ally_team(&self, ally_team: AllyTeamId) -> bool {
        usize::try_from(ally_team).is_ok_and(|a| a < self.num_ally_teams())
    }

    /// Look up a team.
    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(usize::try_from(id).ok()?)
    }

    /// Look up a team mutably.
    pub fn team_mut(&mut self, id: TeamId) -> Option<&mut Team> {
        self.teams.get_mut(usize::try_from(id).ok()?)
    }

    /// Look up a player.
    #[must_use]
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(usize::try_from(id).ok()?)
    }

    /// Look up a player mutably.
    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(usize::try_from(id).ok()?)
    }

    /// Ally-team of a team.
    #[must_use]
    pub fn ally_team_of(&self, team: TeamId) -> Option<AllyTeamId> {
        self.team(team).map(|t| t.ally_team)
    }

    /// Live (not dying) unit.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id).filter(|u| !u.dead)
    }

    /// Live (not dying) unit, mutably.
    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id).filter(|u| !u.dead)
    }

    /// Live (not dying) feature.
    #[must_use]
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(&id).filter(|f| !f.dead)
    }

    /// Live (not dying) feature, mutably.
    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.features.get_mut(&id).filter(|f| !f.dead)
    }

    /// Number of live units owned by a team.
    #[must_use]
    pub fn team_unit_count(&self, team: TeamId) -> usize {
        self.units.values().filter(|u| u.team == team && !u.dead).count()
    }

    /// Mutable access to a unit together with its team's ledger.
    pub fn unit_and_ledger_mut(&mut self, id: UnitId) -> Option<(&mut Unit, &mut TeamLedger)> {
        let unit = self.units.get_mut(&id).filter(|u| !u.dead)?;
        let team = self.teams.get_mut(usize::try_from(unit.team).ok()?)?;
        Some((unit, &mut team.ledger))
    }

    /// Mutable access to two distinct teams.
    pub fn two_teams_mut(&mut self, a: TeamId, b: TeamId) -> Option<(&mut Team, &mut Team)> {
        let a = usize::try_from(a).ok()?;
        let b = usize::try_from(b).ok()?;
        if a == b || a >= self.teams.len() || b >= self.teams.len() {
            return None;
        }
        if a < b {
            let (left, right) = self.teams.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.teams.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    /// Hash of the complete registry state.
    ///
    /// Used for desync detection. Two registries with identical state
    /// produce identical hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ResourcePack;

    #[test]
    fn test_id_pool_sequential() {
        let mut pool = IdPool::new();
        assert_eq!(pool.allocate(None), Some(0));
        assert_eq!(pool.allocate(None), Some(1));
        assert!(pool.is_live(1));
    }

    #[test]
    fn test_id_pool_requested() {
        let mut pool = IdPool::new();
        assert_eq!(pool.allocate(Some(5)), Some(5));
        assert_eq!(pool.allocate(Some(5)), None);
        // Gaps below the requested id are handed out lowest first
        assert_eq!(pool.allocate(None), Some(0));
        assert_eq!(pool.allocate(Some(3)), Some(3));
        assert_eq!(pool.allocate(None), Some(1));
    }

    #[test]
    fn test_id_pool_delayed_reclaim() {
        let mut pool = IdPool::new();
        let id = pool.allocate(None).unwrap();
        pool.release(id, Some(20));
        assert_eq!(pool.allocate(Some(id)), None);
        assert_eq!(pool.reclaim(19), 0);
        assert_eq!(pool.reclaim(20), 1);
        assert_eq!(pool.allocate(None), Some(id));
    }

    #[test]
    fn test_id_pool_immediate_release() {
        let mut pool = IdPool::new();
        let id = pool.allocate(None).unwrap();
        pool.release(id, None);
        assert_eq!(pool.allocate(None), Some(id));
    }

    #[test]
    fn test_ally_matrix_one_sided() {
        let mut allies = AllyMatrix::new(3);
        assert!(allies.allied(1, 1));
        assert!(allies.set(0, 2, true));
        assert!(allies.allied(0, 2));
        assert!(!allies.allied(2, 0));
        assert!(!allies.set(0, 3, true));
    }

    #[test]
    fn test_two_teams_mut() {
        let mut registry = EntityRegistry::new(2);
        registry.add_team(0, TeamLedger::default(), false);
        registry.add_team(1, TeamLedger::default(), false);
        let (b, a) = registry.two_teams_mut(1, 0).unwrap();
        assert_eq!((b.id, a.id), (1, 0));
        assert!(registry.two_teams_mut(1, 1).is_none());
        assert!(registry.two_teams_mut(0, 9).is_none());
    }

    #[test]
    fn test_state_hash_tracks_changes() {
        let mut registry = EntityRegistry::new(1);
        registry.add_team(0, TeamLedger::new(ResourcePack::ZERO, ResourcePack::ZERO), false);
        let before = registry.state_hash();
        assert_eq!(before, registry.clone().state_hash());
        registry.frame += 1;
        assert_ne!(before, registry.state_hash());
    }
}
