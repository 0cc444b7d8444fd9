//! Resource ledger.
//!
//! Each team holds metal and energy with a storage cap. Every mutation
//! keeps `0 <= current <= storage`; amounts that would overflow storage are
//! recorded as excess instead. Spending is check-then-use: a failed use
//! leaves the stock untouched. Requested demand is tracked separately in a
//! pull accumulator that never affects the stock.
//!
//! Units draw from and feed into their team's ledger; [`UnitEconomy`]
//! records their share of the traffic and their passive resourcing rates.

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed};

/// Kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Metal.
    Metal,
    /// Energy.
    Energy,
}

impl ResourceKind {
    /// Both kinds, metal first.
    pub const ALL: [Self; 2] = [Self::Metal, Self::Energy];

    /// Resolve a script resource name by its first character.
    ///
    /// `"m"`, `"metal"` and `"mass"` all select metal; anything that does
    /// not start with `m` or `e` is `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.as_bytes().first() {
            Some(b'm') => Some(Self::Metal),
            Some(b'e') => Some(Self::Energy),
            _ => None,
        }
    }

    /// Single-letter script name.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Metal => "m",
            Self::Energy => "e",
        }
    }
}

/// A metal/energy pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourcePack {
    /// Metal amount.
    #[serde(with = "fixed_serde")]
    pub metal: Fixed,
    /// Energy amount.
    #[serde(with = "fixed_serde")]
    pub energy: Fixed,
}

impl ResourcePack {
    /// Empty pack.
    pub const ZERO: Self = Self {
        metal: Fixed::ZERO,
        energy: Fixed::ZERO,
    };

    /// Create a pack.
    #[must_use]
    pub const fn new(metal: Fixed, energy: Fixed) -> Self {
        Self { metal, energy }
    }

    /// Read one kind.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> Fixed {
        match kind {
            ResourceKind::Metal => self.metal,
            ResourceKind::Energy => self.energy,
        }
    }

    /// Mutable access to one kind.
    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut Fixed {
        match kind {
            ResourceKind::Metal => &mut self.metal,
            ResourceKind::Energy => &mut self.energy,
        }
    }

    /// Whether every component of `self` covers `other`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.metal >= other.metal && self.energy >= other.energy
    }

    /// Component-wise `max(0, x)`.
    #[must_use]
    pub fn non_negative(self) -> Self {
        Self {
            metal: self.metal.max(Fixed::ZERO),
            energy: self.energy.max(Fixed::ZERO),
        }
    }
}

impl std::ops::AddAssign for ResourcePack {
    fn add_assign(&mut self, rhs: Self) {
        self.metal = self.metal.saturating_add(rhs.metal);
        self.energy = self.energy.saturating_add(rhs.energy);
    }
}

/// Stock, caps and flow statistics for one team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamLedger {
    /// Current stock.
    pub current: ResourcePack,
    /// Storage caps.
    pub storage: ResourcePack,
    /// Share levels in `[0, 1]`; stock above `level * storage` is shared to allies.
    pub share: ResourcePack,
    /// Demand requested this frame.
    pub pull: ResourcePack,
    /// Demand requested last frame.
    pub prev_pull: ResourcePack,
    /// Total income.
    pub income: ResourcePack,
    /// Total expense.
    pub expense: ResourcePack,
    /// Total sent to other teams.
    pub sent: ResourcePack,
    /// Total received from other teams.
    pub received: ResourcePack,
    /// Total lost to full storage.
    pub excess: ResourcePack,
}

impl TeamLedger {
    /// Create a ledger with the given stock and caps.
    ///
    /// The stock is clamped into storage.
    #[must_use]
    pub fn new(current: ResourcePack, storage: ResourcePack) -> Self {
        let storage = storage.non_negative();
        let one = Fixed::from_num(1);
        Self {
            current: ResourcePack::new(
                current.metal.clamp(Fixed::ZERO, storage.metal),
                current.energy.clamp(Fixed::ZERO, storage.energy),
            ),
            storage,
            share: ResourcePack::new(one, one),
            pull: ResourcePack::ZERO,
            prev_pull: ResourcePack::ZERO,
            income: ResourcePack::ZERO,
            expense: ResourcePack::ZERO,
            sent: ResourcePack::ZERO,
            received: ResourcePack::ZERO,
            excess: ResourcePack::ZERO,
        }
    }

    /// Add a non-negative amount; overflow beyond storage becomes excess.
    pub fn add(&mut self, kind: ResourceKind, amount: Fixed) {
        let amount = amount.max(Fixed::ZERO);
        tally(self.income.get_mut(kind), amount);
        self.deposit(kind, amount);
        debug_assert!(self.is_consistent());
    }

    /// Record demand without touching the stock.
    pub fn add_pull(&mut self, kind: ResourceKind, amount: Fixed) {
        tally(self.pull.get_mut(kind), amount.max(Fixed::ZERO));
    }

    /// Spend `amount` if the stock covers it.
    ///
    /// Does not touch the pull accumulator.
    pub fn try_use(&mut self, kind: ResourceKind, amount: Fixed) -> bool {
        let amount = amount.max(Fixed::ZERO);
        let stock = self.current.get_mut(kind);
        if amount > *stock {
            return false;
        }
        *stock -= amount;
        tally(self.expense.get_mut(kind), amount);
        true
    }

    /// Record demand for one kind, then spend it if possible.
    pub fn use_single(&mut self, kind: ResourceKind, amount: Fixed) -> bool {
        self.add_pull(kind, amount);
        self.try_use(kind, amount)
    }

    /// Record demand for both kinds, then spend both or neither.
    pub fn use_pack(&mut self, amount: ResourcePack) -> bool {
        let amount = amount.non_negative();
        self.pull += amount;
        if !self.current.covers(&amount) {
            return false;
        }
        for kind in ResourceKind::ALL {
            let used = self.try_use(kind, amount.get(kind));
            debug_assert!(used);
        }
        true
    }

    /// Overwrite the stock, clamped to `[0, storage]`.
    pub fn set(&mut self, kind: ResourceKind, amount: Fixed) {
        *self.current.get_mut(kind) = amount.clamp(Fixed::ZERO, self.storage.get(kind));
    }

    /// Overwrite a storage cap and re-clamp the stock.
    pub fn set_storage(&mut self, kind: ResourceKind, amount: Fixed) {
        *self.storage.get_mut(kind) = amount.max(Fixed::ZERO);
        let cap = self.storage.get(kind);
        let stock = self.current.get_mut(kind);
        *stock = (*stock).min(cap);
    }

    /// Adjust a storage cap by a signed delta and re-clamp the stock.
    pub fn adjust_storage(&mut self, kind: ResourceKind, delta: Fixed) {
        let updated = self.storage.get(kind).saturating_add(delta);
        self.set_storage(kind, updated);
    }

    /// Set a share level, clamped to `[0, 1]`.
    pub fn set_share_level(&mut self, kind: ResourceKind, level: Fixed) {
        *self.share.get_mut(kind) = level.clamp(Fixed::ZERO, Fixed::from_num(1));
    }

    /// The amount a transfer of `requested` would actually move.
    #[must_use]
    pub fn shareable(&self, kind: ResourceKind, requested: Fixed) -> Fixed {
        requested.min(self.current.get(kind)).max(Fixed::ZERO)
    }

    /// Roll the pull accumulator over for a new frame.
    pub fn start_frame(&mut self) {
        self.prev_pull = self.pull;
        self.pull = ResourcePack::ZERO;
    }

    /// Whether the stock lies within `[0, storage]`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        ResourceKind::ALL.iter().all(|&kind| {
            let stock = self.current.get(kind);
            stock >= Fixed::ZERO && stock <= self.storage.get(kind)
        })
    }

    fn deposit(&mut self, kind: ResourceKind, amount: Fixed) {
        let cap = self.storage.get(kind);
        let stock = self.current.get_mut(kind);
        *stock = stock.saturating_add(amount);
        if *stock > cap {
            let overflow = *stock - cap;
            *stock = cap;
            tally(self.excess.get_mut(kind), overflow);
        }
    }
}

/// Flow statistics saturate instead of overflowing.
fn tally(total: &mut Fixed, amount: Fixed) {
    *total = total.saturating_add(amount);
}

impl Default for TeamLedger {
    fn default() -> Self {
        Self::new(ResourcePack::ZERO, ResourcePack::ZERO)
    }
}

/// Move `amount` (already clamped by [`TeamLedger::shareable`]) between teams.
///
/// The destination keeps the storage invariant; anything it cannot hold is
/// recorded as its excess.
pub fn transfer(src: &mut TeamLedger, dst: &mut TeamLedger, kind: ResourceKind, amount: Fixed) {
    let amount = src.shareable(kind, amount);
    *src.current.get_mut(kind) -= amount;
    tally(src.sent.get_mut(kind), amount);
    tally(dst.received.get_mut(kind), amount);
    dst.deposit(kind, amount);
}

/// Passive resourcing rates of a unit, in the four flavours the engine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitResourcing {
    /// Always consumed.
    pub uncond_use: ResourcePack,
    /// Always produced.
    pub uncond_make: ResourcePack,
    /// Consumed while active.
    pub cond_use: ResourcePack,
    /// Produced while active.
    pub cond_make: ResourcePack,
}

impl UnitResourcing {
    /// Set a rate by its three-letter key `[u|c][u|m][m|e]`.
    ///
    /// The stored value is half the given one. Returns `false` for an
    /// unknown key.
    pub fn set_by_key(&mut self, key: &str, value: Fixed) -> bool {
        let bytes = key.as_bytes();
        if bytes.len() < 3 {
            return false;
        }
        let pack = match (bytes[0], bytes[1]) {
            (b'u', b'u') => &mut self.uncond_use,
            (b'u', b'm') => &mut self.uncond_make,
            (b'c', b'u') => &mut self.cond_use,
            (b'c', b'm') => &mut self.cond_make,
            _ => return false,
        };
        let kind = match bytes[2] {
            b'm' => ResourceKind::Metal,
            b'e' => ResourceKind::Energy,
            _ => return false,
        };
        *pack.get_mut(kind) = value / Fixed::from_num(2);
        true
    }
}

/// A unit's resource footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitEconomy {
    /// Storage this unit contributes to its team.
    pub storage: ResourcePack,
    /// Passive rates.
    pub resourcing: UnitResourcing,
    /// Resources this unit spent.
    pub used: ResourcePack,
    /// Resources this unit produced.
    pub made: ResourcePack,
}

impl UnitEconomy {
    /// Produce resources for the owning team.
    pub fn add(&mut self, team: &mut TeamLedger, kind: ResourceKind, amount: Fixed) {
        if amount < Fixed::ZERO {
            self.use_single(team, kind, amount.saturating_neg());
            return;
        }
        tally(self.made.get_mut(kind), amount);
        team.add(kind, amount);
    }

    /// Spend one kind from the owning team, recording the pull.
    pub fn use_single(&mut self, team: &mut TeamLedger, kind: ResourceKind, amount: Fixed) -> bool {
        if amount < Fixed::ZERO {
            self.add(team, kind, amount.saturating_neg());
            return true;
        }
        let used = team.use_single(kind, amount);
        if used {
            tally(self.used.get_mut(kind), amount);
        }
        used
    }

    /// Spend both kinds from the owning team or neither.
    ///
    /// The demand is added to the team's pull either way: directly on
    /// failure, through [`Self::use_single`] on success.
    pub fn use_pack(&mut self, team: &mut TeamLedger, amount: ResourcePack) -> bool {
        let amount = amount.non_negative();
        if !team.current.covers(&amount) {
            team.pull += amount;
            return false;
        }
        for kind in ResourceKind::ALL {
            self.use_single(team, kind, amount.get(kind));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(v: i32) -> Fixed {
        Fixed::from_num(v)
    }

    fn ledger(metal: i32, energy: i32) -> TeamLedger {
        TeamLedger::new(
            ResourcePack::new(fx(metal), fx(energy)),
            ResourcePack::new(fx(1000), fx(1000)),
        )
    }

    #[test]
    fn test_use_single_check_then_use() {
        let mut team = ledger(100, 0);
        assert!(team.use_single(ResourceKind::Metal, fx(60)));
        assert_eq!(team.current.metal, fx(40));
        assert!(!team.use_single(ResourceKind::Metal, fx(60)));
        assert_eq!(team.current.metal, fx(40));
        // Pull records both requests
        assert_eq!(team.pull.metal, fx(120));
    }

    #[test]
    fn test_use_pack_all_or_nothing() {
        let mut team = ledger(100, 10);
        assert!(!team.use_pack(ResourcePack::new(fx(50), fx(20))));
        assert_eq!(team.current, ResourcePack::new(fx(100), fx(10)));
        assert!(team.use_pack(ResourcePack::new(fx(50), fx(5))));
        assert_eq!(team.current, ResourcePack::new(fx(50), fx(5)));
    }

    #[test]
    fn test_add_overflow_is_excess() {
        let mut team = ledger(900, 0);
        team.add(ResourceKind::Metal, fx(300));
        assert_eq!(team.current.metal, fx(1000));
        assert_eq!(team.excess.metal, fx(200));
        assert!(team.is_consistent());
    }

    #[test]
    fn test_set_clamps_to_storage() {
        let mut team = ledger(0, 0);
        team.set(ResourceKind::Energy, fx(5000));
        assert_eq!(team.current.energy, fx(1000));
        team.set(ResourceKind::Energy, fx(-5));
        assert_eq!(team.current.energy, Fixed::ZERO);
    }

    #[test]
    fn test_shrinking_storage_clamps_stock() {
        let mut team = ledger(800, 0);
        team.set_storage(ResourceKind::Metal, fx(500));
        assert_eq!(team.current.metal, fx(500));
        assert!(team.is_consistent());
    }

    #[test]
    fn test_share_level_clamped() {
        let mut team = ledger(0, 0);
        team.set_share_level(ResourceKind::Metal, fx(3));
        assert_eq!(team.share.metal, fx(1));
        team.set_share_level(ResourceKind::Metal, fx(-1));
        assert_eq!(team.share.metal, Fixed::ZERO);
    }

    #[test]
    fn test_transfer_clamps_to_source_stock() {
        let mut src = ledger(30, 0);
        let mut dst = ledger(0, 0);
        transfer(&mut src, &mut dst, ResourceKind::Metal, fx(100));
        assert_eq!(src.current.metal, Fixed::ZERO);
        assert_eq!(src.sent.metal, fx(30));
        assert_eq!(dst.current.metal, fx(30));
        assert_eq!(dst.received.metal, fx(30));
    }

    #[test]
    fn test_resourcing_keys_halve() {
        let mut rates = UnitResourcing::default();
        assert!(rates.set_by_key("ume", fx(10)));
        assert!(rates.set_by_key("cum", fx(3)));
        assert!(!rates.set_by_key("xyz", fx(3)));
        assert!(!rates.set_by_key("u", fx(3)));
        assert_eq!(rates.uncond_make.energy, fx(5));
        assert_eq!(rates.cond_use.metal, Fixed::from_num(1.5));
    }

    #[test]
    fn test_unit_pack_failure_adds_pull_only() {
        let mut team = ledger(100, 10);
        let mut unit = UnitEconomy::default();
        assert!(!unit.use_pack(&mut team, ResourcePack::new(fx(50), fx(20))));
        assert_eq!(team.current, ResourcePack::new(fx(100), fx(10)));
        assert_eq!(team.pull, ResourcePack::new(fx(50), fx(20)));
        assert_eq!(unit.used, ResourcePack::ZERO);
    }

    #[test]
    fn test_unit_pack_success_also_adds_pull() {
        let mut team = ledger(100, 10);
        let mut unit = UnitEconomy::default();
        assert!(unit.use_pack(&mut team, ResourcePack::new(fx(30), fx(5))));
        assert_eq!(team.current, ResourcePack::new(fx(70), fx(5)));
        assert_eq!(team.pull, ResourcePack::new(fx(30), fx(5)));
        assert_eq!(unit.used, ResourcePack::new(fx(30), fx(5)));
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(ResourceKind::from_name("metal"), Some(ResourceKind::Metal));
        assert_eq!(ResourceKind::from_name("e"), Some(ResourceKind::Energy));
        assert_eq!(ResourceKind::from_name("x"), None);
        assert_eq!(ResourceKind::from_name(""), None);
    }
}
