//! Replicated attribute store (rules params).
//!
//! Named values hung off the game, a team, a player, a unit or a feature.
//! Every entry carries a visibility mask; a reader sees an entry only if
//! its relation to the owner grants one of the mask's levels. Relations
//! form a lattice: whoever may read a `public` entry is a superset of
//! whoever may read an `in_radar` one, and so on down to `private`.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Value stored under a rules-param key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RulesParamValue {
    /// A number.
    Number(f64),
    /// A boolean.
    Bool(bool),
    /// A string.
    String(String),
}

impl Hash for RulesParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                n.to_bits().hash(state);
            }
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::String(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

/// Visibility mask of a rules param.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LosAccess(u8);

impl LosAccess {
    /// Only full-read observers.
    pub const PRIVATE: Self = Self(1);
    /// Observers allied to the owner.
    pub const ALLIED: Self = Self(2);
    /// Observers with the owner in line of sight.
    pub const IN_LOS: Self = Self(4);
    /// Observers that know the owner's type.
    pub const TYPED: Self = Self(8);
    /// Observers with the owner in radar.
    pub const IN_RADAR: Self = Self(16);
    /// Everyone.
    pub const PUBLIC: Self = Self(32);

    /// Build from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the masks share a level.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Look up a level by its script name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "private" => Some(Self::PRIVATE),
            "allied" => Some(Self::ALLIED),
            "inlos" => Some(Self::IN_LOS),
            "typed" => Some(Self::TYPED),
            "inradar" => Some(Self::IN_RADAR),
            "public" => Some(Self::PUBLIC),
            _ => None,
        }
    }
}

impl Default for LosAccess {
    fn default() -> Self {
        Self::PRIVATE
    }
}

/// How an observer relates to the owner of a rules param.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observer {
    /// No relation.
    Public,
    /// Owner is in the observer's radar.
    InRadar,
    /// Observer knows the owner's type.
    Typed,
    /// Owner is in the observer's line of sight.
    InLos,
    /// Observer is allied to the owner.
    Allied,
    /// Observer has full control or is on the owner's ally-team.
    Private,
}

impl Observer {
    /// Mask of every level this observer may read.
    #[must_use]
    pub const fn readable(self) -> LosAccess {
        let bits = match self {
            Self::Public => 32,
            Self::InRadar => 32 | 16,
            Self::Typed => 32 | 16 | 8,
            Self::InLos => 32 | 16 | 8 | 4,
            Self::Allied => 32 | 16 | 8 | 4 | 2,
            Self::Private => 32 | 16 | 8 | 4 | 2 | 1,
        };
        LosAccess(bits)
    }
}

/// A stored value and its visibility.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct RulesParam {
    /// The value.
    pub value: RulesParamValue,
    /// Visibility mask.
    pub los: LosAccess,
}

/// Key/value store for one owner, iterated in key order.
#[derive(Debug, Clone, Default, PartialEq, Hash, Serialize, Deserialize)]
pub struct RulesParams {
    params: BTreeMap<String, RulesParam>,
}

impl RulesParams {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, update or delete a param.
    ///
    /// `None` deletes the key and ignores `los`. `los = None` keeps an
    /// existing entry's mask (or `private` for a new one).
    pub fn set(&mut self, key: &str, value: Option<RulesParamValue>, los: Option<LosAccess>) {
        let Some(value) = value else {
            self.params.remove(key);
            return;
        };
        match self.params.get_mut(key) {
            Some(param) => {
                param.value = value;
                if let Some(los) = los {
                    param.los = los;
                }
            }
            None => {
                self.params.insert(
                    key.to_owned(),
                    RulesParam {
                        value,
                        los: los.unwrap_or_default(),
                    },
                );
            }
        }
    }

    /// Read a param as seen by `observer`.
    #[must_use]
    pub fn get(&self, key: &str, observer: Observer) -> Option<&RulesParamValue> {
        self.params
            .get(key)
            .filter(|param| param.los.intersects(observer.readable()))
            .map(|param| &param.value)
    }

    /// Raw entry, ignoring visibility.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&RulesParam> {
        self.params.get(key)
    }

    /// All params visible to `observer`, in key order.
    pub fn visible(&self, observer: Observer) -> impl Iterator<Item = (&str, &RulesParamValue)> {
        let readable = observer.readable();
        self.params
            .iter()
            .filter(move |(_, param)| param.los.intersects(readable))
            .map(|(key, param)| (key.as_str(), &param.value))
    }

    /// Number of stored params.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether no params are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
