//! Parameter marshaling.
//!
//! Scripts pass dynamically typed values. [`ScriptValue`] is the closed set
//! of shapes they can take and [`Args`] validates positional arguments into
//! strongly typed, range-checked values before any state is touched.
//! Structural problems become [`GatewayError::MalformedArgument`].
//!
//! Script values serialize to JSON naturally: `null`, booleans, numbers,
//! strings, arrays (1-based tables) and objects (keyed tables).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GatewayError, Result};
use crate::math::{Fixed, Vec3Fixed};

/// A script table key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKey {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
}

impl From<&str> for TableKey {
    fn from(key: &str) -> Self {
        Self::Str(key.to_owned())
    }
}

impl From<i64> for TableKey {
    fn from(key: i64) -> Self {
        Self::Int(key)
    }
}

/// A script table with deterministic (sorted) iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptTable {
    entries: BTreeMap<TableKey, ScriptValue>,
}

impl ScriptTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a 1-based array table.
    pub fn array(values: impl IntoIterator<Item = ScriptValue>) -> Self {
        let mut table = Self::new();
        for (index, value) in (1..).zip(values) {
            table.insert(TableKey::Int(index), value);
        }
        table
    }

    /// Insert a value; inserting `Nil` removes the key.
    pub fn insert(&mut self, key: impl Into<TableKey>, value: impl Into<ScriptValue>) {
        let key = key.into();
        match value.into() {
            ScriptValue::Nil => {
                self.entries.remove(&key);
            }
            value => {
                self.entries.insert(key, value);
            }
        }
    }

    /// Look up a string key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.entries.get(&TableKey::Str(key.to_owned()))
    }

    /// Look up an integer key.
    #[must_use]
    pub fn get_index(&self, index: i64) -> Option<&ScriptValue> {
        self.entries.get(&TableKey::Int(index))
    }

    /// Iterate entries in key order (integers first).
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &ScriptValue)> {
        self.entries.iter()
    }

    /// Iterate values in key order.
    pub fn values(&self) -> impl Iterator<Item = &ScriptValue> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_sequence(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .keys()
                .zip(1..)
                .all(|(key, expected)| *key == TableKey::Int(expected))
    }
}

/// A dynamically typed script value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScriptValue {
    /// Absence of a value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(String),
    /// Table.
    Table(ScriptTable),
}

impl ScriptValue {
    /// Script-facing type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table(_) => "table",
        }
    }

    /// Script truthiness: everything but `nil` and `false`.
    #[must_use]
    pub const fn truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// The number, if this is one.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The table, if this is one.
    #[must_use]
    pub const fn as_table(&self) -> Option<&ScriptTable> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this is `nil`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for ScriptValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u32> for ScriptValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<Fixed> for ScriptValue {
    fn from(value: Fixed) -> Self {
        Self::Number(value.to_num::<f64>())
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<ScriptTable> for ScriptValue {
    fn from(value: ScriptTable) -> Self {
        Self::Table(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl Serialize for ScriptValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Table(t) => t.serialize(serializer),
        }
    }
}

impl Serialize for ScriptTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_sequence() {
            let mut seq = serializer.serialize_seq(Some(self.len()))?;
            for value in self.values() {
                seq.serialize_element(value)?;
            }
            return seq.end();
        }
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            match key {
                TableKey::Int(i) => map.serialize_entry(&i.to_string(), value)?,
                TableKey::Str(s) => map.serialize_entry(s, value)?,
            }
        }
        map.end()
    }
}

struct ScriptValueVisitor;

impl<'de> Visitor<'de> for ScriptValueVisitor {
    type Value = ScriptValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a script value")
    }

    fn visit_unit<E>(self) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Nil)
    }

    fn visit_none<E>(self) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<ScriptValue, D::Error> {
        ScriptValue::deserialize(deserializer)
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Bool(v))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_i64<E>(self, v: i64) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Number(v as f64))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E>(self, v: u64) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Number(v as f64))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::Number(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<ScriptValue, E> {
        Ok(ScriptValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ScriptValue, A::Error> {
        let mut values = Vec::new();
        while let Some(value) = seq.next_element::<ScriptValue>()? {
            values.push(value);
        }
        Ok(ScriptValue::Table(ScriptTable::array(values)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<ScriptValue, A::Error> {
        let mut table = ScriptTable::new();
        while let Some((key, value)) = map.next_entry::<String, ScriptValue>()? {
            let key = key
                .parse::<i64>()
                .map_or_else(|_| TableKey::Str(key), TableKey::Int);
            table.insert(key, value);
        }
        Ok(ScriptValue::Table(table))
    }
}

impl<'de> Deserialize<'de> for ScriptValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ScriptValueVisitor)
    }
}

/// Convert a script number into fixed-point, saturating at `±Fixed::MAX`.
///
/// # Errors
///
/// Returns [`GatewayError::MalformedArgument`] for NaN.
pub fn to_fixed(verb: &'static str, what: &str, value: f64) -> Result<Fixed> {
    if value.is_nan() {
        return Err(GatewayError::malformed(verb, format!("{what} is not a number")));
    }
    Ok(Fixed::saturating_from_num(value).max(-Fixed::MAX))
}

/// Truncate a script number towards zero into an integer.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_int(value: f64) -> i64 {
    if value.is_nan() {
        0
    } else {
        value as i64
    }
}

/// Positional argument accessor for one verb call.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    verb: &'static str,
    values: &'a [ScriptValue],
}

impl<'a> Args<'a> {
    /// Wrap the arguments of a call to `verb`.
    #[must_use]
    pub const fn new(verb: &'static str, values: &'a [ScriptValue]) -> Self {
        Self { verb, values }
    }

    /// Verb being called.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        self.verb
    }

    /// Number of arguments passed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments were passed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument `index` (0-based), `Nil` when absent.
    #[must_use]
    pub fn get(&self, index: usize) -> &'a ScriptValue {
        const NIL: &ScriptValue = &ScriptValue::Nil;
        self.values.get(index).unwrap_or(NIL)
    }

    /// Error for a wrongly typed argument.
    #[must_use]
    pub fn type_error(&self, index: usize, expected: &str) -> GatewayError {
        GatewayError::malformed(
            self.verb,
            format!(
                "bad argument #{} ({expected} expected, got {})",
                index + 1,
                self.get(index).type_name()
            ),
        )
    }

    /// Required number.
    ///
    /// # Errors
    ///
    /// Malformed if missing, not a number, or NaN.
    pub fn number(&self, index: usize) -> Result<f64> {
        match self.get(index) {
            ScriptValue::Number(n) if n.is_nan() => Err(GatewayError::malformed(
                self.verb,
                format!("bad argument #{} (number is NaN)", index + 1),
            )),
            ScriptValue::Number(n) => Ok(*n),
            _ => Err(self.type_error(index, "number")),
        }
    }

    /// Optional number.
    ///
    /// # Errors
    ///
    /// Malformed if present but not a number.
    pub fn opt_number(&self, index: usize) -> Result<Option<f64>> {
        if self.get(index).is_nil() {
            return Ok(None);
        }
        self.number(index).map(Some)
    }

    /// Required fixed-point number.
    ///
    /// # Errors
    ///
    /// Malformed if missing or not a number.
    pub fn fixed(&self, index: usize) -> Result<Fixed> {
        let value = self.number(index)?;
        to_fixed(self.verb, "argument", value)
    }

    /// Optional fixed-point number with a default.
    ///
    /// # Errors
    ///
    /// Malformed if present but not a number.
    pub fn opt_fixed(&self, index: usize, default: Fixed) -> Result<Fixed> {
        match self.opt_number(index)? {
            Some(value) => to_fixed(self.verb, "argument", value),
            None => Ok(default),
        }
    }

    /// Required integer (truncated towards zero).
    ///
    /// # Errors
    ///
    /// Malformed if missing or not a number.
    pub fn int(&self, index: usize) -> Result<i64> {
        self.number(index).map(to_int)
    }

    /// Optional integer.
    ///
    /// # Errors
    ///
    /// Malformed if present but not a number.
    pub fn opt_int(&self, index: usize) -> Result<Option<i64>> {
        Ok(self.opt_number(index)?.map(to_int))
    }

    /// Required string.
    ///
    /// # Errors
    ///
    /// Malformed if missing or not a string.
    pub fn string(&self, index: usize) -> Result<&'a str> {
        self.get(index)
            .as_str()
            .ok_or_else(|| self.type_error(index, "string"))
    }

    /// Optional boolean using script truthiness; `nil` yields `default`.
    #[must_use]
    pub fn opt_bool(&self, index: usize, default: bool) -> bool {
        match self.get(index) {
            ScriptValue::Nil => default,
            value => value.truthy(),
        }
    }

    /// Required table.
    ///
    /// # Errors
    ///
    /// Malformed if missing or not a table.
    pub fn table(&self, index: usize) -> Result<&'a ScriptTable> {
        self.get(index)
            .as_table()
            .ok_or_else(|| self.type_error(index, "table"))
    }

    /// Three consecutive numbers as a vector.
    ///
    /// # Errors
    ///
    /// Malformed if any component is missing or not a number.
    pub fn vec3(&self, index: usize) -> Result<Vec3Fixed> {
        Ok(Vec3Fixed::new(
            self.fixed(index)?,
            self.fixed(index + 1)?,
            self.fixed(index + 2)?,
        ))
    }
}
