//! Fixed-point math utilities for deterministic state.
//!
//! Every physical quantity and resource amount crossing the gateway is
//! stored as fixed-point so that all clients apply bit-identical updates.
//! Floating-point values only exist at the script boundary.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation state.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// Fixed-point 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec3Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate (height).
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
    /// Z coordinate.
    #[serde(with = "fixed_serde")]
    pub z: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Human-readable serde support for fixed-point numbers.
///
/// Used by hand-written configuration and data files, where values are
/// written as decimals. The decimal-to-fixed conversion is exact for the
/// same text on every platform.
pub mod fixed_num_serde {
    use super::Fixed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as a decimal.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_num::<f64>().serialize(serializer)
    }

    /// Deserialize a fixed-point number from a decimal.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| D::Error::custom(format!("{value} out of fixed-point range")))
    }
}

/// Human-readable serde support for `Vec<Fixed>`.
pub mod vec_fixed_num_serde {
    use super::Fixed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a list of fixed-point numbers as decimals.
    pub fn serialize<S>(values: &[Fixed], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nums: Vec<f64> = values.iter().map(|v| v.to_num::<f64>()).collect();
        nums.serialize(serializer)
    }

    /// Deserialize a list of fixed-point numbers from decimals.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fixed>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<f64>::deserialize(deserializer)?
            .into_iter()
            .map(|value| {
                Fixed::checked_from_num(value)
                    .ok_or_else(|| D::Error::custom(format!("{value} out of fixed-point range")))
            })
            .collect()
    }
}

/// Serde support for `Vec<Fixed>`.
pub mod vec_fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a list of fixed-point numbers as raw bits.
    pub fn serialize<S>(values: &[Fixed], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bits: Vec<i64> = values.iter().map(|v| v.to_bits()).collect();
        bits.serialize(serializer)
    }

    /// Deserialize a list of fixed-point numbers from raw bits.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fixed>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = Vec::<i64>::deserialize(deserializer)?;
        Ok(bits.into_iter().map(Fixed::from_bits).collect())
    }
}

impl Vec3Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
    };

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x
            .saturating_mul(other.x)
            .saturating_add(self.y.saturating_mul(other.y))
            .saturating_add(self.z.saturating_mul(other.z))
    }

    /// Cross product of two vectors.
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y.saturating_mul(other.z).saturating_sub(self.z.saturating_mul(other.y)),
            y: self.z.saturating_mul(other.x).saturating_sub(self.x.saturating_mul(other.z)),
            z: self.x.saturating_mul(other.y).saturating_sub(self.y.saturating_mul(other.x)),
        }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Normalize vector using fixed-point math.
    ///
    /// Returns [`Vec3Fixed::ZERO`] for a zero-length input.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }
        Self {
            x: self.x.saturating_div(len),
            y: self.y.saturating_div(len),
            z: self.z.saturating_div(len),
        }
    }

    /// Clamp every component into `[-limit, limit]`.
    #[must_use]
    pub fn clamp_components(self, limit: Fixed) -> Self {
        let limit = limit.saturating_abs();
        Self {
            x: self.x.clamp(-limit, limit),
            y: self.y.clamp(-limit, limit),
            z: self.z.clamp(-limit, limit),
        }
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::from_num(1) {
        value
    } else {
        Fixed::from_num(1)
    };

    for _ in 0..48 {
        let mid = low + (high - low) / 2;
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Whether `value` is within `tolerance` of `target`.
#[must_use]
pub fn approx_eq(value: Fixed, target: Fixed, tolerance: Fixed) -> bool {
    value.saturating_sub(target).saturating_abs() <= tolerance
}

impl std::ops::Add for Vec3Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_add(rhs.x),
            y: self.y.saturating_add(rhs.y),
            z: self.z.saturating_add(rhs.z),
        }
    }
}

impl std::ops::Sub for Vec3Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_sub(rhs.x),
            y: self.y.saturating_sub(rhs.y),
            z: self.z.saturating_sub(rhs.z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: i32, y: i32, z: i32) -> Vec3Fixed {
        Vec3Fixed::new(Fixed::from_num(x), Fixed::from_num(y), Fixed::from_num(z))
    }

    #[test]
    fn test_cross_of_axes() {
        let x = v(1, 0, 0);
        let y = v(0, 1, 0);
        assert_eq!(x.cross(y), v(0, 0, 1));
        assert_eq!(x.dot(y), Fixed::ZERO);
    }

    #[test]
    fn test_normalize_unit_length() {
        let n = v(3, 0, 4).normalize();
        assert!(approx_eq(n.length(), Fixed::from_num(1), Fixed::from_num(0.0001)));
        assert!(approx_eq(n.x, Fixed::from_num(0.6), Fixed::from_num(0.0001)));
    }

    #[test]
    fn test_normalize_zero() {
        assert_eq!(Vec3Fixed::ZERO.normalize(), Vec3Fixed::ZERO);
    }

    #[test]
    fn test_clamp_components() {
        let clamped = v(5000, -5000, 10).clamp_components(Fixed::from_num(1000));
        assert_eq!(clamped, v(1000, -1000, 10));
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(fixed_sqrt(Fixed::from_num(16)), Fixed::from_num(4));
        assert_eq!(fixed_sqrt(Fixed::from_num(-4)), Fixed::ZERO);
    }

    #[test]
    fn test_extreme_vectors_saturate() {
        let big = Vec3Fixed::new(Fixed::MAX, Fixed::MAX, Fixed::MAX);
        assert_eq!(big + big, big);
        assert_eq!(big - big, Vec3Fixed::ZERO);
        assert_eq!(big.dot(big), Fixed::MAX);
        assert!(big.normalize().x > Fixed::ZERO);
    }
}
