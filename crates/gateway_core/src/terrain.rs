//! Height field edits.
//!
//! The height field itself (storage, normals, pathing costs) belongs to the
//! engine; this module keeps the replicated height values and applies the
//! level/adjust/revert operations scripts may perform on them. Edits return
//! the dirty rectangle so the caller can notify pathfinding.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::math::{vec_fixed_serde, Fixed};

/// Inclusive rectangle of height-map vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeightRect {
    /// First column.
    pub x1: u32,
    /// First row.
    pub z1: u32,
    /// Last column.
    pub x2: u32,
    /// Last row.
    pub z2: u32,
}

impl HeightRect {
    /// Smallest rectangle covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            x1: self.x1.min(other.x1),
            z1: self.z1.min(other.z1),
            x2: self.x2.max(other.x2),
            z2: self.z2.max(other.z2),
        }
    }

    fn cells(self) -> impl Iterator<Item = (u32, u32)> {
        (self.z1..=self.z2).flat_map(move |z| (self.x1..=self.x2).map(move |x| (x, z)))
    }
}

/// Which copy of the heights an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeightLayer {
    /// Live heights.
    Current,
    /// Baseline that current heights revert to.
    Original,
}

/// Replicated height values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeightMap {
    width: u32,
    depth: u32,
    square_size: u32,
    #[serde(with = "vec_fixed_serde")]
    current: Vec<Fixed>,
    #[serde(with = "vec_fixed_serde")]
    original: Vec<Fixed>,
    #[serde(with = "vec_fixed_serde")]
    pristine: Vec<Fixed>,
}

impl HeightMap {
    /// Flat map of `width` by `depth` squares (one more vertex per axis).
    #[must_use]
    pub fn flat(width: u32, depth: u32, square_size: u32, height: Fixed) -> Self {
        let count = (width as usize + 1) * (depth as usize + 1);
        let heights = vec![height; count];
        Self {
            width,
            depth,
            square_size: square_size.max(1),
            current: heights.clone(),
            original: heights.clone(),
            pristine: heights,
        }
    }

    /// Map width in squares.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Map depth in squares.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Height of a vertex.
    #[must_use]
    pub fn height(&self, layer: HeightLayer, x: u32, z: u32) -> Option<Fixed> {
        let index = self.index(x, z)?;
        Some(self.layer(layer)[index])
    }

    /// Height under a world position, sampled at the nearest lower vertex.
    #[must_use]
    pub fn ground_height(&self, x: Fixed, z: Fixed) -> Fixed {
        let (x, z) = (self.quantize_x(x), self.quantize_z(z));
        self.height(HeightLayer::Current, x, z).unwrap_or(Fixed::ZERO)
    }

    /// Convert world coordinates into a vertex rectangle.
    ///
    /// Accepts a point `[x, z]` or a rectangle `[x1, z1, x2, z2]`; corners
    /// are reordered and clamped to the map.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedArgument`] for any other arity.
    pub fn world_rect(&self, verb: &'static str, coords: &[Fixed]) -> Result<HeightRect> {
        match *coords {
            [x, z] => {
                let (x, z) = (self.quantize_x(x), self.quantize_z(z));
                Ok(HeightRect { x1: x, z1: z, x2: x, z2: z })
            }
            [x1, z1, x2, z2] => {
                let (x1, x2) = (self.quantize_x(x1.min(x2)), self.quantize_x(x1.max(x2)));
                let (z1, z2) = (self.quantize_z(z1.min(z2)), self.quantize_z(z1.max(z2)));
                Ok(HeightRect { x1, z1, x2, z2 })
            }
            _ => Err(GatewayError::malformed(
                verb,
                "expected a point (x, z) or a rectangle (x1, z1, x2, z2)",
            )),
        }
    }

    /// Set every vertex in `rect` to `height`.
    pub fn level(&mut self, layer: HeightLayer, rect: HeightRect, height: Fixed) {
        self.apply(layer, rect, |_, _| height);
    }

    /// Add `delta` to every vertex in `rect`.
    pub fn adjust(&mut self, layer: HeightLayer, rect: HeightRect, delta: Fixed) {
        self.apply(layer, rect, |current, _| current.saturating_add(delta));
    }

    /// Blend every vertex in `rect` towards its baseline.
    ///
    /// `factor = 1` restores the baseline exactly.
    pub fn revert(&mut self, layer: HeightLayer, rect: HeightRect, factor: Fixed) {
        let one = Fixed::from_num(1);
        self.apply(layer, rect, |current, baseline| {
            if factor == one {
                baseline
            } else {
                factor
                    .saturating_mul(baseline)
                    .saturating_add(one.saturating_sub(factor).saturating_mul(current))
            }
        });
    }

    /// Start a point-wise edit session on `layer`.
    pub fn edit(&mut self, layer: HeightLayer) -> HeightMapEdit<'_> {
        HeightMapEdit {
            map: self,
            layer,
            dirty: None,
            total_change: Fixed::ZERO,
        }
    }

    fn apply(&mut self, layer: HeightLayer, rect: HeightRect, f: impl Fn(Fixed, Fixed) -> Fixed) {
        let width = self.width as usize + 1;
        let (target, baseline) = match layer {
            HeightLayer::Current => (&mut self.current, &self.original),
            HeightLayer::Original => (&mut self.original, &self.pristine),
        };
        for (x, z) in rect.cells() {
            let index = z as usize * width + x as usize;
            target[index] = f(target[index], baseline[index]);
        }
    }

    fn layer(&self, layer: HeightLayer) -> &[Fixed] {
        match layer {
            HeightLayer::Current => &self.current,
            HeightLayer::Original => &self.original,
        }
    }

    fn index(&self, x: u32, z: u32) -> Option<usize> {
        (x <= self.width && z <= self.depth)
            .then(|| z as usize * (self.width as usize + 1) + x as usize)
    }

    fn quantize(&self, coord: Fixed, limit: u32) -> u32 {
        let square = (coord / Fixed::from_num(self.square_size)).floor();
        square
            .max(Fixed::ZERO)
            .saturating_to_num::<u32>()
            .min(limit)
    }

    fn quantize_x(&self, x: Fixed) -> u32 {
        self.quantize(x, self.width)
    }

    fn quantize_z(&self, z: Fixed) -> u32 {
        self.quantize(z, self.depth)
    }
}

/// A point-wise edit session.
///
/// Holds the height map exclusively, so sessions cannot nest. Accumulates
/// the dirty rectangle and the total absolute change of all edits.
pub struct HeightMapEdit<'a> {
    map: &'a mut HeightMap,
    layer: HeightLayer,
    dirty: Option<HeightRect>,
    total_change: Fixed,
}

impl HeightMapEdit<'_> {
    /// Add `delta` to the vertex under a world position.
    ///
    /// Returns the new height.
    pub fn add_height(&mut self, x: Fixed, z: Fixed, delta: Fixed) -> Fixed {
        self.modify(x, z, |old| old.saturating_add(delta))
    }

    /// Move the vertex under a world position towards `height`.
    ///
    /// `t` is the blend factor (1 sets the height outright). Returns the new
    /// height.
    pub fn set_height(&mut self, x: Fixed, z: Fixed, height: Fixed, t: Fixed) -> Fixed {
        let keep = Fixed::from_num(1).saturating_sub(t);
        self.modify(x, z, |old| old.saturating_mul(keep).saturating_add(height.saturating_mul(t)))
    }

    /// Rectangle touched so far.
    #[must_use]
    pub const fn dirty(&self) -> Option<HeightRect> {
        self.dirty
    }

    /// Sum of absolute height changes so far.
    #[must_use]
    pub const fn total_change(&self) -> Fixed {
        self.total_change
    }

    fn modify(&mut self, x: Fixed, z: Fixed, f: impl Fn(Fixed) -> Fixed) -> Fixed {
        let (x, z) = (self.map.quantize_x(x), self.map.quantize_z(z));
        let Some(index) = self.map.index(x, z) else {
            return Fixed::ZERO;
        };
        let heights = match self.layer {
            HeightLayer::Current => &mut self.map.current,
            HeightLayer::Original => &mut self.map.original,
        };
        let old = heights[index];
        let new = f(old);
        heights[index] = new;

        self.total_change = self
            .total_change
            .saturating_add(new.saturating_sub(old).saturating_abs());
        let point = HeightRect { x1: x, z1: z, x2: x, z2: z };
        self.dirty = Some(self.dirty.map_or(point, |rect| rect.union(point)));
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(v: i32) -> Fixed {
        Fixed::from_num(v)
    }

    fn map() -> HeightMap {
        HeightMap::flat(16, 16, 8, fx(10))
    }

    #[test]
    fn test_point_and_rect_quantization() {
        let map = map();
        let point = map.world_rect("LevelHeightMap", &[fx(17), fx(9)]).unwrap();
        assert_eq!(point, HeightRect { x1: 2, z1: 1, x2: 2, z2: 1 });

        // Reversed corners are reordered and clamped to the map
        let rect = map
            .world_rect("LevelHeightMap", &[fx(1000), fx(16), fx(-50), fx(0)])
            .unwrap();
        assert_eq!(rect, HeightRect { x1: 0, z1: 0, x2: 16, z2: 2 });
    }

    #[test]
    fn test_bad_arity() {
        let err = map().world_rect("AdjustHeightMap", &[fx(1), fx(2), fx(3)]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_level_adjust_revert() {
        let mut map = map();
        let rect = HeightRect { x1: 1, z1: 1, x2: 2, z2: 2 };
        map.level(HeightLayer::Current, rect, fx(50));
        map.adjust(HeightLayer::Current, rect, fx(-5));
        assert_eq!(map.height(HeightLayer::Current, 2, 2), Some(fx(45)));
        assert_eq!(map.height(HeightLayer::Current, 3, 3), Some(fx(10)));

        // Half-way back to the baseline of 10
        map.revert(HeightLayer::Current, rect, Fixed::from_num(0.5));
        assert_eq!(map.height(HeightLayer::Current, 1, 1), Some(Fixed::from_num(27.5)));

        map.revert(HeightLayer::Current, rect, fx(1));
        assert_eq!(map.height(HeightLayer::Current, 1, 1), Some(fx(10)));
    }

    #[test]
    fn test_original_layer_reverts_to_pristine() {
        let mut map = map();
        let rect = HeightRect { x1: 0, z1: 0, x2: 0, z2: 0 };
        map.level(HeightLayer::Original, rect, fx(99));
        assert_eq!(map.height(HeightLayer::Current, 0, 0), Some(fx(10)));
        map.revert(HeightLayer::Original, rect, fx(1));
        assert_eq!(map.height(HeightLayer::Original, 0, 0), Some(fx(10)));
    }

    #[test]
    fn test_edit_session_accumulates() {
        let mut map = map();
        let mut edit = map.edit(HeightLayer::Current);
        edit.add_height(fx(8), fx(8), fx(5));
        edit.set_height(fx(32), fx(16), fx(0), fx(1));
        assert_eq!(edit.total_change(), fx(15));
        assert_eq!(edit.dirty(), Some(HeightRect { x1: 1, z1: 1, x2: 4, z2: 2 }));
        assert_eq!(map.height(HeightLayer::Current, 1, 1), Some(fx(15)));
    }

    #[test]
    fn test_edit_session_saturates() {
        let mut map = map();
        let mut edit = map.edit(HeightLayer::Current);
        assert_eq!(edit.add_height(fx(8), fx(8), Fixed::MAX), Fixed::MAX);
        assert_eq!(edit.add_height(fx(8), fx(8), Fixed::MAX), Fixed::MAX);
        assert_eq!(edit.set_height(fx(8), fx(8), -Fixed::MAX, fx(1)), -Fixed::MAX);
        assert_eq!(edit.total_change(), Fixed::MAX);
    }
}
