//! Height field verbs.
//!
//! Coordinates are world units: `[x, z]` addresses one vertex and
//! `[x1, z1, x2, z2]` a rectangle. Every edit ends with one
//! `terrain_changed` notification covering what it touched.

use crate::error::Result;
use crate::math::Fixed;
use crate::terrain::{HeightLayer, HeightMapEdit};

use super::SyncedGateway;

const fn verb(layer: HeightLayer, current: &'static str, original: &'static str) -> &'static str {
    match layer {
        HeightLayer::Current => current,
        HeightLayer::Original => original,
    }
}

impl SyncedGateway {
    /// Set every vertex in the region to `height`.
    ///
    /// # Errors
    ///
    /// Malformed for coordinates that are neither a point nor a rectangle.
    pub fn level_height_map(&mut self, layer: HeightLayer, coords: &[Fixed], height: Fixed) -> Result<()> {
        let rect = self.terrain.world_rect(
            verb(layer, "LevelHeightMap", "LevelOriginalHeightMap"),
            coords,
        )?;
        self.sync.assert_synced("LevelHeightMap", &(rect, height));
        self.terrain.level(layer, rect, height);
        self.services.terrain_changed(rect);
        Ok(())
    }

    /// Raise (or lower) every vertex in the region by `delta`.
    ///
    /// # Errors
    ///
    /// Malformed for coordinates that are neither a point nor a rectangle.
    pub fn adjust_height_map(&mut self, layer: HeightLayer, coords: &[Fixed], delta: Fixed) -> Result<()> {
        let rect = self.terrain.world_rect(
            verb(layer, "AdjustHeightMap", "AdjustOriginalHeightMap"),
            coords,
        )?;
        self.sync.assert_synced("AdjustHeightMap", &(rect, delta));
        self.terrain.adjust(layer, rect, delta);
        self.services.terrain_changed(rect);
        Ok(())
    }

    /// Blend the region back towards its baseline; `factor = 1` restores it.
    ///
    /// # Errors
    ///
    /// Malformed for coordinates that are neither a point nor a rectangle.
    pub fn revert_height_map(&mut self, layer: HeightLayer, coords: &[Fixed], factor: Fixed) -> Result<()> {
        let rect = self.terrain.world_rect(
            verb(layer, "RevertHeightMap", "RevertOriginalHeightMap"),
            coords,
        )?;
        self.sync.assert_synced("RevertHeightMap", &(rect, factor));
        self.terrain.revert(layer, rect, factor);
        self.services.terrain_changed(rect);
        Ok(())
    }

    /// Run point edits in one session and return the total absolute change.
    ///
    /// `edit` may call [`HeightMapEdit::add_height`] and
    /// [`HeightMapEdit::set_height`] any number of times; the changed area
    /// is reported once when it returns.
    pub fn set_height_map_func<F>(&mut self, layer: HeightLayer, edit: F) -> Fixed
    where
        F: FnOnce(&mut HeightMapEdit<'_>),
    {
        let mut session = self.terrain.edit(layer);
        edit(&mut session);
        let (dirty, total) = (session.dirty(), session.total_change());
        if let Some(rect) = dirty {
            self.sync.assert_synced("SetHeightMapFunc", &(rect, total));
            self.services.terrain_changed(rect);
        }
        total
    }
}
