//! Sphere brush selection
//!
//! Keeps one grid around between strokes and rebuilds it only when the
//! point set is replaced or the brush radius drifts far from the radius the
//! grid was sized for.

use crate::core::types::Vec3;
use crate::points::PointSet;
use crate::spatial::grid::{GridConfig, SpatialGridIndex};

#[derive(Default)]
pub struct BrushSelector {
    config: GridConfig,
    grid: Option<SpatialGridIndex>,
    rebuilds: usize,
}

impl BrushSelector {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            grid: None,
            rebuilds: 0,
        }
    }

    /// Indices of points within `radius` of `center`, ascending
    pub fn select(&mut self, points: &PointSet, center: Vec3, radius: f32) -> Vec<u32> {
        if points.is_empty() || !(radius.is_finite() && radius > 0.0) {
            return Vec::new();
        }
        let stale = self
            .grid
            .as_ref()
            .is_none_or(|grid| grid.needs_rebuild(points, radius));
        if stale {
            self.grid = Some(SpatialGridIndex::for_radius(
                points,
                radius,
                self.config.min_cell_size,
            ));
            self.rebuilds += 1;
        }
        match &self.grid {
            Some(grid) => grid.query_radius(center, radius),
            None => Vec::new(),
        }
    }

    /// Drop the cached grid
    pub fn invalidate(&mut self) {
        self.grid = None;
    }

    /// Grids built so far
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn grid(&self) -> Option<&SpatialGridIndex> {
        self.grid.as_ref()
    }
}
