//! Uniform grid index for brush radius queries
//!
//! Points are bucketed by `floor(p / cell_size)`. When the cell size is
//! derived from the query radius (`max(2 * radius, min_cell)`), a query only
//! ever touches the 3x3x3 block around the center cell, so candidate counts
//! stay flat as the cloud grows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, Vec3};
use crate::points::{PointSet, PointSetVersion};

/// Radius may drift this far (either way) from the sizing radius before the
/// grid should be rebuilt
pub const REBUILD_RADIUS_RATIO: f32 = 2.0;

/// Configuration for grid sizing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Lower bound on cell size so tiny brushes don't explode the cell count
    pub min_cell_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_cell_size: 1.0e-3,
        }
    }
}

/// Uniform-grid acceleration structure over one point set version
pub struct SpatialGridIndex {
    points: PointSet,
    cell_size: f32,
    /// Radius the cell size was derived from, if any
    sizing_radius: Option<f32>,
    cells: HashMap<IVec3, Vec<u32>>,
}

impl SpatialGridIndex {
    /// Bucket every point into cells of `cell_size`
    ///
    /// A non-positive or non-finite cell size falls back to the default
    /// minimum cell size. Non-finite points are not indexed.
    pub fn build(points: &PointSet, cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            log::warn!("Invalid grid cell size {cell_size}, using default");
            GridConfig::default().min_cell_size
        };

        let mut cells: HashMap<IVec3, Vec<u32>> = HashMap::new();
        for (i, &p) in points.positions().iter().enumerate() {
            if !p.is_finite() {
                continue;
            }
            cells.entry(cell_key(p, cell_size)).or_default().push(i as u32);
        }

        log::debug!(
            "Built grid over {} points: {} cells of size {:.4}",
            points.len(),
            cells.len(),
            cell_size
        );

        Self {
            points: points.clone(),
            cell_size,
            sizing_radius: None,
            cells,
        }
    }

    /// Build with the cell size derived from a brush radius
    pub fn for_radius(points: &PointSet, radius: f32, min_cell: f32) -> Self {
        let mut grid = Self::build(points, (2.0 * radius).max(min_cell));
        if radius.is_finite() && radius > 0.0 {
            grid.sizing_radius = Some(radius);
        }
        grid
    }

    /// All point indices within `radius` of `center`, ascending
    ///
    /// Degenerate input (non-positive radius, non-finite center, empty set)
    /// yields an empty list.
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<u32> {
        if !(radius.is_finite() && radius > 0.0) || !center.is_finite() || self.cells.is_empty() {
            return Vec::new();
        }

        let positions = self.points.positions();
        let radius_sq = radius * radius;
        let reach = (radius / self.cell_size).ceil() as i64;
        let side = reach.saturating_mul(2).saturating_add(1);

        let mut result = Vec::new();
        let mut collect = |indices: &[u32]| {
            for &i in indices {
                if positions[i as usize].distance_squared(center) <= radius_sq {
                    result.push(i);
                }
            }
        };

        if side.saturating_mul(side).saturating_mul(side) > self.cells.len() as i64 {
            // Sphere spans more cells than exist; scanning occupied cells is cheaper
            let lo = cell_key(center - Vec3::splat(radius), self.cell_size);
            let hi = cell_key(center + Vec3::splat(radius), self.cell_size);
            for (key, indices) in &self.cells {
                if key.cmpge(lo).all() && key.cmple(hi).all() {
                    collect(indices);
                }
            }
        } else {
            let base = cell_key(center, self.cell_size);
            let reach = reach as i32;
            for dz in -reach..=reach {
                for dy in -reach..=reach {
                    for dx in -reach..=reach {
                        let Some(key) = offset_key(base, IVec3::new(dx, dy, dz)) else {
                            continue;
                        };
                        if let Some(indices) = self.cells.get(&key) {
                            collect(indices);
                        }
                    }
                }
            }
        }

        result.sort_unstable();
        result
    }

    /// Whether this grid should be rebuilt before answering for `points` at
    /// `radius`
    ///
    /// True when the point set identity changed, or when the grid was sized
    /// for a radius and `radius` has drifted by more than
    /// [`REBUILD_RADIUS_RATIO`] in either direction.
    pub fn needs_rebuild(&self, points: &PointSet, radius: f32) -> bool {
        if !self.is_current_for(points) {
            return true;
        }
        match self.sizing_radius {
            Some(sized) if radius.is_finite() && radius > 0.0 => {
                let ratio = radius / sized;
                ratio > REBUILD_RADIUS_RATIO || ratio < 1.0 / REBUILD_RADIUS_RATIO
            }
            _ => false,
        }
    }

    /// Whether this grid was built from `points`
    pub fn is_current_for(&self, points: &PointSet) -> bool {
        self.points.same_version(points)
    }

    /// Version of the indexed point set
    pub fn version(&self) -> PointSetVersion {
        self.points.version()
    }

    /// Edge length of one cell
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Radius the cell size was derived from
    pub fn sizing_radius(&self) -> Option<f32> {
        self.sizing_radius
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// O(n) reference scan with the same inclusion rule as the grid
pub fn query_radius_brute_force(points: &[Vec3], center: Vec3, radius: f32) -> Vec<u32> {
    if !(radius.is_finite() && radius > 0.0) || !center.is_finite() {
        return Vec::new();
    }
    let radius_sq = radius * radius;
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.distance_squared(center) <= radius_sq)
        .map(|(i, _)| i as u32)
        .collect()
}

/// Cell of `p`; saturates at the `i32` range for coordinates far beyond
/// `cell_size`, which keeps keys monotone in position
fn cell_key(p: Vec3, cell_size: f32) -> IVec3 {
    (p / cell_size).floor().as_ivec3()
}

/// `base + offset`, or `None` when any axis leaves the `i32` range
fn offset_key(base: IVec3, offset: IVec3) -> Option<IVec3> {
    Some(IVec3::new(
        base.x.checked_add(offset.x)?,
        base.y.checked_add(offset.y)?,
        base.z.checked_add(offset.z)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(rng: &mut StdRng, n: usize, extent: f32) -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                )
            })
            .collect()
    }

    #[test]
    fn test_matches_brute_force_random() {
        let mut rng = StdRng::seed_from_u64(7);
        let positions = random_points(&mut rng, 1000, 2.0);
        let points = PointSet::new(positions.clone());
        let grid = SpatialGridIndex::for_radius(&points, 0.5, GridConfig::default().min_cell_size);

        for _ in 0..20 {
            let center = random_points(&mut rng, 1, 2.5)[0];
            let expected = query_radius_brute_force(&positions, center, 0.5);
            assert_eq!(grid.query_radius(center, 0.5), expected, "center {center:?}");
        }
    }

    #[test]
    fn test_matches_brute_force_with_other_radii() {
        let mut rng = StdRng::seed_from_u64(11);
        let positions = random_points(&mut rng, 500, 1.0);
        let points = PointSet::new(positions.clone());
        // Grid sized for 0.1, queried with radii both smaller and far larger
        let grid = SpatialGridIndex::for_radius(&points, 0.1, 1.0e-3);

        for radius in [0.01, 0.1, 0.35, 3.0] {
            for _ in 0..5 {
                let center = random_points(&mut rng, 1, 1.0)[0];
                assert_eq!(
                    grid.query_radius(center, radius),
                    query_radius_brute_force(&positions, center, radius),
                    "radius {radius}"
                );
            }
        }
    }

    #[test]
    fn test_boundary_point_included() {
        let points = PointSet::new(vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.5, 0.0, 0.0)]);
        let grid = SpatialGridIndex::for_radius(&points, 1.0, 1.0e-3);
        assert_eq!(grid.query_radius(Vec3::ZERO, 1.0), vec![0, 1]);
    }

    #[test]
    fn test_negative_coordinates() {
        let points = PointSet::new(vec![Vec3::splat(-0.05), Vec3::splat(0.05)]);
        let grid = SpatialGridIndex::build(&points, 0.1);
        assert_eq!(grid.query_radius(Vec3::ZERO, 0.1), vec![0, 1]);
    }

    #[test]
    fn test_degenerate_queries() {
        let points = PointSet::new(vec![Vec3::ZERO, Vec3::ONE]);
        let grid = SpatialGridIndex::for_radius(&points, 0.5, 1.0e-3);
        assert!(grid.query_radius(Vec3::ZERO, 0.0).is_empty());
        assert!(grid.query_radius(Vec3::ZERO, -1.0).is_empty());
        assert!(grid.query_radius(Vec3::ZERO, f32::NAN).is_empty());
        assert!(grid.query_radius(Vec3::splat(f32::INFINITY), 1.0).is_empty());

        let empty = SpatialGridIndex::for_radius(&PointSet::empty(), 0.5, 1.0e-3);
        assert!(empty.query_radius(Vec3::ZERO, 10.0).is_empty());
        assert_eq!(empty.cell_count(), 0);
    }

    #[test]
    fn test_cell_size_from_radius() {
        let points = PointSet::new(vec![Vec3::ZERO]);
        assert_eq!(SpatialGridIndex::for_radius(&points, 0.5, 1.0e-3).cell_size(), 1.0);
        assert_eq!(SpatialGridIndex::for_radius(&points, 0.0001, 0.01).cell_size(), 0.01);
        // Invalid explicit size falls back
        assert_eq!(
            SpatialGridIndex::build(&points, 0.0).cell_size(),
            GridConfig::default().min_cell_size
        );
    }

    #[test]
    fn test_needs_rebuild() {
        let points = PointSet::new(vec![Vec3::ZERO, Vec3::ONE]);
        let grid = SpatialGridIndex::for_radius(&points, 1.0, 1.0e-3);

        assert!(!grid.needs_rebuild(&points, 1.0));
        assert!(!grid.needs_rebuild(&points, 1.9));
        assert!(!grid.needs_rebuild(&points, 0.6));
        assert!(grid.needs_rebuild(&points, 2.1));
        assert!(grid.needs_rebuild(&points, 0.4));

        // Same contents, new identity
        let replaced = PointSet::new(points.positions().to_vec());
        assert!(grid.needs_rebuild(&replaced, 1.0));
    }

    #[test]
    fn test_non_finite_points_skipped() {
        let points = PointSet::new(vec![Vec3::ZERO, Vec3::splat(f32::NAN)]);
        let grid = SpatialGridIndex::build(&points, 1.0);
        assert_eq!(grid.query_radius(Vec3::ZERO, 100.0), vec![0]);
    }

    #[test]
    fn test_far_coordinates_with_small_cells() {
        // 3e6 / 1e-3 is past i32::MAX, so keys saturate at the range edge
        let mut rng = StdRng::seed_from_u64(41);
        let mut pts = random_points(&mut rng, 40, 1.0);
        pts.push(Vec3::new(3.0e6, 0.0, 0.0));
        pts.push(Vec3::new(3.0e6, 0.25, 0.0));
        pts.push(Vec3::new(-3.0e6, 0.0, -3.0e6));
        pts.push(Vec3::new(2.5e6, 1.0, 0.0));
        let points = PointSet::new(pts);
        let grid = SpatialGridIndex::build(&points, 1e-3);

        let queries = [
            (Vec3::new(3.0e6, 0.0, 0.0), 1e-4),
            (Vec3::new(3.0e6, 0.0, 0.0), 0.5),
            (Vec3::new(-3.0e6, 0.0, -3.0e6), 1e-3),
            (Vec3::new(2.5e6, 1.0, 0.0), 0.01),
            (Vec3::ZERO, 0.5),
        ];
        for (center, radius) in queries {
            assert_eq!(
                grid.query_radius(center, radius),
                query_radius_brute_force(points.positions(), center, radius),
                "center {center:?} radius {radius}"
            );
        }
        assert_eq!(grid.query_radius(Vec3::new(3.0e6, 0.0, 0.0), 1e-4), vec![40]);
    }

    #[test]
    fn test_offset_key_overflow() {
        assert_eq!(offset_key(IVec3::splat(i32::MAX), IVec3::new(1, 0, 0)), None);
        assert_eq!(offset_key(IVec3::splat(i32::MIN), IVec3::new(0, 0, -1)), None);
        assert_eq!(
            offset_key(IVec3::splat(i32::MAX), IVec3::new(-1, 0, 0)),
            Some(IVec3::new(i32::MAX - 1, i32::MAX, i32::MAX))
        );
    }
}
