//! Ray picking against a point set
//!
//! Each point is treated as a sphere of radius `threshold`. The first hit is
//! the point whose closest approach lies earliest along the ray; the
//! reported distance is from the ray origin to the point itself, never to
//! the sphere surface.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::Ray;
use crate::points::{PointSet, PointSetVersion};
use crate::spatial::bvh::{DEFAULT_LEAF_SIZE, PointBvh};

/// Configuration for ray picking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayConfig {
    /// Effective point radius for intersection
    pub threshold: f32,
    /// Maximum points per BVH leaf
    pub leaf_size: usize,
    /// Below this many points the intersector scans the buffer directly
    pub brute_force_below: usize,
}

impl Default for RayConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            leaf_size: DEFAULT_LEAF_SIZE,
            brute_force_below: 64,
        }
    }
}

/// First point struck by a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub point_index: u32,
    pub point: Vec3,
    /// `|ray.origin - point|`
    pub distance: f32,
}

/// Ray-point intersection index for one point set version
pub struct PointRayIntersector {
    points: PointSet,
    threshold: f32,
    bvh: Option<PointBvh>,
}

impl PointRayIntersector {
    pub fn build(points: &PointSet, config: &RayConfig) -> Self {
        let bvh = (points.len() >= config.brute_force_below).then(|| {
            let bvh = PointBvh::build(points, config.leaf_size);
            log::debug!(
                "Built ray BVH: {} points, {} nodes",
                bvh.len(),
                bvh.node_count()
            );
            bvh
        });
        Self {
            points: points.clone(),
            threshold: sanitize_threshold(config.threshold),
            bvh,
        }
    }

    /// First hit using the configured threshold
    pub fn raycast(&self, ray: &Ray) -> Option<RayHit> {
        self.raycast_with_threshold(ray, self.threshold)
    }

    /// First hit for an origin and (not necessarily unit) direction
    ///
    /// A zero-length direction yields `None`.
    pub fn raycast_from(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let ray = Ray::try_new(origin, direction)?;
        self.raycast(&ray)
    }

    /// First hit with an explicit threshold; no rebuild needed
    ///
    /// Rays without a finite unit direction never hit; build them with
    /// [`Ray::try_new`] to normalize first.
    pub fn raycast_with_threshold(&self, ray: &Ray, threshold: f32) -> Option<RayHit> {
        if !is_pickable(ray) {
            return None;
        }
        let threshold = sanitize_threshold(threshold);
        let Some(bvh) = &self.bvh else {
            return raycast_brute_force(self.points.positions(), ray, threshold);
        };
        let hit = bvh.first_hit(ray, threshold)?;
        let point = self.points.positions()[hit.index as usize];
        Some(RayHit {
            point_index: hit.index,
            point,
            distance: ray.origin.distance(point),
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = sanitize_threshold(threshold);
    }

    /// Whether the BVH path is in use
    pub fn is_accelerated(&self) -> bool {
        self.bvh.is_some()
    }

    pub fn is_current_for(&self, points: &PointSet) -> bool {
        self.points.same_version(points)
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    pub fn version(&self) -> PointSetVersion {
        self.points.version()
    }
}

/// Un-accelerated scan with the same hit rule as the BVH path
pub fn raycast_brute_force(points: &[Vec3], ray: &Ray, threshold: f32) -> Option<RayHit> {
    if !is_pickable(ray) {
        return None;
    }
    let threshold_sq = sanitize_threshold(threshold).powi(2);
    let mut best: Option<(f32, u32)> = None;

    for (i, &p) in points.iter().enumerate() {
        if !p.is_finite() {
            continue;
        }
        let t = ray.closest_t(p);
        if t < 0.0 || ray.distance_sq_to_line(p) > threshold_sq {
            continue;
        }
        // Strict comparison keeps the lower index on ties
        if best.is_none_or(|(best_t, _)| t < best_t) {
            best = Some((t, i as u32));
        }
    }

    best.map(|(_, i)| {
        let point = points[i as usize];
        RayHit {
            point_index: i,
            point,
            distance: ray.origin.distance(point),
        }
    })
}

/// `closest_t` and the line distance are only metric along a unit direction
fn is_pickable(ray: &Ray) -> bool {
    ray.origin.is_finite() && ray.direction.is_finite() && ray.direction.is_normalized()
}

fn sanitize_threshold(threshold: f32) -> f32 {
    if threshold.is_finite() && threshold > 0.0 {
        threshold
    } else {
        0.0
    }
}
