//! Ray type and operations

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Precomputed 1/direction for fast AABB intersection
    pub inv_direction: Vec3,
}

impl Ray {
    /// Create a new ray (direction should be normalized)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vec3::new(
                1.0 / direction.x,
                1.0 / direction.y,
                1.0 / direction.z,
            ),
        }
    }

    /// Create a ray from an arbitrary direction, normalizing it
    ///
    /// Returns `None` for zero-length or non-finite input.
    pub fn try_new(origin: Vec3, direction: Vec3) -> Option<Self> {
        if !origin.is_finite() {
            return None;
        }
        let direction = direction.try_normalize()?;
        Some(Self::new(origin, direction))
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Parameter of the closest approach to `p` (may be negative)
    pub fn closest_t(&self, p: Vec3) -> f32 {
        (p - self.origin).dot(self.direction)
    }

    /// Squared distance from `p` to the infinite line through the ray
    pub fn distance_sq_to_line(&self, p: Vec3) -> f32 {
        let t = self.closest_t(p);
        (self.at(t) - p).length_squared()
    }

    /// Ray-AABB intersection using slab method
    /// Returns Some((t_near, t_far)) if intersection, None otherwise
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;

        // 0 * inf in a flat slab yields NaN in both t1 and t2; the scalar
        // f32::max/min reductions below skip NaN lanes
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_near = t_min.x.max(t_min.y).max(t_min.z);
        let t_far = t_max.x.min(t_max.y).min(t_max.z);

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }
}
