//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `expand` call will overwrite
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Tight bounds of a point slice, `None` when the slice is empty
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Aabb::new(*first, *first);
        for &p in rest {
            aabb.expand(p);
        }
        Some(aabb)
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Largest side length
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    /// Axis (0 = x, 1 = y, 2 = z) with the largest side
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if `other` lies entirely within this box (shared faces allowed)
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return a copy grown by `margin` on every side
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Get child octant AABB for octree subdivision
    /// index: 0-7 representing xyz octant (bit 0=x, bit 1=y, bit 2=z)
    pub fn child_octant(&self, index: u8) -> Aabb {
        let center = self.center();
        let pick = |bit: u8, lo: f32, mid: f32, hi: f32| {
            if index & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (x0, x1) = pick(1, self.min.x, center.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, center.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, center.z, self.max.z);
        Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    /// Octant of `p` relative to the box center; points on the center plane
    /// go to the high half
    pub fn octant_of(&self, p: Vec3) -> u8 {
        let c = self.center();
        (p.x >= c.x) as u8 | ((p.y >= c.y) as u8) << 1 | ((p.z >= c.z) as u8) << 2
    }
}
