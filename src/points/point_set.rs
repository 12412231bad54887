//! Copy-on-replace point buffer
//!
//! A [`PointSet`] never changes after construction. Replacing the active
//! cloud means building a new `PointSet`, which receives a fresh version.
//! Index structures remember the version they were built from and treat any
//! other version as stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::Vec3;
use crate::math::Aabb;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Identity of one point set; unique for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointSetVersion(u64);

impl PointSetVersion {
    fn next() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw version number
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Immutable, cheaply clonable point buffer with an identity marker
#[derive(Clone, Debug)]
pub struct PointSet {
    version: PointSetVersion,
    positions: Arc<[Vec3]>,
    normals: Option<Arc<[Vec3]>>,
}

impl PointSet {
    /// Wrap positions in a new version
    pub fn new(positions: impl Into<Arc<[Vec3]>>) -> Self {
        Self {
            version: PointSetVersion::next(),
            positions: positions.into(),
            normals: None,
        }
    }

    /// Wrap positions and per-point normals in a new version
    ///
    /// Normals are dropped when their count does not match the positions.
    pub fn with_normals(
        positions: impl Into<Arc<[Vec3]>>,
        normals: impl Into<Arc<[Vec3]>>,
    ) -> Self {
        let positions = positions.into();
        let normals = normals.into();
        let normals = if normals.len() == positions.len() {
            Some(normals)
        } else {
            log::warn!(
                "Ignoring {} normals for {} points",
                normals.len(),
                positions.len()
            );
            None
        };
        Self {
            version: PointSetVersion::next(),
            positions,
            normals,
        }
    }

    /// Build from a flat `[x0, y0, z0, x1, ...]` buffer; a trailing partial
    /// triple is ignored
    pub fn from_flat(coords: &[f32]) -> Self {
        let positions: Vec<Vec3> = coords
            .chunks_exact(3)
            .map(|c| Vec3::new(c[0], c[1], c[2]))
            .collect();
        Self::new(positions)
    }

    /// An empty set (still a distinct version)
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Identity of this buffer
    pub fn version(&self) -> PointSetVersion {
        self.version
    }

    /// All positions
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Per-point normals, if present
    pub fn normals(&self) -> Option<&[Vec3]> {
        self.normals.as_deref()
    }

    /// Position of one point, `None` when out of range
    pub fn get(&self, index: usize) -> Option<Vec3> {
        self.positions.get(index).copied()
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the set holds no points
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Tight bounds of all points
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.positions)
    }

    /// Whether `other` is the same version (same identity, not same contents)
    pub fn same_version(&self, other: &PointSet) -> bool {
        self.version == other.version
    }
}

impl Default for PointSet {
    fn default() -> Self {
        Self::empty()
    }
}
