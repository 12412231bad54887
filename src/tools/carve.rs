//! Ray carving
//!
//! A carve stroke casts rays from the camera; each ray that strikes the
//! cloud marks free space in front of the hit and a surface band around it.
//! How far the surface band reaches behind the hit scales with the local
//! point spacing, so sparse regions get a thicker band than dense ones.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::Ray;
use crate::spatial::knn::IncrementalKnnEstimator;
use crate::spatial::raycast::PointRayIntersector;

/// Back buffer sizing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarveConfig {
    /// Multiplier applied to the local spacing
    pub back_buffer_coefficient: f32,
    /// Distance behind the hit used when no spacing is known
    pub back_buffer_width: f32,
}

impl Default for CarveConfig {
    fn default() -> Self {
        Self {
            back_buffer_coefficient: 1.0,
            back_buffer_width: 0.0,
        }
    }
}

/// One ray of a carve stroke that hit the cloud
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarveRay {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Distance from `origin` to the hit point itself
    pub hit_distance: f32,
    #[serde(rename = "hit_point_index")]
    pub hit_index: u32,
    /// Position of the hit point; off the ray by up to the pick threshold
    pub hit_point: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_normal: Option<Vec3>,
    /// Mean neighbor distance around the hit, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_spacing: Option<f32>,
}

impl CarveRay {
    /// Distance past the hit that still counts as surface
    pub fn back_buffer(&self, coefficient: f32, fallback_width: f32) -> f32 {
        match self.local_spacing {
            Some(spacing) => spacing * coefficient,
            None => fallback_width,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CarveTool {
    config: CarveConfig,
}

impl CarveTool {
    pub fn new(config: CarveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CarveConfig {
        &self.config
    }

    /// Cast one ray against the cloud the intersector was built for
    ///
    /// Spacing comes from the estimator's per-point result when it is ready
    /// for the same point set, else from its running mean for that set.
    pub fn cast(
        &self,
        intersector: &PointRayIntersector,
        estimator: &IncrementalKnnEstimator,
        ray: &Ray,
    ) -> Option<CarveRay> {
        let hit = intersector.raycast(ray)?;
        let points = intersector.points();
        let index = hit.point_index as usize;

        let local_spacing = if estimator.is_current_for(points) {
            estimator.spacing(index).or_else(|| estimator.global_mean())
        } else {
            None
        };
        let surface_normal = points.normals().and_then(|n| n.get(index)).copied();

        Some(CarveRay {
            origin: ray.origin,
            direction: ray.direction,
            hit_distance: hit.distance,
            hit_index: hit.point_index,
            hit_point: hit.point,
            surface_normal,
            local_spacing,
        })
    }

    /// Cast every ray of a stroke, keeping the hits
    pub fn cast_stroke<'a>(
        &self,
        intersector: &PointRayIntersector,
        estimator: &IncrementalKnnEstimator,
        rays: impl IntoIterator<Item = &'a Ray>,
    ) -> Vec<CarveRay> {
        let hits: Vec<CarveRay> = rays
            .into_iter()
            .filter_map(|ray| self.cast(intersector, estimator, ray))
            .collect();
        log::debug!("Carve stroke: {} hits", hits.len());
        hits
    }

    /// Back buffer for `ray` under this tool's configuration
    pub fn back_buffer(&self, ray: &CarveRay) -> f32 {
        ray.back_buffer(self.config.back_buffer_coefficient, self.config.back_buffer_width)
    }
}
