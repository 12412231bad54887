//! Camera pose consumed by LOD selection

use crate::core::types::Vec3;

/// Per-frame camera state supplied by the viewer
///
/// Only the quantities that drive screen-space error are carried: where the
/// eye is, how wide the vertical frustum is and how many pixels tall the
/// viewport is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    /// World position of the eye
    pub position: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Viewport height in pixels
    pub viewport_height_px: f32,
}

impl CameraPose {
    /// Create a new camera pose
    pub fn new(position: Vec3, fov_y_degrees: f32, viewport_height_px: f32) -> Self {
        Self {
            position,
            fov_y: fov_y_degrees.to_radians(),
            viewport_height_px,
        }
    }
}

/// Pixels covered by one world unit at distance 1
///
/// `viewport_height / (2 * tan(fov / 2))`. Returns `None` when the
/// projection is degenerate: a viewport that is not a positive finite
/// height, or a field of view outside `(0, PI)`.
pub fn pixels_per_unit(viewport_height_px: f32, fov_radians: f32) -> Option<f32> {
    if !(viewport_height_px.is_finite() && viewport_height_px > 0.0) {
        return None;
    }
    if !(fov_radians.is_finite() && fov_radians > 0.0 && fov_radians < std::f32::consts::PI) {
        return None;
    }
    Some(viewport_height_px / (2.0 * (fov_radians * 0.5).tan()))
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 10.0), 60.0, 1080.0)
    }
}
