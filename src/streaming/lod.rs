//! Screen-space-error level of detail selection
//!
//! Walks the octree breadth-first from the root and stops descending as soon
//! as a node's points would be packed densely enough on screen. The result is
//! an anti-chain: no selected node is an ancestor of another.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::camera::{CameraPose, pixels_per_unit};
use crate::core::types::Vec3;
use crate::streaming::node_id::NodeId;
use crate::streaming::octree::{OctreeMetadata, OctreeNodeMetadata};

/// Distance floor so a camera inside a node never divides by zero
pub const MIN_DISTANCE: f32 = 1e-6;

/// Configuration for LOD selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// A node is fine enough once its screen pixels per point drop below this
    pub min_pixel_error: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self { min_pixel_error: 1.0 }
    }
}

/// Screen height in pixels of an object of size `extent` at `distance`
///
/// Infinite when the projection is degenerate.
///
/// # Examples
/// ```
/// use sdf_labeler_engine::streaming::lod::projected_size;
///
/// // 90 degree fov on a 1000 px viewport: 500 px per unit at distance 1
/// let px = projected_size(2.0, 4.0, 1000.0, std::f32::consts::FRAC_PI_2);
/// assert!((px - 250.0).abs() < 1e-3);
/// ```
pub fn projected_size(extent: f32, distance: f32, viewport_height_px: f32, fov_radians: f32) -> f32 {
    pixels_per_unit(viewport_height_px, fov_radians)
        .map_or(f32::INFINITY, |ppu| scaled_size(extent, distance, ppu))
}

/// Projected size of the node's box divided over the points it renders
pub fn error_per_point(
    node: &OctreeNodeMetadata,
    camera_position: Vec3,
    viewport_height_px: f32,
    fov_radians: f32,
) -> f32 {
    pixels_per_unit(viewport_height_px, fov_radians)
        .map_or(f32::INFINITY, |ppu| node_error(node, camera_position, ppu))
}

fn scaled_size(extent: f32, distance: f32, pixels_per_unit: f32) -> f32 {
    (extent / distance.max(MIN_DISTANCE)) * pixels_per_unit
}

fn node_error(node: &OctreeNodeMetadata, camera_position: Vec3, pixels_per_unit: f32) -> f32 {
    let bounds = node.bounds();
    let distance = camera_position.distance(bounds.center());
    scaled_size(bounds.max_extent(), distance, pixels_per_unit) / node.point_count.max(1) as f32
}

/// Select the nodes to render for a camera position
///
/// A node is selected when its error per point is below `min_pixel_error` or
/// when none of its children are present in `metadata`; otherwise its present
/// children are visited. A missing root yields nothing, an unusable
/// projection yields the root alone.
pub fn select_nodes(
    metadata: &OctreeMetadata,
    camera_position: Vec3,
    viewport_height_px: f32,
    fov_radians: f32,
    min_pixel_error: f32,
) -> BTreeSet<NodeId> {
    let mut selected = BTreeSet::new();

    let Some(root) = metadata.root() else {
        if !metadata.is_empty() {
            log::debug!("LOD: root {} missing from metadata", metadata.root_id);
        }
        return selected;
    };

    let ppu = match pixels_per_unit(viewport_height_px, fov_radians) {
        Some(ppu) if camera_position.is_finite() => ppu,
        _ => {
            log::debug!(
                "LOD: degenerate projection (viewport {}, fov {}), selecting root",
                viewport_height_px,
                fov_radians
            );
            selected.insert(root.node_id.clone());
            return selected;
        }
    };

    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut queue: VecDeque<&OctreeNodeMetadata> = VecDeque::new();
    visited.insert(&root.node_id);
    queue.push_back(root);

    while let Some(node) = queue.pop_front() {
        let error = node_error(node, camera_position, ppu);

        let mut children = Vec::with_capacity(node.children.len());
        for child_id in &node.children {
            match metadata.get(child_id) {
                Some(child) if !visited.contains(&child.node_id) => children.push(child),
                Some(_) => log::debug!("LOD: {} reached twice, skipping", child_id),
                None => log::debug!("LOD: child {} of {} not in metadata", child_id, node.node_id),
            }
        }

        if error < min_pixel_error || children.is_empty() {
            selected.insert(node.node_id.clone());
            continue;
        }

        for child in children {
            if visited.insert(&child.node_id) {
                queue.push_back(child);
            }
        }
    }

    selected
}

/// LOD selector bound to a configuration
#[derive(Clone, Debug, Default)]
pub struct OctreeLodSelector {
    config: LodConfig,
}

impl OctreeLodSelector {
    pub fn new(config: LodConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn set_min_pixel_error(&mut self, min_pixel_error: f32) {
        self.config.min_pixel_error = min_pixel_error;
    }

    /// Nodes to render for `camera`
    pub fn select(&self, metadata: &OctreeMetadata, camera: &CameraPose) -> BTreeSet<NodeId> {
        let selected = select_nodes(
            metadata,
            camera.position,
            camera.viewport_height_px,
            camera.fov_y,
            self.config.min_pixel_error,
        );
        log::trace!("LOD: {} nodes selected", selected.len());
        selected
    }

    /// Total points rendered by a selection
    pub fn point_count(metadata: &OctreeMetadata, selected: &BTreeSet<NodeId>) -> u64 {
        selected
            .iter()
            .filter_map(|id| metadata.get(id))
            .map(|n| n.point_count)
            .sum()
    }
}
