//! Octree construction from an in-memory point set
//!
//! Produces the same metadata and tile shapes a remote provider serves, so a
//! cloud loaded locally can be streamed through the same cache. Interior
//! nodes carry an evenly strided subsample for coarse LODs; leaves carry
//! every point that reaches them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::points::PointSet;
use crate::streaming::node_id::NodeId;
use crate::streaming::octree::{OctreeMetadata, OctreeNodeMetadata};
use crate::streaming::tile::Tile;

/// Points per node before it subdivides
pub const DEFAULT_NODE_TARGET: usize = 65_536;
/// Deepest level the builder will create
pub const DEFAULT_MAX_DEPTH: u32 = 12;

/// Builder settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub node_target: usize,
    pub max_depth: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            node_target: DEFAULT_NODE_TARGET,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Metadata plus the tile for every node
#[derive(Clone, Debug, Default)]
pub struct BuiltOctree {
    pub metadata: OctreeMetadata,
    pub tiles: HashMap<NodeId, Tile>,
}

pub struct OctreeBuilder {
    config: BuilderConfig,
}

impl OctreeBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Partition `points` into an octree
    pub fn build(&self, points: &PointSet) -> BuiltOctree {
        let indices: Vec<u32> = (0..points.len() as u32)
            .filter(|&i| points.positions()[i as usize].is_finite())
            .collect();
        if indices.is_empty() {
            return BuiltOctree::default();
        }
        let mut bounds = Aabb::empty();
        for &i in &indices {
            bounds.expand(points.positions()[i as usize]);
        }

        let mut out = BuiltOctree {
            metadata: OctreeMetadata {
                root_id: NodeId::root(),
                bounds_low: bounds.min.to_array(),
                bounds_high: bounds.max.to_array(),
                total_points: indices.len() as u64,
                max_depth: 0,
                node_count: 0,
                nodes: HashMap::new(),
            },
            tiles: HashMap::new(),
        };

        self.build_node(points, NodeId::root(), bounds, indices, &mut out);
        out.metadata.node_count = out.metadata.nodes.len();

        log::info!(
            "Built octree: {} points, {} nodes, depth {}",
            out.metadata.total_points,
            out.metadata.node_count,
            out.metadata.max_depth
        );
        out
    }

    fn build_node(
        &self,
        points: &PointSet,
        id: NodeId,
        bounds: Aabb,
        indices: Vec<u32>,
        out: &mut BuiltOctree,
    ) {
        let level = id.level();
        out.metadata.max_depth = out.metadata.max_depth.max(level);

        let subdivide = indices.len() > self.config.node_target && level < self.config.max_depth;
        let tile_indices = if subdivide {
            strided_subsample(&indices, (self.config.node_target / 2).max(1))
        } else {
            indices.clone()
        };

        let tile = make_tile(points, id.clone(), &tile_indices);
        let mut node = OctreeNodeMetadata::new(id.clone(), bounds, tile.point_count as u64);

        if subdivide {
            let positions = points.positions();
            let mut octants: [Vec<u32>; 8] = Default::default();
            for i in indices {
                octants[bounds.octant_of(positions[i as usize]) as usize].push(i);
            }
            for (octant, members) in octants.into_iter().enumerate() {
                if members.is_empty() {
                    continue;
                }
                let child_id = id.child(octant as u8);
                node.children.push(child_id.clone());
                self.build_node(points, child_id, bounds.child_octant(octant as u8), members, out);
            }
        }

        out.tiles.insert(id.clone(), tile);
        out.metadata.nodes.insert(id, node);
    }
}

impl Default for OctreeBuilder {
    fn default() -> Self {
        Self::new(BuilderConfig::default())
    }
}

/// `count` indices spread evenly over `indices`
fn strided_subsample(indices: &[u32], count: usize) -> Vec<u32> {
    let n = indices.len();
    if count >= n {
        return indices.to_vec();
    }
    (0..count).map(|i| indices[i * n / count]).collect()
}

fn make_tile(points: &PointSet, id: NodeId, indices: &[u32]) -> Tile {
    let positions: Vec<Vec3> = indices
        .iter()
        .map(|&i| points.positions()[i as usize])
        .collect();
    let tile = Tile::new(id, positions);
    match points.normals() {
        Some(normals) => tile.with_normals(indices.iter().map(|&i| normals[i as usize]).collect()),
        None => tile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> PointSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let pts: Vec<Vec3> = (0..n)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(0.0..2.0),
                )
            })
            .collect();
        PointSet::new(pts)
    }

    fn builder(node_target: usize, max_depth: u32) -> OctreeBuilder {
        OctreeBuilder::new(BuilderConfig { node_target, max_depth })
    }

    #[test]
    fn test_small_cloud_is_single_root() {
        let points = random_cloud(100, 1);
        let built = builder(1000, 8).build(&points);
        assert_eq!(built.metadata.node_count, 1);
        let root = built.metadata.root().unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.point_count, 100);
        assert_eq!(built.tiles[&NodeId::root()].positions.len(), 100);
    }

    #[test]
    fn test_leaves_partition_the_points() {
        let points = random_cloud(5000, 2);
        let built = builder(500, 8).build(&points);
        let meta = &built.metadata;

        assert!(meta.node_count > 1);
        assert!(meta.validate().is_empty());

        let leaf_total: u64 = meta
            .nodes
            .values()
            .filter(|n| n.is_leaf())
            .map(|n| n.point_count)
            .sum();
        assert_eq!(leaf_total, 5000);
        assert_eq!(meta.total_points, 5000);
    }

    #[test]
    fn test_interior_tiles_are_subsampled() {
        let points = random_cloud(5000, 3);
        let built = builder(500, 8).build(&points);
        for node in built.metadata.nodes.values() {
            let tile = &built.tiles[&node.node_id];
            assert_eq!(tile.point_count as u64, node.point_count);
            if node.is_leaf() {
                assert!(tile.point_count <= 500 || node.level == 8);
            } else {
                assert_eq!(tile.point_count, 250);
            }
            for p in &tile.positions {
                assert!(node.bounds().inflated(1e-5).contains_point(*p));
            }
        }
    }

    #[test]
    fn test_child_ids_follow_octants() {
        let points = random_cloud(2000, 4);
        let built = builder(100, 6).build(&points);
        for node in built.metadata.nodes.values() {
            for child in &node.children {
                assert!(node.node_id.is_ancestor_of(child));
                assert_eq!(child.level(), node.level + 1);
                let octant = child.octants().last().unwrap();
                assert_eq!(
                    built.metadata.nodes[child].bounds(),
                    node.bounds().child_octant(octant)
                );
            }
        }
    }

    #[test]
    fn test_depth_limit_stops_subdivision() {
        let points = PointSet::new(vec![Vec3::splat(1.0); 50]);
        let built = builder(10, 3).build(&points);
        assert_eq!(built.metadata.max_depth, 3);
        let deepest: Vec<_> = built
            .metadata
            .nodes
            .values()
            .filter(|n| n.level == 3)
            .collect();
        assert_eq!(deepest.len(), 1);
        assert_eq!(deepest[0].point_count, 50);
    }

    #[test]
    fn test_normals_travel_with_points() {
        let pts = vec![Vec3::ZERO, Vec3::ONE, Vec3::X];
        let points = PointSet::with_normals(pts, vec![Vec3::Z, Vec3::Y, Vec3::X]);
        let built = builder(10, 4).build(&points);
        let tile = &built.tiles[&NodeId::root()];
        assert_eq!(tile.normals.as_deref(), Some(&[Vec3::Z, Vec3::Y, Vec3::X][..]));
    }

    #[test]
    fn test_empty_input() {
        let built = OctreeBuilder::default().build(&PointSet::empty());
        assert!(built.metadata.is_empty());
        assert!(built.tiles.is_empty());
    }

    #[test]
    fn test_strided_subsample() {
        let idx: Vec<u32> = (0..10).collect();
        assert_eq!(strided_subsample(&idx, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(strided_subsample(&idx, 20), idx);
    }
}
