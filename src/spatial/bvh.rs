//! Point-native bounding volume hierarchy
//!
//! Nodes store the tight bounds of their points; callers inflate by the
//! pick radius at query time, so one hierarchy serves any hit threshold.
//! Built top-down by median split on the widest axis of each node's bounds.

use crate::core::types::Vec3;
use crate::math::{Aabb, Ray};
use crate::points::PointSet;

/// Default maximum points per leaf
pub const DEFAULT_LEAF_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeIdx(u32);

impl NodeIdx {
    fn get(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum Kind {
    Leaf { start: u32, count: u32 },
    Internal { left: NodeIdx, right: NodeIdx },
}

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    kind: Kind,
}

/// Closest-along-ray candidate found by [`PointBvh::first_hit`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhHit {
    pub index: u32,
    /// Ray parameter of the point's closest approach
    pub t: f32,
}

/// BVH over the finite points of one point set
pub struct PointBvh {
    points: PointSet,
    nodes: Vec<Node>,
    order: Vec<u32>,
}

impl PointBvh {
    pub fn build(points: &PointSet, leaf_size: usize) -> Self {
        let leaf_size = leaf_size.max(1);
        let positions = points.positions();
        let mut order: Vec<u32> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .map(|(i, _)| i as u32)
            .collect();

        let mut nodes = Vec::new();
        if !order.is_empty() {
            let len = order.len();
            build_node(positions, &mut order, 0, len, leaf_size, &mut nodes);
        }

        Self {
            points: points.clone(),
            nodes,
            order,
        }
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Bounds of the whole hierarchy
    pub fn bounds(&self) -> Option<Aabb> {
        self.nodes.first().map(|n| n.bounds)
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Point with the smallest non-negative closest-approach parameter among
    /// those within `radius` of the ray line; ties go to the lower index
    pub fn first_hit(&self, ray: &Ray, radius: f32) -> Option<BvhHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let positions = self.points.positions();
        let radius_sq = radius * radius;
        // Slack so points exactly at `radius` survive slab rounding
        let margin = radius * (1.0 + 1.0e-4) + 1.0e-6;

        let mut best: Option<BvhHit> = None;
        let mut stack = vec![NodeIdx(0)];

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx.get()];
            let Some((t_near, _)) = ray.intersects_aabb(&node.bounds.inflated(margin)) else {
                continue;
            };
            if best.is_some_and(|b| t_near > b.t) {
                continue;
            }

            match node.kind {
                Kind::Leaf { start, count } => {
                    let range = start as usize..(start + count) as usize;
                    for &i in &self.order[range] {
                        let p = positions[i as usize];
                        let t = ray.closest_t(p);
                        if t < 0.0 || ray.distance_sq_to_line(p) > radius_sq {
                            continue;
                        }
                        let closer = match best {
                            None => true,
                            Some(b) => t < b.t || (t == b.t && i < b.index),
                        };
                        if closer {
                            best = Some(BvhHit { index: i, t });
                        }
                    }
                }
                Kind::Internal { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }

        best
    }
}

fn build_node(
    positions: &[Vec3],
    order: &mut [u32],
    start: usize,
    end: usize,
    leaf_size: usize,
    nodes: &mut Vec<Node>,
) -> NodeIdx {
    let mut bounds = Aabb::empty();
    for &i in &order[start..end] {
        bounds.expand(positions[i as usize]);
    }

    let idx = NodeIdx(nodes.len() as u32);
    let count = end - start;
    if count <= leaf_size {
        nodes.push(Node {
            bounds,
            kind: Kind::Leaf {
                start: start as u32,
                count: count as u32,
            },
        });
        return idx;
    }

    // Reserve the slot so children land after their parent
    nodes.push(Node {
        bounds,
        kind: Kind::Leaf { start: 0, count: 0 },
    });

    let axis = bounds.longest_axis();
    let mid = count / 2;
    order[start..end].select_nth_unstable_by(mid, |&a, &b| {
        positions[a as usize][axis].total_cmp(&positions[b as usize][axis])
    });

    let left = build_node(positions, order, start, start + mid, leaf_size, nodes);
    let right = build_node(positions, order, start + mid, end, leaf_size, nodes);
    nodes[idx.get()].kind = Kind::Internal { left, right };
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_shapes() {
        let points = PointSet::new((0..100).map(|i| Vec3::X * i as f32).collect::<Vec<_>>());
        let bvh = PointBvh::build(&points, 4);
        assert_eq!(bvh.len(), 100);
        assert!(bvh.node_count() > 25);
        let bounds = bvh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::ZERO);
        assert_eq!(bounds.max, Vec3::X * 99.0);
    }

    #[test]
    fn test_first_hit_prefers_nearest_along_ray() {
        let points = PointSet::new(vec![
            Vec3::new(7.0, 0.0, 0.0),
            Vec3::new(3.0, 0.01, 0.0),
            Vec3::new(-2.0, 0.0, 0.0),
        ]);
        let bvh = PointBvh::build(&points, 1);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hit = bvh.first_hit(&ray, 0.05).unwrap();
        assert_eq!(hit.index, 1);
        assert!((hit.t - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty() {
        let bvh = PointBvh::build(&PointSet::empty(), 8);
        assert!(bvh.is_empty());
        assert!(bvh.bounds().is_none());
        assert!(bvh.first_hit(&Ray::new(Vec3::ZERO, Vec3::X), 1.0).is_none());
    }
}
