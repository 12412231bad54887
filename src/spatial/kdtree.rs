//! Balanced 3D k-d tree for nearest-neighbor queries
//!
//! The tree is implicit: `order` holds point indices permuted so that each
//! subrange `[lo, hi)` has its splitting point at `(lo + hi) / 2`, with
//! smaller coordinates on the left. Construction is O(n log n) via
//! `select_nth_unstable_by`; no per-node allocation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::points::PointSet;

/// One neighbor found by a query
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub index: u32,
    pub distance_sq: f32,
}

impl Neighbor {
    pub fn distance(&self) -> f32 {
        self.distance_sq.sqrt()
    }
}

// Max-heap by (distance, index) so the worst candidate sits on top
impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Implicit balanced k-d tree over one point set
pub struct KdTree {
    points: PointSet,
    order: Vec<u32>,
    axes: Vec<u8>,
}

impl KdTree {
    /// Build over all finite points of `points`
    pub fn build(points: &PointSet) -> Self {
        let positions = points.positions();
        let mut order: Vec<u32> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .map(|(i, _)| i as u32)
            .collect();
        let mut axes = vec![0u8; order.len()];

        build_range(positions, &mut order, &mut axes);

        Self {
            points: points.clone(),
            order,
            axes,
        }
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The point set this tree was built over
    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// The `k` nearest points to `query`, nearest first
    ///
    /// `exclude` removes one point by index (not by position), so a point
    /// coincident with the query point is still reported when it is a
    /// different index. Ties on distance are broken by lower index.
    pub fn nearest(&self, query: Vec3, k: usize, exclude: Option<u32>) -> Vec<Neighbor> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.nearest_into(query, k, exclude, &mut heap);
        heap.into_sorted_vec()
    }

    /// Allocation-reusing variant of [`nearest`](Self::nearest); leaves the
    /// unsorted result in `heap`
    pub fn nearest_into(
        &self,
        query: Vec3,
        k: usize,
        exclude: Option<u32>,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        heap.clear();
        if k == 0 || self.order.is_empty() || !query.is_finite() {
            return;
        }
        self.search(0, self.order.len(), query, k, exclude, heap);
    }

    fn search(
        &self,
        lo: usize,
        hi: usize,
        query: Vec3,
        k: usize,
        exclude: Option<u32>,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let index = self.order[mid];
        let p = self.points.positions()[index as usize];
        let axis = self.axes[mid] as usize;

        if exclude != Some(index) {
            let candidate = Neighbor {
                index,
                distance_sq: p.distance_squared(query),
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        let diff = query[axis] - p[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search(near.0, near.1, query, k, exclude, heap);

        let must_visit_far = heap.len() < k
            || heap.peek().is_some_and(|worst| diff * diff <= worst.distance_sq);
        if must_visit_far {
            self.search(far.0, far.1, query, k, exclude, heap);
        }
    }
}

fn build_range(positions: &[Vec3], order: &mut [u32], axes: &mut [u8]) {
    if order.len() <= 1 {
        return;
    }

    // Split on the widest axis of this subrange
    let axis = range_bounds(positions, order).longest_axis();

    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| {
        positions[a as usize][axis].total_cmp(&positions[b as usize][axis])
    });
    axes[mid] = axis as u8;

    let (left, rest) = order.split_at_mut(mid);
    let (left_axes, rest_axes) = axes.split_at_mut(mid);
    build_range(positions, left, left_axes);
    build_range(positions, &mut rest[1..], &mut rest_axes[1..]);
}

fn range_bounds(positions: &[Vec3], order: &[u32]) -> Aabb {
    let mut aabb = Aabb::empty();
    for &i in order {
        aabb.expand(positions[i as usize]);
    }
    aabb
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &[Vec3], query: Vec3, k: usize, exclude: Option<u32>) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = points
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_finite() && exclude != Some(*i as u32))
            .map(|(i, p)| Neighbor {
                index: i as u32,
                distance_sq: p.distance_squared(query),
            })
            .collect();
        all.sort();
        all.truncate(k);
        all
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(3);
        let positions: Vec<Vec3> = (0..2000)
            .map(|_| Vec3::new(rng.r#gen(), rng.r#gen(), rng.r#gen()) * 10.0)
            .collect();
        let tree = KdTree::build(&PointSet::new(positions.clone()));
        assert_eq!(tree.len(), 2000);

        for i in (0..2000).step_by(97) {
            let query = positions[i];
            let expected = brute_force(&positions, query, 9, Some(i as u32));
            assert_eq!(tree.nearest(query, 9, Some(i as u32)), expected);
        }
        for _ in 0..10 {
            let query = Vec3::new(rng.gen_range(-2.0..12.0), rng.gen_range(-2.0..12.0), 5.0);
            assert_eq!(tree.nearest(query, 5, None), brute_force(&positions, query, 5, None));
        }
    }

    #[test]
    fn test_exclusion_is_by_index_not_position() {
        // Three coincident points and one far away
        let positions = vec![Vec3::ONE, Vec3::ONE, Vec3::ONE, Vec3::splat(5.0)];
        let tree = KdTree::build(&PointSet::new(positions));

        let found = tree.nearest(Vec3::ONE, 3, Some(1));
        let indices: Vec<u32> = found.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        assert_eq!(found[0].distance_sq, 0.0);
        assert_eq!(found[1].distance_sq, 0.0);
    }

    #[test]
    fn test_k_larger_than_set() {
        let tree = KdTree::build(&PointSet::new(vec![Vec3::ZERO, Vec3::X]));
        let found = tree.nearest(Vec3::ZERO, 8, Some(0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 1);
        assert_eq!(found[0].distance(), 1.0);
    }

    #[test]
    fn test_empty_and_degenerate() {
        let tree = KdTree::build(&PointSet::empty());
        assert!(tree.is_empty());
        assert!(tree.nearest(Vec3::ZERO, 4, None).is_empty());

        let tree = KdTree::build(&PointSet::new(vec![Vec3::ZERO, Vec3::splat(f32::NAN)]));
        assert_eq!(tree.len(), 1);
        assert!(tree.nearest(Vec3::splat(f32::NAN), 1, None).is_empty());
        assert!(tree.nearest(Vec3::ZERO, 0, None).is_empty());
    }

    #[test]
    fn test_all_points_on_a_plane() {
        let positions: Vec<Vec3> = (0..100)
            .map(|i| Vec3::new((i % 10) as f32, (i / 10) as f32, 0.0))
            .collect();
        let tree = KdTree::build(&PointSet::new(positions.clone()));
        let found = tree.nearest(positions[55], 4, Some(55));
        assert!(found.iter().all(|n| (n.distance() - 1.0).abs() < 1e-6));
    }
}
