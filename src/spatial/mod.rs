//! Spatial indexes answering brush, density and picking queries over a
//! [`PointSet`](crate::points::PointSet)

pub mod grid;
pub mod kdtree;
pub mod knn;
pub mod bvh;
pub mod raycast;

pub use grid::{GridConfig, SpatialGridIndex, query_radius_brute_force};
pub use kdtree::{KdTree, Neighbor};
pub use knn::{IncrementalKnnEstimator, KnnConfig, KnnResult, KnnStatus};
pub use bvh::PointBvh;
pub use raycast::{PointRayIntersector, RayConfig, RayHit, raycast_brute_force};
