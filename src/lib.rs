//! Spatial data engine for interactive point cloud annotation
//!
//! Level-of-detail selection and tile streaming for out-of-core octrees,
//! plus the indexes annotation tools query every frame: a uniform grid for
//! brush radius queries, incremental k-NN spacing estimation and a BVH for
//! ray picking.

pub mod core;
pub mod math;
pub mod points;
pub mod spatial;
pub mod streaming;
pub mod tools;
