//! Versioned point buffers shared by every spatial index

pub mod point_set;

pub use point_set::{PointSet, PointSetVersion};
