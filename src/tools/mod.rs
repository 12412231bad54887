//! Annotation tools built on the spatial indexes

pub mod brush;
pub mod carve;

pub use brush::BrushSelector;
pub use carve::{CarveConfig, CarveRay, CarveTool};
