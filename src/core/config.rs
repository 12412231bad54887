//! Engine configuration
//!
//! Every component owns its own config struct; [`EngineConfig`] gathers them
//! so a host can load one JSON document and hand each section to the
//! matching component. Missing fields fall back to defaults.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::spatial::grid::GridConfig;
use crate::spatial::knn::KnnConfig;
use crate::spatial::raycast::RayConfig;
use crate::streaming::builder::BuilderConfig;
use crate::streaming::lod::LodConfig;
use crate::streaming::stream_cache::StreamConfig;
use crate::tools::carve::CarveConfig;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "SDF_LABELER_";

/// Top-level configuration for all engine components
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lod: LodConfig,
    pub grid: GridConfig,
    pub knn: KnnConfig,
    pub ray: RayConfig,
    pub stream: StreamConfig,
    pub builder: BuilderConfig,
    pub carve: CarveConfig,
}

impl EngineConfig {
    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load defaults, then an optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SDF_LABELER_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, "MIN_PIXEL_ERROR")? {
            self.lod.min_pixel_error = v;
        }
        if let Some(v) = parse_override(&lookup, "KNN_NEIGHBORS")? {
            self.knn.neighbors = v;
        }
        if let Some(v) = parse_override(&lookup, "RAY_THRESHOLD")? {
            self.ray.threshold = v;
        }
        if let Some(v) = parse_override(&lookup, "TILE_CACHE_CAPACITY")? {
            self.stream.cache_capacity = v;
        }
        if let Some(v) = parse_override(&lookup, "OCTREE_NODE_TARGET")? {
            self.builder.node_target = v;
        }
        if let Some(v) = parse_override(&lookup, "OCTREE_MAX_DEPTH")? {
            self.builder.max_depth = v;
        }
        Ok(())
    }

    /// Reject values that would make a component misbehave
    pub fn validate(&self) -> Result<()> {
        if !(self.lod.min_pixel_error.is_finite() && self.lod.min_pixel_error >= 0.0) {
            return Err(Error::Config(format!(
                "lod.min_pixel_error must be a non-negative number, got {}",
                self.lod.min_pixel_error
            )));
        }
        if self.knn.neighbors == 0 {
            return Err(Error::Config("knn.neighbors must be at least 1".into()));
        }
        if self.knn.batch_size == 0 {
            return Err(Error::Config("knn.batch_size must be at least 1".into()));
        }
        if !(self.ray.threshold.is_finite() && self.ray.threshold >= 0.0) {
            return Err(Error::Config(format!(
                "ray.threshold must be a non-negative number, got {}",
                self.ray.threshold
            )));
        }
        if !(self.grid.min_cell_size.is_finite() && self.grid.min_cell_size > 0.0) {
            return Err(Error::Config("grid.min_cell_size must be positive".into()));
        }
        if self.stream.max_concurrent == 0 {
            return Err(Error::Config("stream.max_concurrent must be at least 1".into()));
        }
        if !(self.carve.back_buffer_coefficient >= 0.0 && self.carve.back_buffer_width >= 0.0) {
            return Err(Error::Config("carve back buffer settings must be non-negative".into()));
        }
        if self.builder.node_target == 0 {
            return Err(Error::Config("builder.node_target must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{ENV_PREFIX}{key}");
    match lookup(&name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
        None => Ok(None),
    }
}
