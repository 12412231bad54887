//! Error types for the labeler engine

use thiserror::Error;

/// Main error type for the engine
///
/// Query paths (radius, k-NN, ray) never produce these; they degrade to
/// empty or `None` results. Errors only surface from runtime setup, tile
/// providers and configuration parsing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tile fetch failed for {node_id}: {reason}")]
    TileFetch { node_id: String, reason: String },

    #[error("Invalid tile {node_id}: {reason}")]
    InvalidTile { node_id: String, reason: String },

    #[error("Streaming error: {0}")]
    Streaming(String),

    #[error("Config error: {0}")]
    Config(String),
}
