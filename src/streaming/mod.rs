//! Octree LOD selection and tile streaming

pub mod node_id;
pub mod octree;
pub mod builder;
pub mod lod;
pub mod tile;
pub mod provider;
pub mod cache;
pub mod tile_loader;
pub mod stream_cache;

pub use node_id::NodeId;
pub use octree::{MetadataIssue, OctreeMetadata, OctreeNodeMetadata};
pub use builder::{BuilderConfig, BuiltOctree, OctreeBuilder};
pub use lod::{LodConfig, OctreeLodSelector, error_per_point, select_nodes};
pub use tile::{PointLabel, Tile, TileData};
pub use provider::{JsonDirTileProvider, MemoryTileProvider, TileProvider};
pub use cache::TileCache;
pub use tile_loader::{LoadRequest, LoadResult, TileLoader};
pub use stream_cache::{StreamConfig, StreamUpdate, TileStreamCache};
