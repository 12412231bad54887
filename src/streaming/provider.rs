//! Tile sources
//!
//! The stream cache only needs "give me the tile for this node, eventually".
//! [`MemoryTileProvider`] serves tiles built in-process;
//! [`JsonDirTileProvider`] reads one `TileData` document per node from a
//! directory, the layout a provider service exports.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::builder::BuiltOctree;
use crate::streaming::node_id::NodeId;
use crate::streaming::octree::OctreeMetadata;
use crate::streaming::tile::{Tile, TileData};

/// File name of the hierarchy document inside a tile directory
pub const METADATA_FILE: &str = "octree_metadata.json";

/// Asynchronous source of tiles
///
/// Fetches run on the loader's runtime, so the returned future must be
/// `Send` and the provider shareable across tasks.
pub trait TileProvider: Send + Sync + 'static {
    fn fetch_tile(&self, node_id: &NodeId) -> impl Future<Output = Result<Tile>> + Send;
}

impl<P: TileProvider> TileProvider for Arc<P> {
    fn fetch_tile(&self, node_id: &NodeId) -> impl Future<Output = Result<Tile>> + Send {
        (**self).fetch_tile(node_id)
    }
}

/// Tiles held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryTileProvider {
    tiles: HashMap<NodeId, Arc<Tile>>,
}

impl MemoryTileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_built(built: &BuiltOctree) -> Self {
        let mut provider = Self::new();
        for tile in built.tiles.values() {
            provider.insert(tile.clone());
        }
        provider
    }

    pub fn insert(&mut self, tile: Tile) {
        self.tiles.insert(tile.node_id.clone(), Arc::new(tile));
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileProvider for MemoryTileProvider {
    fn fetch_tile(&self, node_id: &NodeId) -> impl Future<Output = Result<Tile>> + Send {
        let result = match self.tiles.get(node_id) {
            Some(tile) => Ok(Tile::clone(tile)),
            None => Err(Error::TileFetch {
                node_id: node_id.to_string(),
                reason: "no such tile".into(),
            }),
        };
        std::future::ready(result)
    }
}

/// Tiles stored as `<dir>/<node_id>.json`
#[derive(Clone, Debug)]
pub struct JsonDirTileProvider {
    dir: PathBuf,
}

impl JsonDirTileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tile_path(&self, node_id: &NodeId) -> PathBuf {
        self.dir.join(format!("{node_id}.json"))
    }

    /// Read `octree_metadata.json` from the directory
    pub async fn load_metadata(&self) -> Result<OctreeMetadata> {
        let text = tokio::fs::read_to_string(self.dir.join(METADATA_FILE)).await?;
        OctreeMetadata::from_json(&text)
    }

    /// Write metadata and every tile of `built` into `dir`
    pub async fn export(dir: impl Into<PathBuf>, built: &BuiltOctree) -> Result<Self> {
        let provider = Self::new(dir);
        tokio::fs::create_dir_all(&provider.dir).await?;
        tokio::fs::write(provider.dir.join(METADATA_FILE), built.metadata.to_json()?).await?;
        for tile in built.tiles.values() {
            let json = serde_json::to_vec(&tile.to_data())?;
            tokio::fs::write(provider.tile_path(&tile.node_id), json).await?;
        }
        log::info!(
            "Exported {} tiles to {}",
            built.tiles.len(),
            provider.dir.display()
        );
        Ok(provider)
    }
}

impl TileProvider for JsonDirTileProvider {
    fn fetch_tile(&self, node_id: &NodeId) -> impl Future<Output = Result<Tile>> + Send {
        let node_id = node_id.clone();
        let path = self.tile_path(&node_id);
        async move {
            // Ids become file names; anything but a path code could escape the directory
            if !node_id.is_well_formed() {
                return Err(Error::TileFetch {
                    node_id: node_id.to_string(),
                    reason: "malformed node id".into(),
                });
            }
            let bytes = tokio::fs::read(&path).await.map_err(|e| Error::TileFetch {
                node_id: node_id.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?;
            let data: TileData = serde_json::from_slice(&bytes)?;
            if data.node_id != node_id {
                return Err(Error::InvalidTile {
                    node_id: node_id.to_string(),
                    reason: format!("document is for {}", data.node_id),
                });
            }
            Tile::try_from(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::points::PointSet;
    use crate::streaming::builder::{BuilderConfig, OctreeBuilder};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn built() -> BuiltOctree {
        let pts: Vec<Vec3> = (0..200)
            .map(|i| Vec3::new((i % 10) as f32, (i / 10 % 10) as f32, (i / 100) as f32))
            .collect();
        OctreeBuilder::new(BuilderConfig { node_target: 50, max_depth: 4 }).build(&PointSet::new(pts))
    }

    #[test]
    fn test_memory_provider() {
        let built = built();
        let provider = MemoryTileProvider::from_built(&built);
        assert_eq!(provider.len(), built.tiles.len());

        let rt = runtime();
        let tile = rt.block_on(provider.fetch_tile(&NodeId::root())).unwrap();
        assert_eq!(tile, built.tiles[&NodeId::root()]);

        let err = rt.block_on(provider.fetch_tile(&NodeId::from("r77777"))).unwrap_err();
        assert!(matches!(err, Error::TileFetch { .. }));
    }

    #[test]
    fn test_json_dir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let built = built();
        let rt = runtime();

        let provider = rt.block_on(JsonDirTileProvider::export(dir.path(), &built)).unwrap();
        let meta = rt.block_on(provider.load_metadata()).unwrap();
        assert_eq!(meta, built.metadata);

        for id in built.tiles.keys() {
            let tile = rt.block_on(provider.fetch_tile(id)).unwrap();
            assert_eq!(&tile, &built.tiles[id]);
        }
    }

    #[test]
    fn test_json_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonDirTileProvider::new(dir.path());
        let rt = runtime();

        let missing = rt.block_on(provider.fetch_tile(&NodeId::from("r1"))).unwrap_err();
        assert!(matches!(missing, Error::TileFetch { .. }));

        let escape = rt.block_on(provider.fetch_tile(&NodeId::from("../r1"))).unwrap_err();
        assert!(matches!(escape, Error::TileFetch { .. }));

        std::fs::write(provider.tile_path(&NodeId::from("r2")), b"{ nope").unwrap();
        let bad = rt.block_on(provider.fetch_tile(&NodeId::from("r2"))).unwrap_err();
        assert!(matches!(bad, Error::Json(_)));

        let other = Tile::new(NodeId::from("r4"), vec![Vec3::ZERO]).to_data();
        std::fs::write(
            provider.tile_path(&NodeId::from("r3")),
            serde_json::to_vec(&other).unwrap(),
        )
        .unwrap();
        let wrong = rt.block_on(provider.fetch_tile(&NodeId::from("r3"))).unwrap_err();
        assert!(matches!(wrong, Error::InvalidTile { .. }));
    }
}
