//! Selection-driven tile residency
//!
//! Once per frame the caller hands over the LOD selection. The cache applies
//! completed fetches, requests whatever selected tile is neither resident
//! nor in flight, and trims unselected tiles down to a bounded LRU tail so
//! panning back and forth does not refetch. Everything happens on the
//! caller's thread inside [`TileStreamCache::update`]; the loader's worker
//! only ever talks to it through channels.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::types::{Result, Vec3};
use crate::points::PointSet;
use crate::streaming::cache::TileCache;
use crate::streaming::node_id::NodeId;
use crate::streaming::provider::TileProvider;
use crate::streaming::tile::Tile;
use crate::streaming::tile_loader::{LoadResult, TileLoader, level_priority};

/// Streaming settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Concurrent fetches
    pub max_concurrent: usize,
    /// Unselected tiles kept resident for reuse
    pub cache_capacity: usize,
    /// Minimum time between a failed fetch and its retry
    pub retry_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            cache_capacity: 256,
            retry_interval_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// What one [`TileStreamCache::update`] did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamUpdate {
    /// Tiles that arrived and became resident
    pub received: usize,
    /// Fetches that failed
    pub failed: usize,
    /// Fetches started this frame
    pub requested: Vec<NodeId>,
    /// Ids newly selected compared to the previous frame
    pub entered: usize,
    /// Ids no longer selected
    pub left: usize,
    /// Unselected tiles released by LRU trimming
    pub evicted: usize,
}

/// Streams the tiles of the current LOD selection
pub struct TileStreamCache {
    config: StreamConfig,
    loader: TileLoader,
    resident: TileCache,
    selected: BTreeSet<NodeId>,
    /// Last failure per id, for retry rate limiting
    failures: HashMap<NodeId, Instant>,
    /// Merged selected-and-resident points; `None` once the visible set changes
    merged: Option<MergedPoints>,
}

#[derive(Clone, Debug)]
struct MergedPoints {
    points: PointSet,
    /// `(node, first index)` per contributing tile, in index order
    spans: Vec<(NodeId, usize)>,
}

impl TileStreamCache {
    pub fn new<P: TileProvider>(provider: P, config: StreamConfig) -> Result<Self> {
        let loader = TileLoader::new(provider, config.max_concurrent)?;
        Ok(Self::with_loader(loader, config))
    }

    /// Use an already constructed loader (e.g. one bound to the host runtime)
    pub fn with_loader(loader: TileLoader, config: StreamConfig) -> Self {
        Self {
            config,
            loader,
            resident: TileCache::new(),
            selected: BTreeSet::new(),
            failures: HashMap::new(),
            merged: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Apply completions, reconcile with `selected`, request and evict
    pub fn update(&mut self, selected: &BTreeSet<NodeId>) -> StreamUpdate {
        let mut update = StreamUpdate::default();
        let now = Instant::now();

        for result in self.loader.poll_results() {
            match result {
                LoadResult::Loaded(tile) => {
                    let id = tile.node_id.clone();
                    self.failures.remove(&id);
                    if selected.contains(&id) {
                        self.merged = None;
                    }
                    self.resident.insert(Arc::new(tile));
                    update.received += 1;
                }
                LoadResult::Failed { node_id, error } => {
                    log::warn!("Tile {} failed to load: {}", node_id, error);
                    self.failures.insert(node_id, now);
                    update.failed += 1;
                }
            }
        }

        update.entered = selected.difference(&self.selected).count();
        update.left = self.selected.difference(selected).count();
        if update.entered > 0 || update.left > 0 {
            self.merged = None;
        }

        let retry_interval = self.config.retry_interval();
        self.failures
            .retain(|_, failed_at| now.duration_since(*failed_at) < retry_interval);

        for id in selected {
            if self.resident.touch(id) || self.loader.is_pending(id) {
                continue;
            }
            if self.failures.contains_key(id) {
                log::trace!("Tile {} failed recently, not retrying yet", id);
                continue;
            }
            if self.loader.request(id.clone(), level_priority(id)) {
                update.requested.push(id.clone());
            }
        }

        let evicted = self
            .resident
            .evict_where(self.config.cache_capacity, |id| !selected.contains(id));
        update.evicted = evicted.len();

        if selected != &self.selected {
            self.selected = selected.clone();
        }

        if update.received + update.failed + update.requested.len() + update.evicted > 0 {
            log::debug!(
                "Stream update: +{} -{} selected, {} received, {} failed, {} requested, {} evicted, {} resident, {} pending",
                update.entered,
                update.left,
                update.received,
                update.failed,
                update.requested.len(),
                update.evicted,
                self.resident.len(),
                self.loader.pending_count()
            );
        }
        update
    }

    /// Points in tiles that are both selected and resident
    pub fn visible_point_count(&self) -> usize {
        self.resident_tiles().map(|t| t.point_count).sum()
    }

    /// Selected tiles that are resident, in id order
    pub fn resident_tiles(&self) -> impl Iterator<Item = &Arc<Tile>> + '_ {
        self.selected.iter().filter_map(|id| self.resident.peek(id))
    }

    /// Selected ids still waiting for data
    pub fn missing(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.selected.iter().filter(|id| !self.resident.contains(id))
    }

    /// All visible points as one set
    ///
    /// The same version is returned until the visible tile set changes, so
    /// indices built over it stay valid across frames.
    pub fn merged_points(&mut self) -> PointSet {
        if let Some(merged) = &self.merged {
            return merged.points.clone();
        }

        let tiles: Vec<&Arc<Tile>> = self.resident_tiles().collect();
        let total: usize = tiles.iter().map(|t| t.positions.len()).sum();
        let with_normals = !tiles.is_empty() && tiles.iter().all(|t| t.normals.is_some());

        let mut positions: Vec<Vec3> = Vec::with_capacity(total);
        let mut normals: Vec<Vec3> = Vec::with_capacity(if with_normals { total } else { 0 });
        let mut spans = Vec::with_capacity(tiles.len());
        for tile in tiles {
            spans.push((tile.node_id.clone(), positions.len()));
            positions.extend_from_slice(&tile.positions);
            if with_normals {
                if let Some(n) = &tile.normals {
                    normals.extend_from_slice(n);
                }
            }
        }

        let points = if with_normals {
            PointSet::with_normals(positions, normals)
        } else {
            PointSet::new(positions)
        };
        log::debug!("Merged {} visible points from {} tiles", points.len(), spans.len());

        self.merged = Some(MergedPoints {
            points: points.clone(),
            spans,
        });
        points
    }

    /// Tile and in-tile index of a point in the last merged set
    pub fn locate(&self, merged_index: usize) -> Option<(&NodeId, usize)> {
        let merged = self.merged.as_ref()?;
        if merged_index >= merged.points.len() {
            return None;
        }
        let slot = merged.spans.partition_point(|(_, start)| *start <= merged_index);
        let (id, start) = merged.spans.get(slot.checked_sub(1)?)?;
        Some((id, merged_index - start))
    }

    pub fn selected(&self) -> &BTreeSet<NodeId> {
        &self.selected
    }

    pub fn is_resident(&self, id: &NodeId) -> bool {
        self.resident.contains(id)
    }

    pub fn is_pending(&self, id: &NodeId) -> bool {
        self.loader.is_pending(id)
    }

    pub fn pending_count(&self) -> usize {
        self.loader.pending_count()
    }

    /// All resident tiles, selected or retained
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }
}
