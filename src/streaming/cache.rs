//! LRU cache for resident tiles
//!
//! Tiles are held behind `Arc` so renderers and the merged point set can
//! share them without copying. The cache itself never evicts on insert:
//! which tiles may go is decided by the stream cache (tiles still selected
//! for rendering must stay), so eviction takes a predicate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::streaming::node_id::NodeId;
use crate::streaming::tile::Tile;

/// LRU cache for tiles
///
/// Access order is tracked to determine which tiles to evict first.
#[derive(Debug, Default)]
pub struct TileCache {
    tiles: HashMap<NodeId, Arc<Tile>>,
    /// Access order: oldest first, newest last
    access_order: Vec<NodeId>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a tile and mark it as recently used
    pub fn get(&mut self, id: &NodeId) -> Option<&Arc<Tile>> {
        if self.tiles.contains_key(id) {
            self.update_access_order(id);
            self.tiles.get(id)
        } else {
            None
        }
    }

    /// Get a tile without touching the access order
    pub fn peek(&self, id: &NodeId) -> Option<&Arc<Tile>> {
        self.tiles.get(id)
    }

    /// Mark a tile as recently used; returns whether it is resident
    pub fn touch(&mut self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Insert (or replace) a tile as the most recently used entry
    ///
    /// Returns the replaced tile if one existed.
    pub fn insert(&mut self, tile: Arc<Tile>) -> Option<Arc<Tile>> {
        let id = tile.node_id.clone();
        if self.tiles.contains_key(&id) {
            self.remove_from_access_order(&id);
        }
        let replaced = self.tiles.insert(id.clone(), tile);
        self.access_order.push(id);
        replaced
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Arc<Tile>> {
        self.remove_from_access_order(id);
        self.tiles.remove(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.tiles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Evict the least recently used tile
    pub fn evict_oldest(&mut self) -> Option<Arc<Tile>> {
        let id = self.access_order.first()?.clone();
        self.remove(&id)
    }

    /// Evict the oldest tiles matching `evictable` until at most `keep` of
    /// them remain; tiles not matching are never touched
    pub fn evict_where<F>(&mut self, keep: usize, evictable: F) -> Vec<Arc<Tile>>
    where
        F: Fn(&NodeId) -> bool,
    {
        let candidates: Vec<NodeId> = self
            .access_order
            .iter()
            .filter(|id| evictable(id))
            .cloned()
            .collect();
        let excess = candidates.len().saturating_sub(keep);
        candidates
            .into_iter()
            .take(excess)
            .filter_map(|id| self.remove(&id))
            .collect()
    }

    /// Ids from least to most recently used
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.access_order.iter()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.access_order.clear();
    }

    fn update_access_order(&mut self, id: &NodeId) {
        self.remove_from_access_order(id);
        self.access_order.push(id.clone());
    }

    fn remove_from_access_order(&mut self, id: &NodeId) {
        if let Some(pos) = self.access_order.iter().position(|c| c == id) {
            self.access_order.remove(pos);
        }
    }
}
