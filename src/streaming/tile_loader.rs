//! Async tile loading with priority-ordered, bounded concurrency
//!
//! Requests go to a worker task over an unbounded channel; the worker keeps
//! at most `max_concurrent` fetches in flight and starts the highest
//! priority request first. Results come back over a second channel and are
//! only observed when the owner polls, so the owner's state is never touched
//! from another thread.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::node_id::NodeId;
use crate::streaming::provider::TileProvider;
use crate::streaming::tile::Tile;

/// Request to load a tile with priority (higher first)
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub node_id: NodeId,
    pub priority: f32,
}

/// Result of a tile fetch
#[derive(Debug)]
pub enum LoadResult {
    Loaded(Tile),
    Failed { node_id: NodeId, error: Error },
}

impl LoadResult {
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Loaded(tile) => &tile.node_id,
            Self::Failed { node_id, .. } => node_id,
        }
    }
}

/// Coarse tiles first: the root outranks every descendant
pub fn level_priority(node_id: &NodeId) -> f32 {
    -(node_id.level() as f32)
}

/// Concurrent tile loader with async I/O
pub struct TileLoader {
    /// Channel for sending load requests to the worker
    request_tx: Option<mpsc::UnboundedSender<LoadRequest>>,
    /// Channel for receiving load results
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
    /// Tiles requested and not yet polled back
    pending: HashSet<NodeId>,
    /// Dedicated runtime, `None` when running on a caller-supplied handle
    runtime: Option<Runtime>,
}

impl TileLoader {
    /// Create a loader with its own multi-threaded runtime
    pub fn new<P: TileProvider>(provider: P, max_concurrent: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tile-loader")
            .enable_all()
            .build()
            .map_err(|e| Error::Streaming(format!("failed to start loader runtime: {e}")))?;
        let handle = runtime.handle().clone();
        let mut loader = Self::with_handle(provider, max_concurrent, &handle);
        loader.runtime = Some(runtime);
        Ok(loader)
    }

    /// Create a loader whose worker runs on an existing runtime
    pub fn with_handle<P: TileProvider>(provider: P, max_concurrent: usize, handle: &Handle) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<LoadResult>();

        handle.spawn(Self::worker_loop(
            Arc::new(provider),
            max_concurrent.max(1),
            request_rx,
            result_tx,
        ));

        Self {
            request_tx: Some(request_tx),
            result_rx,
            pending: HashSet::new(),
            runtime: None,
        }
    }

    /// Worker loop that processes load requests with concurrency control
    async fn worker_loop<P: TileProvider>(
        provider: Arc<P>,
        max_concurrent: usize,
        mut request_rx: mpsc::UnboundedReceiver<LoadRequest>,
        result_tx: mpsc::UnboundedSender<LoadResult>,
    ) {
        let mut active_tasks: JoinSet<LoadResult> = JoinSet::new();
        let mut queued: Vec<LoadRequest> = Vec::new();
        let mut closed = false;

        loop {
            tokio::select! {
                request = request_rx.recv(), if !closed => match request {
                    Some(request) => queued.push(request),
                    None => closed = true,
                },

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            if result_tx.send(result).is_err() {
                                // Owner is gone; nobody will read further results
                                break;
                            }
                        }
                        Err(e) => log::error!("Tile loader task failed: {}", e),
                    }
                }

                else => break,
            }

            if closed {
                // Owner dropped the loader: stop starting new work
                queued.clear();
                if active_tasks.is_empty() {
                    break;
                }
            }

            // Start new fetches if we have capacity, highest priority first
            if active_tasks.len() < max_concurrent && !queued.is_empty() {
                queued.sort_by(|a, b| a.priority.total_cmp(&b.priority));
                while active_tasks.len() < max_concurrent {
                    let Some(request) = queued.pop() else { break };
                    log::trace!("Fetching tile {}", request.node_id);
                    active_tasks.spawn(Self::load_tile_task(provider.clone(), request.node_id));
                }
            }
        }

        log::debug!("Tile loader worker stopped");
    }

    /// Task that loads a single tile
    ///
    /// The fetch runs as its own task so a panicking provider still produces
    /// a result for the id instead of leaving it pending forever.
    async fn load_tile_task<P: TileProvider>(provider: Arc<P>, node_id: NodeId) -> LoadResult {
        let id = node_id.clone();
        let fetch = tokio::spawn(async move { provider.fetch_tile(&id).await });
        let result = match fetch.await {
            Ok(result) => result,
            Err(e) => Err(Error::Streaming(format!("fetch task aborted: {e}"))),
        };
        match result {
            Ok(tile) if tile.node_id == node_id => LoadResult::Loaded(tile),
            Ok(tile) => LoadResult::Failed {
                error: Error::InvalidTile {
                    node_id: node_id.to_string(),
                    reason: format!("provider returned tile {}", tile.node_id),
                },
                node_id,
            },
            Err(error) => LoadResult::Failed { node_id, error },
        }
    }

    /// Request a tile to be loaded
    ///
    /// Returns `false` if the tile is already pending or the worker is gone,
    /// `true` if the request was queued.
    pub fn request(&mut self, node_id: NodeId, priority: f32) -> bool {
        if self.pending.contains(&node_id) {
            return false;
        }
        let Some(tx) = &self.request_tx else {
            return false;
        };
        let request = LoadRequest {
            node_id: node_id.clone(),
            priority,
        };
        if tx.send(request).is_err() {
            log::warn!("Tile loader worker is gone, dropping request for {}", node_id);
            return false;
        }
        self.pending.insert(node_id);
        true
    }

    /// Poll for completed load results (non-blocking)
    pub fn poll_results(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            self.pending.remove(result.node_id());
            results.push(result);
        }
        results
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, node_id: &NodeId) -> bool {
        self.pending.contains(node_id)
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        // Closing the request channel lets the worker drain and exit
        self.request_tx.take();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::streaming::provider::MemoryTileProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records the order fetches start in and sleeps before answering
    struct RecordingProvider {
        started: std::sync::Mutex<Vec<NodeId>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl RecordingProvider {
        fn new(delay: Duration) -> Self {
            Self {
                started: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl TileProvider for RecordingProvider {
        fn fetch_tile(&self, node_id: &NodeId) -> impl Future<Output = Result<Tile>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().push(node_id.clone());
            let delay = self.delay;
            let node_id = node_id.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(Tile::new(node_id, vec![Vec3::ZERO]))
            }
        }
    }

    fn drain(loader: &mut TileLoader, expected: usize) -> Vec<LoadResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < expected && Instant::now() < deadline {
            results.extend(loader.poll_results());
            std::thread::sleep(Duration::from_millis(2));
        }
        results
    }

    fn memory_provider() -> MemoryTileProvider {
        let mut provider = MemoryTileProvider::new();
        provider.insert(Tile::new(NodeId::from("r1"), vec![Vec3::ONE; 4]));
        provider
    }

    #[test]
    fn test_loader_creation() {
        let loader = TileLoader::new(memory_provider(), 4).unwrap();
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_pending_tracking() {
        let mut loader = TileLoader::new(RecordingProvider::new(Duration::from_millis(50)), 4).unwrap();
        let id = NodeId::from("r5");

        assert!(loader.request(id.clone(), 1.0));
        assert_eq!(loader.pending_count(), 1);
        assert!(loader.is_pending(&id));

        // Second request for the same tile is rejected
        assert!(!loader.request(id.clone(), 2.0));
        assert_eq!(loader.pending_count(), 1);

        let results = drain(&mut loader, 1);
        assert_eq!(results.len(), 1);
        assert!(!loader.is_pending(&id));
    }

    #[test]
    fn test_load_and_failure_results() {
        let mut loader = TileLoader::new(memory_provider(), 2).unwrap();
        loader.request(NodeId::from("r1"), 0.0);
        loader.request(NodeId::from("r2"), 0.0);

        let mut results = drain(&mut loader, 2);
        results.sort_by(|a, b| a.node_id().cmp(b.node_id()));
        assert!(matches!(&results[0], LoadResult::Loaded(t) if t.point_count == 4));
        assert!(matches!(
            &results[1],
            LoadResult::Failed { node_id, error: Error::TileFetch { .. } } if node_id.as_str() == "r2"
        ));
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_coarse_requests_start_first() {
        let provider = Arc::new(RecordingProvider::new(Duration::from_millis(30)));
        let mut loader = TileLoader::new(provider.clone(), 1).unwrap();

        // The first request occupies the single slot; the rest queue up
        loader.request(NodeId::from("r0"), level_priority(&NodeId::from("r0")));
        std::thread::sleep(Duration::from_millis(10));
        for id in ["r123", "r12", "r1"] {
            let id = NodeId::from(id);
            let priority = level_priority(&id);
            loader.request(id, priority);
        }

        let results = drain(&mut loader, 4);
        assert_eq!(results.len(), 4);
        let started: Vec<String> = provider
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(started, vec!["r0", "r1", "r12", "r123"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_with_handle_on_existing_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let mut loader = TileLoader::with_handle(memory_provider(), 2, runtime.handle());
        loader.request(NodeId::from("r1"), 0.0);
        let results = drain(&mut loader, 1);
        assert!(matches!(&results[0], LoadResult::Loaded(_)));
    }

    #[test]
    fn test_level_priority_orders_coarse_first() {
        assert!(level_priority(&NodeId::root()) > level_priority(&NodeId::from("r0")));
        assert!(level_priority(&NodeId::from("r0")) > level_priority(&NodeId::from("r01")));
    }
}
