//! Incremental k-nearest-neighbor spacing estimation
//!
//! Computes, for every point, the mean distance to its `k` nearest
//! neighbors. The work is split into fixed-size batches driven by
//! [`IncrementalKnnEstimator::step`], which the host calls once per tick with
//! a [`SliceBudget`]. A running global mean is published every few batches
//! so tools can size offsets before the full result is ready.
//!
//! Starting on a new point set version drops the in-flight job without
//! publishing anything from it.

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::core::time::SliceBudget;
use crate::points::{PointSet, PointSetVersion};
use crate::spatial::kdtree::{KdTree, Neighbor};

/// Configuration for k-NN spacing estimation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    /// Neighbors averaged per point (the point itself never counts)
    pub neighbors: usize,
    /// Points processed per batch
    pub batch_size: usize,
    /// Publish the running global mean every this many batches
    pub mean_update_batches: usize,
    /// Suggested per-tick slice budget for hosts driving `step`
    pub slice_budget_ms: u64,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            neighbors: 8,
            batch_size: 1000,
            mean_update_batches: 5,
            slice_budget_ms: 8,
        }
    }
}

impl KnnConfig {
    /// Fresh slice budget of the configured length
    pub fn slice_budget(&self) -> SliceBudget {
        SliceBudget::from_millis(self.slice_budget_ms)
    }
}

/// Where the estimator currently stands
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KnnStatus {
    /// Nothing started (or cancelled)
    Idle,
    /// Work in flight; `progress` in [0, 1]
    Running { progress: f32 },
    /// Per-point spacing available
    Ready,
}

/// Completed per-point spacing for one point set version
#[derive(Clone, Debug)]
pub struct KnnResult {
    pub version: PointSetVersion,
    pub neighbors: usize,
    /// Mean neighbor distance per point; NaN where a point has no neighbors
    pub spacings: Vec<f32>,
    /// Mean over all points that have neighbors
    pub global_mean: Option<f32>,
}

struct Job {
    points: PointSet,
    tree: Option<KdTree>,
    next: usize,
    spacings: Vec<f32>,
    sum: f64,
    counted: usize,
    batches_since_publish: usize,
    heap: BinaryHeap<Neighbor>,
}

impl Job {
    fn new(points: &PointSet) -> Self {
        Self {
            points: points.clone(),
            tree: None,
            next: 0,
            spacings: Vec::with_capacity(points.len()),
            sum: 0.0,
            counted: 0,
            batches_since_publish: 0,
            heap: BinaryHeap::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.next >= self.points.len()
    }

    fn running_mean(&self) -> Option<f32> {
        (self.counted > 0).then(|| (self.sum / self.counted as f64) as f32)
    }

    fn run_batch(&mut self, k: usize, batch_size: usize) {
        let Some(tree) = self.tree.as_ref() else {
            return;
        };
        let end = (self.next + batch_size).min(self.points.len());
        let positions = self.points.positions();

        for i in self.next..end {
            let p = positions[i];
            tree.nearest_into(p, k, Some(i as u32), &mut self.heap);
            if self.heap.is_empty() {
                self.spacings.push(f32::NAN);
                continue;
            }
            let total: f32 = self.heap.iter().map(Neighbor::distance).sum();
            let mean = total / self.heap.len() as f32;
            self.spacings.push(mean);
            self.sum += mean as f64;
            self.counted += 1;
        }

        self.next = end;
    }
}

/// Time-sliced per-point k-NN spacing estimator
pub struct IncrementalKnnEstimator {
    config: KnnConfig,
    version: Option<PointSetVersion>,
    job: Option<Job>,
    result: Option<KnnResult>,
    published_mean: Option<f32>,
}

impl IncrementalKnnEstimator {
    pub fn new(config: KnnConfig) -> Self {
        Self {
            config,
            version: None,
            job: None,
            result: None,
            published_mean: None,
        }
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    /// Begin estimating for `points`, abandoning any in-flight job
    pub fn start(&mut self, points: &PointSet) {
        if let Some(job) = &self.job {
            log::debug!(
                "Abandoning k-NN job for version {} at {}/{} points",
                job.points.version().get(),
                job.next,
                job.points.len()
            );
        }

        self.version = Some(points.version());
        self.result = None;
        self.published_mean = None;
        self.job = Some(Job::new(points));

        if points.is_empty() {
            self.finish();
        }
    }

    /// Restart only if `points` is a different version; returns whether a
    /// new job was started
    pub fn sync(&mut self, points: &PointSet) -> bool {
        if self.version == Some(points.version()) {
            return false;
        }
        self.start(points);
        true
    }

    /// Drop all work and results
    pub fn cancel(&mut self) {
        self.version = None;
        self.job = None;
        self.result = None;
        self.published_mean = None;
    }

    /// Run one cooperative slice
    ///
    /// The first slice of a job builds the k-d tree. Every slice processes
    /// at least one batch once the tree exists, then keeps going only while
    /// `budget` has time left.
    pub fn step(&mut self, budget: SliceBudget) -> KnnStatus {
        let k = self.config.neighbors.max(1);
        let batch_size = self.config.batch_size.max(1);
        let publish_every = self.config.mean_update_batches.max(1);

        let Some(job) = self.job.as_mut() else {
            return self.status();
        };

        if job.tree.is_none() {
            let tree = KdTree::build(&job.points);
            log::info!(
                "Built k-d tree over {} points in {:.1}ms",
                tree.len(),
                budget.elapsed().as_secs_f64() * 1000.0
            );
            job.tree = Some(tree);
            if budget.is_exhausted() {
                return self.status();
            }
        }

        loop {
            job.run_batch(k, batch_size);
            job.batches_since_publish += 1;

            if job.is_done() {
                break;
            }
            if job.batches_since_publish >= publish_every {
                job.batches_since_publish = 0;
                self.published_mean = job.running_mean();
            }
            if budget.is_exhausted() {
                break;
            }
        }

        if job.is_done() {
            self.finish();
        } else {
            log::trace!("k-NN progress {}/{}", job.next, job.points.len());
        }
        self.status()
    }

    /// Step with unlimited budget until done (tests, batch tools)
    pub fn run_to_completion(&mut self) -> KnnStatus {
        while self.job.is_some() {
            self.step(SliceBudget::unlimited());
        }
        self.status()
    }

    fn finish(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        let global_mean = job.running_mean();
        log::info!(
            "k-NN spacing ready for {} points (k={}, mean spacing {:?})",
            job.points.len(),
            self.config.neighbors,
            global_mean
        );
        self.published_mean = global_mean;
        self.result = Some(KnnResult {
            version: job.points.version(),
            neighbors: self.config.neighbors,
            spacings: job.spacings,
            global_mean,
        });
    }

    pub fn status(&self) -> KnnStatus {
        if self.result.is_some() {
            KnnStatus::Ready
        } else if self.job.is_some() {
            KnnStatus::Running {
                progress: self.progress(),
            }
        } else {
            KnnStatus::Idle
        }
    }

    /// Fraction of points processed, in [0, 1]
    pub fn progress(&self) -> f32 {
        if self.result.is_some() {
            return 1.0;
        }
        match &self.job {
            Some(job) if !job.points.is_empty() => job.next as f32 / job.points.len() as f32,
            _ => 0.0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.result.is_some()
    }

    /// Whether results refer to `points` (ready or not)
    pub fn is_current_for(&self, points: &PointSet) -> bool {
        self.version == Some(points.version())
    }

    /// Version currently being (or last) estimated
    pub fn version(&self) -> Option<PointSetVersion> {
        self.version
    }

    /// Running (or final) mean spacing; refined while the job runs
    pub fn global_mean(&self) -> Option<f32> {
        self.published_mean
    }

    /// Mean neighbor distance of one point; `None` until ready, for
    /// out-of-range indices, and for points without neighbors
    pub fn spacing(&self, index: usize) -> Option<f32> {
        let result = self.result.as_ref()?;
        result
            .spacings
            .get(index)
            .copied()
            .filter(|s| s.is_finite())
    }

    /// Like [`spacing`](Self::spacing) but also `None` when `points` is not
    /// the version the result was computed for
    pub fn spacing_for(&self, points: &PointSet, index: usize) -> Option<f32> {
        if !self.is_current_for(points) {
            return None;
        }
        self.spacing(index)
    }

    /// The completed result, if any
    pub fn result(&self) -> Option<&KnnResult> {
        self.result.as_ref()
    }
}

impl Default for IncrementalKnnEstimator {
    fn default() -> Self {
        Self::new(KnnConfig::default())
    }
}
