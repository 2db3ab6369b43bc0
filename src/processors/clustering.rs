//! Density-based clustering capability.
//!
//! The chunked clusterer only talks to [`DensityClusterer`]; [`Dbscan`] is the
//! implementation shipped with the crate. It uses:
//! - `kiddo` KD-tree for O(log n) radius queries
//! - `rayon` for parallel neighbour queries and cluster merging
//! - Atomic union-find for lock-free cluster merging
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::processors::clustering::{dbscan, DbscanParams};
//!
//! let coords = vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [100.0, 100.0, 100.0]];
//! let labels = dbscan(&coords, &DbscanParams::new(0.5, 2)).unwrap();
//! assert_eq!(labels, vec![0, 0, -1]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::ClusteringConfig;
use crate::core::loaders::NOISE_LABEL;

const BYTES_PER_MEGABYTE: usize = 1024 * 1024;

/// Failures reported by a clustering capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("eps must be a positive finite number, got {0}")]
    InvalidEps(f64),

    #[error("min_samples must be at least 1")]
    InvalidMinSamples,

    #[error("expected {expected} labels, capability produced {actual}")]
    LabelCountMismatch { expected: usize, actual: usize },
}

/// Parameters handed to the clustering capability for one invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbscanParams {
    /// Neighbourhood radius
    pub eps: f64,
    /// Minimum neighbourhood size, the point itself included
    pub min_samples: usize,
    /// Memory cap for one neighbour-query batch
    pub max_mbytes_per_batch: Option<usize>,
}

impl DbscanParams {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self {
            eps,
            min_samples,
            max_mbytes_per_batch: None,
        }
    }

    pub fn with_memory_cap(mut self, max_mbytes_per_batch: Option<usize>) -> Self {
        self.max_mbytes_per_batch = max_mbytes_per_batch;
        self
    }

    pub fn validate(&self) -> Result<(), CapabilityError> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(CapabilityError::InvalidEps(self.eps));
        }
        if self.min_samples == 0 {
            return Err(CapabilityError::InvalidMinSamples);
        }
        Ok(())
    }

    /// Number of query rows processed together for a dataset of `n` points.
    ///
    /// A batch of `rows` queries can hold at most `rows * n` neighbour
    /// indices, so rows are chosen such that `rows * n * 8 bytes` stays within
    /// the cap. Without a cap the whole dataset is one batch.
    pub fn batch_rows(&self, n: usize) -> usize {
        match self.max_mbytes_per_batch {
            Some(mbytes) if n > 0 => {
                let budget = mbytes.saturating_mul(BYTES_PER_MEGABYTE);
                let per_row = n.saturating_mul(std::mem::size_of::<usize>());
                (budget / per_row).clamp(1, n)
            }
            _ => n.max(1),
        }
    }
}

impl From<&ClusteringConfig> for DbscanParams {
    fn from(config: &ClusteringConfig) -> Self {
        DbscanParams::new(config.eps, config.min_samples)
            .with_memory_cap(config.max_mbytes_per_batch)
    }
}

/// A density-based clustering algorithm.
///
/// Implementations return one label per input point, in input order, with
/// [`NOISE_LABEL`] for points outside every cluster. Cluster ids only need
/// to be unique within one call.
pub trait DensityClusterer: Sync {
    fn fit_predict(
        &self,
        coords: &[[f64; 3]],
        params: &DbscanParams,
    ) -> Result<Vec<i32>, CapabilityError>;
}

/// KD-tree backed DBSCAN.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dbscan;

impl DensityClusterer for Dbscan {
    fn fit_predict(
        &self,
        coords: &[[f64; 3]],
        params: &DbscanParams,
    ) -> Result<Vec<i32>, CapabilityError> {
        dbscan(coords, params)
    }
}

/// Atomic Union-Find data structure for lock-free parallel cluster merging.
///
/// Uses path compression with atomic compare-and-swap operations so that
/// several threads can merge clusters without locks.
pub struct AtomicUnionFind {
    parent: Vec<AtomicUsize>,
}

impl AtomicUnionFind {
    /// Create a new union-find structure where each element is its own parent.
    #[inline]
    pub fn new(size: usize) -> Self {
        let parent = (0..size).map(AtomicUsize::new).collect();
        Self { parent }
    }

    /// Find the root of the set containing `x` with path compression.
    #[inline]
    pub fn find(&self, mut x: usize) -> usize {
        loop {
            let p = self.parent[x].load(Ordering::Relaxed);
            if p == x {
                return x;
            }
            let gp = self.parent[p].load(Ordering::Relaxed);
            if gp != p {
                // Losing this race is fine; the next pass compresses again.
                let _ = self.parent[x].compare_exchange_weak(
                    p,
                    gp,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            x = p;
        }
    }

    /// Union the sets containing `x` and `y`.
    ///
    /// Returns true if a merge occurred, false if they were already joined.
    #[inline]
    pub fn union(&self, x: usize, y: usize) -> bool {
        loop {
            let root_x = self.find(x);
            let root_y = self.find(y);

            if root_x == root_y {
                return false;
            }

            // Smaller root always points to the larger one.
            let (small, large) = if root_x < root_y {
                (root_x, root_y)
            } else {
                (root_y, root_x)
            };

            match self.parent[small].compare_exchange_weak(
                small,
                large,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

/// Per-axis multipliers spreading the tie-break offsets over `[0, 1)`.
const TIE_BREAK_STEPS: [f64; 3] = [
    0.618_033_988_749_894_9,
    0.754_877_666_246_692_7,
    0.569_840_290_998_053_2,
];

/// Radius index over the distinct coordinates of one clustering call.
///
/// Repeated coordinates are stored once with their multiplicity. The KD-tree
/// holds each distinct point shifted by a small per-point offset so no two
/// points share a value on any axis; queries run with a radius widened by the
/// largest possible offset and candidates are then filtered on their exact
/// distance, so the offsets never change which points are neighbours.
struct NeighbourIndex {
    tree: ImmutableKdTree<f64, 3>,
    points: Vec<[f64; 3]>,
    weights: Vec<usize>,
    eps_sq: f64,
    search_sq: f64,
}

impl NeighbourIndex {
    /// Returns the index and, for every input point, its distinct slot.
    fn build(coords: &[[f64; 3]], eps: f64) -> (Self, Vec<usize>) {
        let mut slot_of: HashMap<[u64; 3], usize> = HashMap::with_capacity(coords.len());
        let mut points = Vec::new();
        let mut weights: Vec<usize> = Vec::new();
        let mut slots = Vec::with_capacity(coords.len());

        for p in coords {
            let slot = *slot_of.entry(coord_key(p)).or_insert_with(|| {
                points.push(*p);
                weights.push(0);
                points.len() - 1
            });
            weights[slot] += 1;
            slots.push(slot);
        }

        let max_abs = points
            .iter()
            .flat_map(|p| p.iter())
            .fold(0.0f64, |acc, c| acc.max(c.abs()));
        let tie_break = (eps * 1e-3).max(max_abs * 1e-9);

        let shifted: Vec<[f64; 3]> = points
            .iter()
            .enumerate()
            .map(|(u, p)| {
                let k = u as f64;
                [
                    p[0] + tie_break * (k * TIE_BREAK_STEPS[0]).fract(),
                    p[1] + tie_break * (k * TIE_BREAK_STEPS[1]).fract(),
                    p[2] + tie_break * (k * TIE_BREAK_STEPS[2]).fract(),
                ]
            })
            .collect();

        let search = eps + 2.0 * 3f64.sqrt() * tie_break;
        let index = Self {
            tree: ImmutableKdTree::new_from_slice(&shifted),
            points,
            weights,
            eps_sq: eps * eps,
            search_sq: search * search,
        };
        (index, slots)
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    /// Distinct points within `eps` of `u`, inclusive, paired with their
    /// exact squared distance.
    fn candidates(&self, u: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let query = self.points[u];
        self.tree
            .within_unsorted::<SquaredEuclidean>(&self.points[u], self.search_sq)
            .into_iter()
            .filter_map(move |nn| {
                let v = nn.item as usize;
                let d = squared_distance(&query, &self.points[v]);
                (d <= self.eps_sq).then_some((v, d))
            })
    }

    /// Number of input points, duplicates included, within `eps` of `u`.
    fn weight_within(&self, u: usize) -> usize {
        self.candidates(u).map(|(v, _)| self.weights[v]).sum()
    }

    /// Neighbours of `u` sorted by distance, `u` itself first.
    fn neighbours(&self, u: usize) -> Vec<usize> {
        let mut found: Vec<(usize, f64)> = self.candidates(u).collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found.into_iter().map(|(v, _)| v).collect()
    }
}

/// Bit pattern identifying a coordinate triple; `-0.0` and `0.0` collide.
fn coord_key(p: &[f64; 3]) -> [u64; 3] {
    p.map(|c| if c == 0.0 { 0u64 } else { c.to_bits() })
}

#[inline]
fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// DBSCAN clustering over 3-D coordinates.
///
/// A point is a core point when at least `min_samples` points (itself and
/// any exact duplicates included) lie within `eps`, boundary included. Core
/// points that are neighbours share a cluster; a non-core point joins the
/// cluster of its nearest core neighbour, and is noise (`-1`) when it has
/// none.
///
/// # Algorithm (Parallelized)
///
/// 1. **Build KD-tree** over the distinct coordinates
/// 2. **Core identification**: count neighbours per point in parallel
/// 3. **Cluster formation**: per query batch, union every core point with its
///    core neighbours and record each non-core point's nearest core neighbour
/// 4. **Label assignment**: number clusters from 0 in order of the first core
///    point of each cluster, so results are deterministic
///
/// Neighbour lists only exist for one batch at a time; the batch size comes
/// from [`DbscanParams::batch_rows`].
///
/// # Errors
///
/// Returns an error if `eps` is not a positive finite number or
/// `min_samples` is zero.
pub fn dbscan(coords: &[[f64; 3]], params: &DbscanParams) -> Result<Vec<i32>, CapabilityError> {
    params.validate()?;
    Ok(dbscan_in_batches(coords, params, params.batch_rows(coords.len())))
}

fn dbscan_in_batches(coords: &[[f64; 3]], params: &DbscanParams, batch: usize) -> Vec<i32> {
    if coords.is_empty() {
        return Vec::new();
    }

    let (index, slots) = NeighbourIndex::build(coords, params.eps);
    let n = index.len();
    let min_samples = params.min_samples;
    let batch = batch.max(1);

    // Phase 1: core points
    let mut is_core = vec![false; n];
    for (b, flags) in is_core.chunks_mut(batch).enumerate() {
        let offset = b * batch;
        flags.par_iter_mut().enumerate().for_each(|(k, flag)| {
            *flag = index.weight_within(offset + k) >= min_samples;
        });
    }

    // Phase 2: merge core neighbours, remember border anchors
    let uf = AtomicUnionFind::new(n);
    let mut anchor: Vec<Option<usize>> = vec![None; n];

    for start in (0..n).step_by(batch) {
        let end = (start + batch).min(n);
        let neighbours: Vec<Vec<usize>> = (start..end)
            .into_par_iter()
            .map(|u| index.neighbours(u))
            .collect();

        neighbours.par_iter().enumerate().for_each(|(k, neigh)| {
            let u = start + k;
            if is_core[u] {
                for &v in neigh {
                    if is_core[v] {
                        uf.union(u, v);
                    }
                }
            }
        });

        for (k, neigh) in neighbours.iter().enumerate() {
            let u = start + k;
            if !is_core[u] {
                anchor[u] = neigh.iter().copied().find(|&v| is_core[v]);
            }
        }
    }

    // Phase 3: sequential cluster ids in order of first appearance
    let mut root_to_cluster: HashMap<usize, i32> = HashMap::new();
    let mut next_cluster_id: i32 = 0;

    for u in 0..n {
        if is_core[u] {
            let root = uf.find(u);
            root_to_cluster.entry(root).or_insert_with(|| {
                let id = next_cluster_id;
                next_cluster_id += 1;
                id
            });
        }
    }

    let labels: Vec<i32> = (0..n)
        .map(|u| {
            let core = if is_core[u] { Some(u) } else { anchor[u] };
            match core {
                Some(c) => root_to_cluster[&uf.find(c)],
                None => NOISE_LABEL,
            }
        })
        .collect();

    slots.into_iter().map(|u| labels[u]).collect()
}
